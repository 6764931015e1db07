//! Per-kind document logic.
//!
//! Each [`StateKindAdapter`] is a set of pure functions: decoding a relay
//! record, encoding a document, and computing the next document from the
//! current one and an operation. The engine only wires these to the cache
//! and the network.

use crate::error::{SyncError, SyncResult};
use relaymark_protocol::{
    decode_bookmark_list, decode_collections, decode_metadata, encode_bookmark_list,
    encode_collections, encode_metadata, BookmarkCollection, BookmarkMetadata, OwnerKey,
    ProtocolResult, Record, RecordDraft, StateKind, StateOp, StateValue,
};
use std::fmt::Debug;

/// Document logic for one [`StateKind`].
pub trait StateKindAdapter: Send + Sync + 'static {
    /// The document kind.
    const KIND: StateKind;

    /// One element of the document.
    type Item: Clone + Debug + PartialEq + Send + Sync + 'static;

    /// Returns the key identifying `item` within the document.
    fn key(item: &Self::Item) -> &str;

    /// Decodes a relay record.
    fn decode(record: &Record) -> ProtocolResult<Vec<Self::Item>>;

    /// Encodes the document as a draft for `owner`.
    fn encode(owner: &OwnerKey, items: &[Self::Item], created_at: u64) -> ProtocolResult<RecordDraft>;

    /// Computes the document after applying `op` to `current`.
    ///
    /// Returns an unchanged copy when `op` is a no-op on `current`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::KindMismatch`] if `op` targets another kind.
    fn apply(current: &[Self::Item], op: &StateOp) -> SyncResult<Vec<Self::Item>>;

    /// Wraps the document for the cache.
    fn into_value(items: Vec<Self::Item>) -> StateValue;

    /// Unwraps a cached document, or `None` if it is of another kind.
    fn from_value(value: StateValue) -> Option<Vec<Self::Item>>;
}

fn mismatch<A: StateKindAdapter>(op: &StateOp) -> SyncError {
    SyncError::KindMismatch {
        op: op.name(),
        kind: A::KIND.as_str(),
    }
}

/// The ordered set of bookmarked event ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct BookmarkListAdapter;

impl StateKindAdapter for BookmarkListAdapter {
    const KIND: StateKind = StateKind::BookmarkList;
    type Item = String;

    fn key(item: &String) -> &str {
        item
    }

    fn decode(record: &Record) -> ProtocolResult<Vec<String>> {
        decode_bookmark_list(record)
    }

    fn encode(owner: &OwnerKey, items: &[String], created_at: u64) -> ProtocolResult<RecordDraft> {
        Ok(encode_bookmark_list(owner, items, created_at))
    }

    fn apply(current: &[String], op: &StateOp) -> SyncResult<Vec<String>> {
        let mut next = current.to_vec();
        match op {
            StateOp::AddBookmark { event_id } => {
                if !next.contains(event_id) {
                    next.push(event_id.clone());
                }
            }
            StateOp::RemoveBookmark { event_id } => next.retain(|id| id != event_id),
            other => return Err(mismatch::<Self>(other)),
        }
        Ok(next)
    }

    fn into_value(items: Vec<String>) -> StateValue {
        StateValue::BookmarkList(items)
    }

    fn from_value(value: StateValue) -> Option<Vec<String>> {
        match value {
            StateValue::BookmarkList(items) => Some(items),
            _ => None,
        }
    }
}

/// Bookmark collections, unique by id.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectionsAdapter;

impl StateKindAdapter for CollectionsAdapter {
    const KIND: StateKind = StateKind::BookmarkCollections;
    type Item = BookmarkCollection;

    fn key(item: &BookmarkCollection) -> &str {
        &item.id
    }

    fn decode(record: &Record) -> ProtocolResult<Vec<BookmarkCollection>> {
        decode_collections(record)
    }

    fn encode(
        owner: &OwnerKey,
        items: &[BookmarkCollection],
        created_at: u64,
    ) -> ProtocolResult<RecordDraft> {
        encode_collections(owner, items, created_at)
    }

    fn apply(current: &[BookmarkCollection], op: &StateOp) -> SyncResult<Vec<BookmarkCollection>> {
        let mut next = current.to_vec();
        match op {
            StateOp::CreateCollection(collection) => {
                if !next.iter().any(|c| c.id == collection.id) {
                    next.push(collection.clone());
                }
            }
            StateOp::UpdateCollection { id, update } => {
                if let Some(existing) = next.iter_mut().find(|c| &c.id == id) {
                    existing.name = update.name.clone();
                    existing.color = update.color.clone();
                    existing.description = update.description.clone();
                }
            }
            StateOp::DeleteCollection { id } => next.retain(|c| &c.id != id),
            other => return Err(mismatch::<Self>(other)),
        }
        Ok(next)
    }

    fn into_value(items: Vec<BookmarkCollection>) -> StateValue {
        StateValue::BookmarkCollections(items)
    }

    fn from_value(value: StateValue) -> Option<Vec<BookmarkCollection>> {
        match value {
            StateValue::BookmarkCollections(items) => Some(items),
            _ => None,
        }
    }
}

/// Per-bookmark metadata, unique by event id.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataAdapter;

impl StateKindAdapter for MetadataAdapter {
    const KIND: StateKind = StateKind::BookmarkMetadata;
    type Item = BookmarkMetadata;

    fn key(item: &BookmarkMetadata) -> &str {
        &item.event_id
    }

    fn decode(record: &Record) -> ProtocolResult<Vec<BookmarkMetadata>> {
        decode_metadata(record)
    }

    fn encode(
        owner: &OwnerKey,
        items: &[BookmarkMetadata],
        created_at: u64,
    ) -> ProtocolResult<RecordDraft> {
        encode_metadata(owner, items, created_at)
    }

    fn apply(current: &[BookmarkMetadata], op: &StateOp) -> SyncResult<Vec<BookmarkMetadata>> {
        let mut next = current.to_vec();
        match op {
            StateOp::UpdateMetadata {
                event_id,
                id,
                added_at,
                update,
            } => match next.iter_mut().find(|m| &m.event_id == event_id) {
                Some(existing) => {
                    existing.collection_id = update.collection_id.clone();
                    existing.tags = update.tags.clone();
                    existing.note = update.note.clone();
                }
                None => next.push(BookmarkMetadata {
                    id: id.clone(),
                    event_id: event_id.clone(),
                    collection_id: update.collection_id.clone(),
                    tags: update.tags.clone(),
                    note: update.note.clone(),
                    added_at: *added_at,
                }),
            },
            StateOp::RemoveMetadata { event_id } => next.retain(|m| &m.event_id != event_id),
            StateOp::DetachCollection { collection_id } => {
                for m in next
                    .iter_mut()
                    .filter(|m| m.collection_id.as_ref() == Some(collection_id))
                {
                    m.collection_id = None;
                }
            }
            other => return Err(mismatch::<Self>(other)),
        }
        Ok(next)
    }

    fn into_value(items: Vec<BookmarkMetadata>) -> StateValue {
        StateValue::BookmarkMetadata(items)
    }

    fn from_value(value: StateValue) -> Option<Vec<BookmarkMetadata>> {
        match value {
            StateValue::BookmarkMetadata(items) => Some(items),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use relaymark_protocol::{CollectionUpdate, MetadataUpdate};

    fn add(id: &str) -> StateOp {
        StateOp::AddBookmark {
            event_id: id.into(),
        }
    }

    fn remove(id: &str) -> StateOp {
        StateOp::RemoveBookmark {
            event_id: id.into(),
        }
    }

    fn collection(id: &str, name: &str) -> BookmarkCollection {
        BookmarkCollection {
            id: id.into(),
            name: name.into(),
            color: None,
            description: None,
            created_at: 1,
        }
    }

    fn tag_update(collection_id: Option<&str>, tags: &[&str]) -> MetadataUpdate {
        MetadataUpdate {
            collection_id: collection_id.map(String::from),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            note: None,
        }
    }

    fn update_metadata(event_id: &str, update: MetadataUpdate) -> StateOp {
        StateOp::UpdateMetadata {
            event_id: event_id.into(),
            id: format!("m-{event_id}"),
            added_at: 10,
            update,
        }
    }

    #[test]
    fn bookmark_list_set_semantics() {
        let list = BookmarkListAdapter::apply(&[], &add("evt1")).unwrap();
        assert_eq!(list, vec!["evt1"]);
        assert_eq!(BookmarkListAdapter::apply(&list, &add("evt1")).unwrap(), list);

        let list = BookmarkListAdapter::apply(&list, &add("evt2")).unwrap();
        assert_eq!(list, vec!["evt1", "evt2"]);
        assert_eq!(BookmarkListAdapter::apply(&list, &remove("evt1")).unwrap(), vec!["evt2"]);
        assert_eq!(BookmarkListAdapter::apply(&list, &remove("nope")).unwrap(), list);
    }

    #[test]
    fn ops_of_other_kinds_are_rejected() {
        let err = BookmarkListAdapter::apply(&[], &StateOp::DeleteCollection { id: "c".into() })
            .unwrap_err();
        assert_eq!(
            err,
            SyncError::KindMismatch {
                op: "deleteCollection",
                kind: "bookmark-list",
            }
        );
        assert!(CollectionsAdapter::apply(&[], &add("evt1")).is_err());
        assert!(MetadataAdapter::apply(&[], &add("evt1")).is_err());
    }

    #[test]
    fn colliding_collection_id_is_a_noop() {
        let current = vec![collection("c1", "Favorites")];
        let next = CollectionsAdapter::apply(
            &current,
            &StateOp::CreateCollection(collection("c1", "Other")),
        )
        .unwrap();
        assert_eq!(next, current);
    }

    #[test]
    fn collection_update_and_delete() {
        let current = vec![collection("c1", "Favorites"), collection("c2", "Later")];
        let next = CollectionsAdapter::apply(
            &current,
            &StateOp::UpdateCollection {
                id: "c2".into(),
                update: CollectionUpdate {
                    name: "Read later".into(),
                    color: Some("#0af".into()),
                    description: None,
                },
            },
        )
        .unwrap();
        assert_eq!(next[1].name, "Read later");
        assert_eq!(next[1].color.as_deref(), Some("#0af"));
        assert_eq!(next[1].created_at, 1);

        let missing = CollectionsAdapter::apply(
            &current,
            &StateOp::UpdateCollection {
                id: "c9".into(),
                update: CollectionUpdate {
                    name: "x".into(),
                    color: None,
                    description: None,
                },
            },
        )
        .unwrap();
        assert_eq!(missing, current);

        let next = CollectionsAdapter::apply(&next, &StateOp::DeleteCollection { id: "c1".into() })
            .unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].id, "c2");
    }

    #[test]
    fn metadata_upsert_keeps_identity() {
        let first =
            MetadataAdapter::apply(&[], &update_metadata("evt1", tag_update(Some("c1"), &["rust"])))
                .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, "m-evt1");

        let second = MetadataAdapter::apply(
            &first,
            &StateOp::UpdateMetadata {
                event_id: "evt1".into(),
                id: "other-id".into(),
                added_at: 99,
                update: tag_update(None, &["async"]),
            },
        )
        .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, "m-evt1");
        assert_eq!(second[0].added_at, 10);
        assert_eq!(second[0].tags, vec!["async"]);
        assert_eq!(second[0].collection_id, None);
    }

    #[test]
    fn detach_clears_only_matching_collection() {
        let mut items =
            MetadataAdapter::apply(&[], &update_metadata("evt1", tag_update(Some("c1"), &[]))).unwrap();
        items = MetadataAdapter::apply(&items, &update_metadata("evt2", tag_update(Some("c2"), &[])))
            .unwrap();

        let next = MetadataAdapter::apply(
            &items,
            &StateOp::DetachCollection {
                collection_id: "c1".into(),
            },
        )
        .unwrap();
        assert_eq!(next[0].collection_id, None);
        assert_eq!(next[1].collection_id.as_deref(), Some("c2"));
    }

    #[test]
    fn values_round_trip_through_cache_wrapper() {
        let items = vec!["evt1".to_string()];
        let value = BookmarkListAdapter::into_value(items.clone());
        assert_eq!(value.kind(), BookmarkListAdapter::KIND);
        assert_eq!(BookmarkListAdapter::from_value(value.clone()), Some(items));
        assert_eq!(CollectionsAdapter::from_value(value), None);
    }

    fn event_id() -> impl Strategy<Value = String> {
        "[a-f0-9]{1,4}"
    }

    fn list_op() -> impl Strategy<Value = StateOp> {
        prop_oneof![event_id().prop_map(|id| add(&id)), event_id().prop_map(|id| remove(&id))]
    }

    proptest! {
        #[test]
        fn list_stays_unique(ops in prop::collection::vec(list_op(), 0..40)) {
            let mut list = Vec::new();
            for op in &ops {
                list = BookmarkListAdapter::apply(&list, op).unwrap();
            }
            let mut deduped = list.clone();
            deduped.sort();
            deduped.dedup();
            prop_assert_eq!(deduped.len(), list.len());
        }

        #[test]
        fn add_is_idempotent(ops in prop::collection::vec(list_op(), 0..20), id in event_id()) {
            let mut list = Vec::new();
            for op in &ops {
                list = BookmarkListAdapter::apply(&list, op).unwrap();
            }
            let once = BookmarkListAdapter::apply(&list, &add(&id)).unwrap();
            let twice = BookmarkListAdapter::apply(&once, &add(&id)).unwrap();
            prop_assert_eq!(&once, &twice);
            prop_assert!(once.contains(&id));
        }

        #[test]
        fn remove_of_absent_is_noop(ids in prop::collection::vec(event_id(), 0..20)) {
            let mut list = Vec::new();
            for id in &ids {
                list = BookmarkListAdapter::apply(&list, &add(id)).unwrap();
            }
            let next = BookmarkListAdapter::apply(&list, &remove("absent")).unwrap();
            prop_assert_eq!(next, list);
        }

        #[test]
        fn add_then_remove_drops_the_id(ids in prop::collection::vec(event_id(), 0..20), id in event_id()) {
            let mut list = Vec::new();
            for existing in &ids {
                list = BookmarkListAdapter::apply(&list, &add(existing)).unwrap();
            }
            let added = BookmarkListAdapter::apply(&list, &add(&id)).unwrap();
            let removed = BookmarkListAdapter::apply(&added, &remove(&id)).unwrap();
            prop_assert!(!removed.contains(&id));
            let expected: Vec<String> = list.into_iter().filter(|e| e != &id).collect();
            prop_assert_eq!(removed, expected);
        }
    }
}
