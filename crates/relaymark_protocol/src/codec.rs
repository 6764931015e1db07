//! Conversions between relay records and documents.
//!
//! - Bookmark list: one `["e", <event id>]` tag per bookmark, empty content
//! - Collections / metadata: a JSON array in the content, addressed by a `d` tag
//!
//! Decoders are strict about the record shape (kind, `d` tag, JSON syntax)
//! but lenient about duplicates: the first occurrence of an id wins.

use crate::bookmark::{BookmarkCollection, BookmarkMetadata};
use crate::error::{ProtocolError, ProtocolResult};
use crate::owner::{OwnerKey, StateKind};
use crate::record::{Record, RecordDraft};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;

fn check_shape(kind: StateKind, record: &Record) -> ProtocolResult<()> {
    if record.kind != kind.event_kind() {
        return Err(ProtocolError::Decode(format!(
            "expected kind {} for {kind}, got {}",
            kind.event_kind(),
            record.kind
        )));
    }
    if let Some(expected) = kind.identifier() {
        if record.identifier() != Some(expected) {
            return Err(ProtocolError::Decode(format!(
                "expected d tag {expected:?}, got {:?}",
                record.identifier()
            )));
        }
    }
    Ok(())
}

fn draft(owner: &OwnerKey, kind: StateKind, created_at: u64) -> RecordDraft {
    let draft = RecordDraft::new(owner.clone(), kind.event_kind(), created_at);
    match kind.identifier() {
        Some(d) => draft.with_tag(["d", d]),
        None => draft,
    }
}

fn decode_json_items<T, F>(kind: StateKind, record: &Record, key: F) -> ProtocolResult<Vec<T>>
where
    T: DeserializeOwned,
    F: Fn(&T) -> &str,
{
    check_shape(kind, record)?;
    if record.content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let items: Vec<T> = serde_json::from_str(&record.content)
        .map_err(|e| ProtocolError::Decode(format!("{kind} content: {e}")))?;

    let mut seen = HashSet::new();
    Ok(items
        .into_iter()
        .filter(|item| seen.insert(key(item).to_string()))
        .collect())
}

fn encode_json_items<T: Serialize>(
    owner: &OwnerKey,
    kind: StateKind,
    items: &[T],
    created_at: u64,
) -> ProtocolResult<RecordDraft> {
    let content = serde_json::to_string(items)
        .map_err(|e| ProtocolError::Encode(format!("{kind} content: {e}")))?;
    Ok(draft(owner, kind, created_at).with_content(content))
}

/// Decodes a bookmark list record into its event ids.
pub fn decode_bookmark_list(record: &Record) -> ProtocolResult<Vec<String>> {
    check_shape(StateKind::BookmarkList, record)?;
    let mut seen = HashSet::new();
    Ok(record
        .tag_values("e")
        .filter(|id| seen.insert(*id))
        .map(String::from)
        .collect())
}

/// Encodes event ids as a bookmark list record.
pub fn encode_bookmark_list(owner: &OwnerKey, event_ids: &[String], created_at: u64) -> RecordDraft {
    event_ids
        .iter()
        .fold(draft(owner, StateKind::BookmarkList, created_at), |d, id| {
            d.with_tag(["e", id.as_str()])
        })
}

/// Decodes a collections record.
pub fn decode_collections(record: &Record) -> ProtocolResult<Vec<BookmarkCollection>> {
    decode_json_items(StateKind::BookmarkCollections, record, |c: &BookmarkCollection| {
        c.id.as_str()
    })
}

/// Encodes collections as a record.
pub fn encode_collections(
    owner: &OwnerKey,
    collections: &[BookmarkCollection],
    created_at: u64,
) -> ProtocolResult<RecordDraft> {
    encode_json_items(owner, StateKind::BookmarkCollections, collections, created_at)
}

/// Decodes a metadata record.
pub fn decode_metadata(record: &Record) -> ProtocolResult<Vec<BookmarkMetadata>> {
    decode_json_items(StateKind::BookmarkMetadata, record, |m: &BookmarkMetadata| {
        m.event_id.as_str()
    })
}

/// Encodes metadata as a record.
pub fn encode_metadata(
    owner: &OwnerKey,
    metadata: &[BookmarkMetadata],
    created_at: u64,
) -> ProtocolResult<RecordDraft> {
    encode_json_items(owner, StateKind::BookmarkMetadata, metadata, created_at)
}
