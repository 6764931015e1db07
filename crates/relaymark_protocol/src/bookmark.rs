//! Bookmark documents.

use crate::owner::StateKind;
use serde::{Deserialize, Serialize};

/// A user-defined group of bookmarks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkCollection {
    /// Collection id, unique within the owner's collections.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Optional `#rgb` / `#rrggbb` color.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Creation time (seconds since the Unix epoch).
    pub created_at: u64,
}

/// Editable fields of a collection; applied as a full replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionUpdate {
    /// New display name.
    pub name: String,
    /// New color.
    pub color: Option<String>,
    /// New description.
    pub description: Option<String>,
}

/// Metadata attached to one bookmarked event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkMetadata {
    /// Metadata record id.
    pub id: String,
    /// The bookmarked event; at most one metadata record per event.
    pub event_id: String,
    /// Collection the bookmark is filed under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<String>,
    /// Free-form tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Free-form note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// When the metadata was first attached (seconds since the Unix epoch).
    pub added_at: u64,
}

/// Editable fields of a metadata record; applied as a full replacement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataUpdate {
    /// Collection to file the bookmark under.
    pub collection_id: Option<String>,
    /// Tags.
    pub tags: Vec<String>,
    /// Note.
    pub note: Option<String>,
}

/// A decoded document of any kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateValue {
    /// Bookmarked event ids, in insertion order.
    BookmarkList(Vec<String>),
    /// Collections.
    BookmarkCollections(Vec<BookmarkCollection>),
    /// Metadata records.
    BookmarkMetadata(Vec<BookmarkMetadata>),
}

impl StateValue {
    /// Returns the empty document of `kind`.
    pub fn empty(kind: StateKind) -> Self {
        match kind {
            StateKind::BookmarkList => StateValue::BookmarkList(Vec::new()),
            StateKind::BookmarkCollections => StateValue::BookmarkCollections(Vec::new()),
            StateKind::BookmarkMetadata => StateValue::BookmarkMetadata(Vec::new()),
        }
    }

    /// Returns the kind of this document.
    pub fn kind(&self) -> StateKind {
        match self {
            StateValue::BookmarkList(_) => StateKind::BookmarkList,
            StateValue::BookmarkCollections(_) => StateKind::BookmarkCollections,
            StateValue::BookmarkMetadata(_) => StateKind::BookmarkMetadata,
        }
    }

    /// Returns the number of items in the document.
    pub fn len(&self) -> usize {
        match self {
            StateValue::BookmarkList(items) => items.len(),
            StateValue::BookmarkCollections(items) => items.len(),
            StateValue::BookmarkMetadata(items) => items.len(),
        }
    }

    /// Returns true if the document has no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_values_match_kind() {
        for kind in StateKind::ALL {
            let value = StateValue::empty(kind);
            assert_eq!(value.kind(), kind);
            assert!(value.is_empty());
        }
    }

    #[test]
    fn collection_json_shape() {
        let c = BookmarkCollection {
            id: "c1".into(),
            name: "Favorites".into(),
            color: Some("#fff".into()),
            description: None,
            created_at: 10,
        };
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(
            json,
            r##"{"id":"c1","name":"Favorites","color":"#fff","createdAt":10}"##
        );
    }

    #[test]
    fn metadata_optional_fields_default() {
        let m: BookmarkMetadata =
            serde_json::from_str(r#"{"id":"m1","eventId":"e1","addedAt":5}"#).unwrap();
        assert_eq!(m.collection_id, None);
        assert!(m.tags.is_empty());
        assert_eq!(m.note, None);
    }
}
