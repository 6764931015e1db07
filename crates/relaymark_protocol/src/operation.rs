//! Mutations and the offline queue record.

use crate::bookmark::{BookmarkCollection, CollectionUpdate, MetadataUpdate};
use crate::owner::{OwnerKey, StateKind};
use crate::record::unix_now;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A mutation of one replaceable document.
///
/// Operations describe intent, not a resulting snapshot: replaying an
/// operation recomputes the document from whatever state is current at
/// replay time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateOp {
    /// Append an event id to the bookmark list (no-op if present).
    AddBookmark {
        /// Event id.
        event_id: String,
    },
    /// Remove an event id from the bookmark list (no-op if absent).
    RemoveBookmark {
        /// Event id.
        event_id: String,
    },
    /// Insert a collection (no-op if the id already exists).
    CreateCollection(BookmarkCollection),
    /// Replace the editable fields of an existing collection.
    UpdateCollection {
        /// Collection id.
        id: String,
        /// New field values.
        update: CollectionUpdate,
    },
    /// Remove a collection (no-op if absent).
    DeleteCollection {
        /// Collection id.
        id: String,
    },
    /// Create or replace the metadata of one event.
    UpdateMetadata {
        /// Event id the metadata belongs to.
        event_id: String,
        /// Id to use if no record exists yet.
        id: String,
        /// Timestamp to use if no record exists yet.
        added_at: u64,
        /// New field values.
        update: MetadataUpdate,
    },
    /// Remove the metadata of one event (no-op if absent).
    RemoveMetadata {
        /// Event id.
        event_id: String,
    },
    /// Clear `collection_id` on every metadata record filed under a collection.
    DetachCollection {
        /// Collection id.
        collection_id: String,
    },
}

impl StateOp {
    /// Returns the document this operation mutates.
    pub fn state_kind(&self) -> StateKind {
        match self {
            StateOp::AddBookmark { .. } | StateOp::RemoveBookmark { .. } => {
                StateKind::BookmarkList
            }
            StateOp::CreateCollection(_)
            | StateOp::UpdateCollection { .. }
            | StateOp::DeleteCollection { .. } => StateKind::BookmarkCollections,
            StateOp::UpdateMetadata { .. }
            | StateOp::RemoveMetadata { .. }
            | StateOp::DetachCollection { .. } => StateKind::BookmarkMetadata,
        }
    }

    /// Returns a short operation name for logs and listings.
    pub fn name(&self) -> &'static str {
        match self {
            StateOp::AddBookmark { .. } => "add",
            StateOp::RemoveBookmark { .. } => "remove",
            StateOp::CreateCollection(_) => "createCollection",
            StateOp::UpdateCollection { .. } => "updateCollection",
            StateOp::DeleteCollection { .. } => "deleteCollection",
            StateOp::UpdateMetadata { .. } => "updateMetadata",
            StateOp::RemoveMetadata { .. } => "removeMetadata",
            StateOp::DetachCollection { .. } => "detachCollection",
        }
    }
}

/// Replay status of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    /// Waiting to be replayed.
    Pending,
    /// Exceeded its retry budget; blocks the owner's queue until an
    /// operator discards or re-arms it.
    Failed,
}

/// A mutation made while offline, waiting to be published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// Unique id.
    pub id: Uuid,
    /// Owner whose document the operation mutates.
    pub owner: OwnerKey,
    /// The mutation.
    pub op: StateOp,
    /// Enqueue time (seconds since the Unix epoch).
    pub enqueued_at: u64,
    /// Number of failed replay attempts.
    pub retry_count: u32,
    /// Replay status.
    pub status: OperationStatus,
    /// Message of the most recent replay failure.
    pub last_error: Option<String>,
}

impl QueuedOperation {
    /// Creates a pending operation stamped with the current time.
    pub fn new(owner: OwnerKey, op: StateOp) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            op,
            enqueued_at: unix_now(),
            retry_count: 0,
            status: OperationStatus::Pending,
            last_error: None,
        }
    }

    /// Returns the document this operation mutates.
    pub fn state_kind(&self) -> StateKind {
        self.op.state_kind()
    }

    /// Returns true if the operation hit its retry budget.
    pub fn is_failed(&self) -> bool {
        self.status == OperationStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ops_map_to_kinds() {
        let add = StateOp::AddBookmark {
            event_id: "e".into(),
        };
        assert_eq!(add.state_kind(), StateKind::BookmarkList);
        assert_eq!(add.name(), "add");

        let delete = StateOp::DeleteCollection { id: "c".into() };
        assert_eq!(delete.state_kind(), StateKind::BookmarkCollections);

        let detach = StateOp::DetachCollection {
            collection_id: "c".into(),
        };
        assert_eq!(detach.state_kind(), StateKind::BookmarkMetadata);
    }

    #[test]
    fn new_queued_operation_is_pending() {
        let owner = OwnerKey::parse("alice").unwrap();
        let op = QueuedOperation::new(
            owner.clone(),
            StateOp::RemoveBookmark {
                event_id: "e".into(),
            },
        );
        assert_eq!(op.owner, owner);
        assert_eq!(op.retry_count, 0);
        assert!(!op.is_failed());
        assert_eq!(op.state_kind(), StateKind::BookmarkList);
    }
}
