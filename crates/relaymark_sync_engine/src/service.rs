//! The bookmark API exposed to the UI.
//!
//! [`BookmarkService`] validates input, resolves the signed-in owner and
//! routes each call to the engine of the document it touches. Expected
//! conditions (offline, not found) are never errors.

use crate::adapter::{BookmarkListAdapter, CollectionsAdapter, MetadataAdapter};
use crate::config::SyncConfig;
use crate::connectivity::Connectivity;
use crate::engine::{SyncContext, SyncEngine, SyncStats};
use crate::error::{SyncError, SyncResult};
use crate::events::SyncEvent;
use crate::gateway::RelayGateway;
use crate::queue::DrainReport;
use parking_lot::RwLock;
use relaymark_protocol::{
    unix_now, validate_collection_id, validate_color, validate_event_id, validate_name,
    validate_note, validate_tags, BookmarkCollection, BookmarkMetadata, CollectionUpdate,
    MetadataUpdate, OwnerKey, QueuedOperation, StateKind, StateOp,
};
use relaymark_storage::KvStore;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bookmark state of the signed-in user, synchronized with the relays.
#[derive(Debug)]
pub struct BookmarkService {
    ctx: Arc<SyncContext>,
    bookmarks: SyncEngine<BookmarkListAdapter>,
    collections: SyncEngine<CollectionsAdapter>,
    metadata: SyncEngine<MetadataAdapter>,
    session: RwLock<Option<OwnerKey>>,
}

impl BookmarkService {
    /// Creates a service. The cache and the offline queue persist into
    /// `store`.
    pub fn new(
        gateway: Arc<dyn RelayGateway>,
        store: Arc<dyn KvStore>,
        connectivity: Connectivity,
        config: SyncConfig,
    ) -> Self {
        let ctx = Arc::new(SyncContext::new(gateway, store, connectivity, config));
        Self {
            bookmarks: SyncEngine::new(Arc::clone(&ctx)),
            collections: SyncEngine::new(Arc::clone(&ctx)),
            metadata: SyncEngine::new(Arc::clone(&ctx)),
            session: RwLock::new(None),
            ctx,
        }
    }

    /// Returns the shared engine context.
    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    /// Returns the bookmark list engine.
    pub fn bookmark_engine(&self) -> &SyncEngine<BookmarkListAdapter> {
        &self.bookmarks
    }

    /// Returns the collections engine.
    pub fn collection_engine(&self) -> &SyncEngine<CollectionsAdapter> {
        &self.collections
    }

    /// Returns the metadata engine.
    pub fn metadata_engine(&self) -> &SyncEngine<MetadataAdapter> {
        &self.metadata
    }

    // ---------------------------------------------------------------------
    // Session
    // ---------------------------------------------------------------------

    /// Makes `owner` the signed-in user.
    pub fn sign_in(&self, owner: OwnerKey) {
        info!(%owner, "signed in");
        *self.session.write() = Some(owner);
    }

    /// Signs out and evicts the owner's cached documents. Queued
    /// operations are kept and replay on the next sign-in.
    pub fn sign_out(&self) {
        if let Some(owner) = self.session.write().take() {
            self.ctx.cache().invalidate(&owner, None);
            info!(%owner, "signed out");
        }
    }

    /// Returns the signed-in owner.
    pub fn current_owner(&self) -> Option<OwnerKey> {
        self.session.read().clone()
    }

    fn owner(&self) -> SyncResult<OwnerKey> {
        self.current_owner().ok_or(SyncError::NotAuthenticated)
    }

    // ---------------------------------------------------------------------
    // Bookmark list
    // ---------------------------------------------------------------------

    /// Bookmarks an event. Bookmarking it again is a no-op.
    pub async fn add_bookmark(&self, event_id: &str) -> SyncResult<()> {
        validate_event_id(event_id)?;
        self.mutate(StateOp::AddBookmark {
            event_id: event_id.to_string(),
        })
        .await
    }

    /// Removes a bookmark. Removing an absent bookmark is a no-op.
    pub async fn remove_bookmark(&self, event_id: &str) -> SyncResult<()> {
        validate_event_id(event_id)?;
        self.mutate(StateOp::RemoveBookmark {
            event_id: event_id.to_string(),
        })
        .await
    }

    /// Returns the bookmarked event ids in insertion order.
    pub async fn get_bookmarks(&self) -> SyncResult<Vec<String>> {
        let owner = self.owner()?;
        self.bookmarks.read(&owner).await
    }

    /// Returns true if the event is bookmarked.
    pub async fn is_bookmarked(&self, event_id: &str) -> SyncResult<bool> {
        validate_event_id(event_id)?;
        let owner = self.owner()?;
        self.bookmarks.contains(&owner, event_id).await
    }

    // ---------------------------------------------------------------------
    // Collections
    // ---------------------------------------------------------------------

    /// Creates a collection with a fresh id and returns it.
    pub async fn create_collection(
        &self,
        name: &str,
        color: Option<&str>,
        description: Option<&str>,
    ) -> SyncResult<BookmarkCollection> {
        validate_name(name)?;
        if let Some(color) = color {
            validate_color(color)?;
        }
        let collection = BookmarkCollection {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            color: color.map(String::from),
            description: description.map(String::from),
            created_at: unix_now(),
        };
        self.mutate(StateOp::CreateCollection(collection.clone()))
            .await?;
        Ok(collection)
    }

    /// Replaces the editable fields of a collection. Unknown ids are a
    /// no-op.
    pub async fn update_collection(&self, id: &str, update: CollectionUpdate) -> SyncResult<()> {
        validate_collection_id(id)?;
        validate_name(&update.name)?;
        if let Some(color) = &update.color {
            validate_color(color)?;
        }
        let update = CollectionUpdate {
            name: update.name.trim().to_string(),
            ..update
        };
        self.mutate(StateOp::UpdateCollection {
            id: id.to_string(),
            update,
        })
        .await
    }

    /// Deletes a collection and detaches every bookmark filed under it.
    pub async fn delete_collection(&self, id: &str) -> SyncResult<()> {
        validate_collection_id(id)?;
        self.mutate(StateOp::DeleteCollection { id: id.to_string() })
            .await?;
        self.mutate(StateOp::DetachCollection {
            collection_id: id.to_string(),
        })
        .await
    }

    /// Returns the collections.
    pub async fn get_collections(&self) -> SyncResult<Vec<BookmarkCollection>> {
        let owner = self.owner()?;
        self.collections.read(&owner).await
    }

    // ---------------------------------------------------------------------
    // Metadata
    // ---------------------------------------------------------------------

    /// Returns the metadata of one bookmarked event.
    pub async fn get_bookmark_metadata(&self, event_id: &str) -> SyncResult<Option<BookmarkMetadata>> {
        validate_event_id(event_id)?;
        let owner = self.owner()?;
        Ok(self
            .metadata
            .read(&owner)
            .await?
            .into_iter()
            .find(|m| m.event_id == event_id))
    }

    /// Returns every metadata record.
    pub async fn get_all_bookmark_metadata(&self) -> SyncResult<Vec<BookmarkMetadata>> {
        let owner = self.owner()?;
        self.metadata.read(&owner).await
    }

    /// Creates or replaces the metadata of one event.
    pub async fn update_bookmark_metadata(
        &self,
        event_id: &str,
        update: MetadataUpdate,
    ) -> SyncResult<()> {
        validate_event_id(event_id)?;
        if let Some(collection_id) = &update.collection_id {
            validate_collection_id(collection_id)?;
        }
        validate_tags(&update.tags)?;
        if let Some(note) = &update.note {
            validate_note(note)?;
        }
        self.mutate(StateOp::UpdateMetadata {
            event_id: event_id.to_string(),
            id: Uuid::new_v4().to_string(),
            added_at: unix_now(),
            update,
        })
        .await
    }

    /// Removes the metadata of one event. Absent metadata is a no-op.
    pub async fn remove_bookmark_metadata(&self, event_id: &str) -> SyncResult<()> {
        validate_event_id(event_id)?;
        self.mutate(StateOp::RemoveMetadata {
            event_id: event_id.to_string(),
        })
        .await
    }

    /// Returns the event ids filed under a collection.
    pub async fn get_bookmarks_in_collection(&self, collection_id: &str) -> SyncResult<Vec<String>> {
        validate_collection_id(collection_id)?;
        let owner = self.owner()?;
        Ok(self
            .metadata
            .read(&owner)
            .await?
            .into_iter()
            .filter(|m| m.collection_id.as_deref() == Some(collection_id))
            .map(|m| m.event_id)
            .collect())
    }

    // ---------------------------------------------------------------------
    // Sync
    // ---------------------------------------------------------------------

    /// Replays the signed-in owner's offline queue.
    ///
    /// Without a reachable relay nothing is replayed and the report lists
    /// the queue as remaining.
    pub async fn process_pending_operations(&self) -> SyncResult<DrainReport> {
        let owner = self.owner()?;
        if !self.ctx.is_reachable() {
            debug!(%owner, "offline, leaving queue in place");
            return Ok(DrainReport {
                remaining: self.ctx.queue().len(&owner),
                ..DrainReport::default()
            });
        }
        Ok(self.drain(&owner).await)
    }

    /// Drops every cached document of the signed-in owner and fetches them
    /// again.
    pub async fn refresh(&self) -> SyncResult<()> {
        let owner = self.owner()?;
        self.bookmarks.refresh(&owner).await?;
        self.collections.refresh(&owner).await?;
        self.metadata.refresh(&owner).await?;
        Ok(())
    }

    /// Returns a receiver of sync outcomes.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.ctx.events().subscribe()
    }

    /// Returns the connectivity signal.
    pub fn connectivity(&self) -> &Connectivity {
        self.ctx.connectivity()
    }

    /// Returns the engine counters.
    pub fn stats(&self) -> SyncStats {
        self.ctx.stats()
    }

    /// Spawns a task that drains the signed-in owner's queue on every
    /// offline to online transition.
    ///
    /// The task ends once the service is dropped and the signal changes
    /// again, or when the signal is closed.
    pub fn spawn_connectivity_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let service: Weak<Self> = Arc::downgrade(self);
        let mut rx = self.ctx.connectivity().subscribe();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                let Some(service) = service.upgrade() else {
                    break;
                };
                if !online {
                    debug!("connectivity lost");
                    continue;
                }
                let Some(owner) = service.current_owner() else {
                    continue;
                };
                let report = service.drain(&owner).await;
                info!(
                    %owner,
                    replayed = report.replayed,
                    remaining = report.remaining,
                    "connectivity restored, drained offline queue"
                );
            }
        })
    }

    async fn mutate(&self, op: StateOp) -> SyncResult<()> {
        let owner = self.owner()?;
        if self.ctx.is_reachable() && self.ctx.queue().len(&owner) > 0 {
            self.drain(&owner).await;
        }
        match op.state_kind() {
            StateKind::BookmarkList => self.bookmarks.apply(&owner, op).await,
            StateKind::BookmarkCollections => self.collections.apply(&owner, op).await,
            StateKind::BookmarkMetadata => self.metadata.apply(&owner, op).await,
        }
    }

    async fn drain(&self, owner: &OwnerKey) -> DrainReport {
        let this = self;
        let report = self
            .ctx
            .queue()
            .drain(owner, move |queued| async move { this.replay(&queued).await })
            .await;

        if let Some(failed) = &report.newly_failed {
            let error = failed.last_error.clone().unwrap_or_default();
            warn!(%owner, id = %failed.id, op = failed.op.name(), %error, "queued operation failed permanently");
            self.ctx
                .cache()
                .invalidate(owner, Some(failed.state_kind()));
            self.ctx.events().emit(SyncEvent::OperationFailed {
                owner: owner.clone(),
                id: failed.id,
                error,
            });
        }
        report
    }

    async fn replay(&self, queued: &QueuedOperation) -> SyncResult<()> {
        match queued.state_kind() {
            StateKind::BookmarkList => self.bookmarks.replay(queued).await,
            StateKind::BookmarkCollections => self.collections.replay(queued).await,
            StateKind::BookmarkMetadata => self.metadata.replay(queued).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockGateway;
    use relaymark_storage::InMemoryKvStore;

    fn service() -> BookmarkService {
        BookmarkService::new(
            Arc::new(MockGateway::new()),
            Arc::new(InMemoryKvStore::new()),
            Connectivity::new(true),
            SyncConfig::default(),
        )
    }

    #[tokio::test]
    async fn calls_without_session_are_rejected() {
        let service = service();
        assert_eq!(service.get_bookmarks().await, Err(SyncError::NotAuthenticated));
        assert_eq!(
            service.add_bookmark("evt1").await,
            Err(SyncError::NotAuthenticated)
        );
        assert_eq!(
            service.process_pending_operations().await,
            Err(SyncError::NotAuthenticated)
        );
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_the_session_check() {
        let service = service();
        assert!(matches!(
            service.add_bookmark("").await,
            Err(SyncError::InvalidInput(_))
        ));
        assert!(matches!(
            service.create_collection("  ", None, None).await,
            Err(SyncError::InvalidInput(_))
        ));
        assert!(matches!(
            service.create_collection("Favorites", Some("red"), None).await,
            Err(SyncError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn sign_out_evicts_cache() {
        let service = service();
        let alice = OwnerKey::parse("alice").unwrap();
        service.sign_in(alice.clone());
        service.add_bookmark("evt1").await.unwrap();
        assert_eq!(service.context().cache().memory_len(), 1);

        service.sign_out();
        assert_eq!(service.current_owner(), None);
        assert_eq!(service.context().cache().memory_len(), 0);
        assert!(service.context().cache().persisted(Some(&alice)).unwrap().is_empty());
    }
}
