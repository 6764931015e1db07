//! Generic replaceable-document engine.
//!
//! One [`SyncEngine`] per [`StateKindAdapter`] drives the document state
//! machine for every owner:
//!
//! ```text
//! Unloaded --read--> Fetching --ok--> Loaded(confirmed)
//!                        \--error--> Unloaded
//! Loaded --mutation, online--> Publishing --ok--> Loaded(confirmed)
//!                                  \--exhausted--> rolled back
//! Loaded --mutation, offline--> Loaded(optimistic) + queued
//! ```
//!
//! A document first touched while offline starts from an empty "offline
//! seed". Before the first queued operation of such a document is replayed,
//! the relays' copy is fetched and every queued operation of the document is
//! re-applied on top of it, so replay never overwrites state it has not seen.
//!
//! Mutations of one document are serialized; reads are deduplicated but not
//! serialized against writes.

use crate::adapter::StateKindAdapter;
use crate::cache::{CacheEntry, DocumentKey, StateCache};
use crate::config::SyncConfig;
use crate::connectivity::Connectivity;
use crate::dedup::FetchDeduplicator;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, SyncEvent};
use crate::gateway::RelayGateway;
use crate::queue::OfflineQueue;
use crate::retry::RetryExecutor;
use parking_lot::Mutex;
use relaymark_protocol::{unix_now, OwnerKey, QueuedOperation, Record, StateOp};
use relaymark_storage::KvStore;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Observable state of one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    /// Nothing cached and no fetch in flight.
    Unloaded,
    /// A fetch is in flight.
    Fetching,
    /// Cached. `confirmed` is false for optimistic writes.
    Loaded {
        /// Whether the value has been acknowledged by the relays.
        confirmed: bool,
    },
    /// A publish is in flight.
    Publishing,
}

/// Counters over the lifetime of a [`SyncContext`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Network fetches started (deduplicated joins excluded).
    pub fetches: u64,
    /// Successful publishes.
    pub publishes: u64,
    /// Publish attempts retried after a failure.
    pub retries: u64,
    /// Optimistic writes rolled back after publish exhaustion.
    pub rollbacks: u64,
    /// Queued operations replayed.
    pub replayed: u64,
    /// Payloads that failed to decode.
    pub decode_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    fetches: AtomicU64,
    publishes: AtomicU64,
    retries: AtomicU64,
    rollbacks: AtomicU64,
    replayed: AtomicU64,
    decode_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Collaborators shared by the engines of all kinds.
pub struct SyncContext {
    config: SyncConfig,
    gateway: Arc<dyn RelayGateway>,
    cache: StateCache,
    queue: OfflineQueue,
    dedup: FetchDeduplicator<DocumentKey, Option<Record>>,
    retry: RetryExecutor,
    connectivity: Connectivity,
    events: EventBus,
    doc_locks: Mutex<HashMap<DocumentKey, Arc<tokio::sync::Mutex<()>>>>,
    publishing: Mutex<HashSet<DocumentKey>>,
    counters: Counters,
}

impl SyncContext {
    /// Creates a context. The cache and the offline queue share `store`.
    pub fn new(
        gateway: Arc<dyn RelayGateway>,
        store: Arc<dyn KvStore>,
        connectivity: Connectivity,
        config: SyncConfig,
    ) -> Self {
        Self {
            cache: StateCache::new(Arc::clone(&store), config.cache_idle_ttl),
            queue: OfflineQueue::new(store, config.queue_max_retries),
            dedup: FetchDeduplicator::new(config.fetch_timeout),
            retry: RetryExecutor::new(config.retry.clone()),
            events: EventBus::new(config.event_capacity),
            gateway,
            connectivity,
            doc_locks: Mutex::new(HashMap::new()),
            publishing: Mutex::new(HashSet::new()),
            counters: Counters::default(),
            config,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the document cache.
    pub fn cache(&self) -> &StateCache {
        &self.cache
    }

    /// Returns the offline queue.
    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    /// Returns the connectivity signal.
    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Returns the event bus.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> SyncStats {
        let c = &self.counters;
        SyncStats {
            fetches: c.fetches.load(Ordering::Relaxed),
            publishes: c.publishes.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
            rollbacks: c.rollbacks.load(Ordering::Relaxed),
            replayed: c.replayed.load(Ordering::Relaxed),
            decode_failures: c.decode_failures.load(Ordering::Relaxed),
        }
    }

    /// Returns true if the host reports connectivity and the gateway has at
    /// least one connected relay.
    pub fn is_reachable(&self) -> bool {
        self.connectivity.is_online() && !self.gateway.connected_endpoints().is_empty()
    }

    fn doc_lock(&self, key: &DocumentKey) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.doc_locks.lock().entry(key.clone()).or_default())
    }

    /// Relays to publish to: connected relays first, supplemented by the
    /// defaults and the fallback list when fewer than the minimum are
    /// connected.
    async fn select_relays(&self) -> Vec<String> {
        let mut relays = self.gateway.connected_endpoints();
        if relays.len() >= self.config.min_publish_relays {
            return relays;
        }

        let connected = self.gateway.connect_to_defaults().await;
        for relay in connected
            .into_iter()
            .chain(self.config.fallback_relays.iter().cloned())
        {
            if !relays.contains(&relay) {
                relays.push(relay);
            }
        }
        debug!(count = relays.len(), "supplemented publish relays");
        relays
    }
}

impl fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncContext")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("queue", &self.queue)
            .field("dedup", &self.dedup)
            .finish()
    }
}

struct PublishingGuard<'a> {
    set: &'a Mutex<HashSet<DocumentKey>>,
    key: DocumentKey,
}

impl<'a> PublishingGuard<'a> {
    fn new(set: &'a Mutex<HashSet<DocumentKey>>, key: &DocumentKey) -> Self {
        set.lock().insert(key.clone());
        Self {
            set,
            key: key.clone(),
        }
    }
}

impl Drop for PublishingGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}

/// Document engine for one state kind.
pub struct SyncEngine<A: StateKindAdapter> {
    ctx: Arc<SyncContext>,
    _adapter: PhantomData<fn() -> A>,
}

impl<A: StateKindAdapter> SyncEngine<A> {
    /// Creates an engine over a shared context.
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self {
            ctx,
            _adapter: PhantomData,
        }
    }

    fn key(owner: &OwnerKey) -> DocumentKey {
        DocumentKey::new(owner.clone(), A::KIND)
    }

    fn items(entry: CacheEntry) -> Vec<A::Item> {
        A::from_value(entry.value).unwrap_or_default()
    }

    /// Returns where the owner's document is in its lifecycle.
    pub fn state(&self, owner: &OwnerKey) -> DocumentState {
        let key = Self::key(owner);
        if self.ctx.publishing.lock().contains(&key) {
            return DocumentState::Publishing;
        }
        if self.ctx.dedup.is_in_flight(&key) {
            return DocumentState::Fetching;
        }
        match self.ctx.cache.get(&key) {
            Some(entry) => DocumentState::Loaded {
                confirmed: entry.confirmed,
            },
            None => DocumentState::Unloaded,
        }
    }

    /// Returns the owner's document, cache first.
    ///
    /// Without a reachable relay the cached value is returned whether
    /// confirmed or not, or an empty document if nothing is cached.
    ///
    /// # Errors
    ///
    /// Returns the fetch error (e.g. [`SyncError::Timeout`]) on a cache miss
    /// whose fetch fails. Undecodable payloads are not errors: they are
    /// logged and read as an empty document.
    pub async fn read(&self, owner: &OwnerKey) -> SyncResult<Vec<A::Item>> {
        Ok(Self::items(self.load(owner).await?))
    }

    /// Returns true if the owner's document has an item keyed `item_key`.
    pub async fn contains(&self, owner: &OwnerKey, item_key: &str) -> SyncResult<bool> {
        Ok(self
            .read(owner)
            .await?
            .iter()
            .any(|item| A::key(item) == item_key))
    }

    /// Drops the cached document and fetches it again.
    pub async fn refresh(&self, owner: &OwnerKey) -> SyncResult<Vec<A::Item>> {
        self.ctx.cache.invalidate(owner, Some(A::KIND));
        self.read(owner).await
    }

    async fn load(&self, owner: &OwnerKey) -> SyncResult<CacheEntry> {
        let key = Self::key(owner);
        let reachable = self.ctx.is_reachable();
        if let Some(entry) = self.ctx.cache.get(&key) {
            // A seed with no queued operations left yields to the relays' copy.
            let stale_seed =
                entry.offline_seed && reachable && !self.ctx.queue.has_pending(owner, A::KIND);
            if !stale_seed {
                return Ok(entry);
            }
            debug!(%key, "dropping offline seed with no queued operations");
            self.ctx.cache.invalidate(owner, Some(A::KIND));
        }
        if !reachable {
            debug!(%key, "offline cache miss, serving empty document");
            return Ok(CacheEntry::offline_seed(A::into_value(Vec::new())));
        }
        self.fetch(owner).await
    }

    async fn fetch(&self, owner: &OwnerKey) -> SyncResult<CacheEntry> {
        let key = Self::key(owner);
        let (items, version) = match self.fetch_remote(owner).await {
            Ok(fetched) => fetched,
            Err(SyncError::NetworkUnavailable) => {
                debug!(%key, "no relay reachable, serving empty document");
                return Ok(CacheEntry::offline_seed(A::into_value(Vec::new())));
            }
            Err(e) => return Err(e),
        };

        // An optimistic write or a newer confirmed value that landed while
        // the fetch was in flight wins over the fetched one.
        if let Some(existing) = self.ctx.cache.get(&key) {
            if !existing.confirmed || existing.version >= version {
                return Ok(existing);
            }
        }

        let entry = CacheEntry::new(A::into_value(items), true, version);
        self.ctx.cache.put(&key, entry.clone());
        Ok(entry)
    }

    /// Fetches and decodes the relays' copy, bypassing the cache.
    ///
    /// Returns the items and the record's `created_at` (0 if there is no
    /// record). An undecodable record reads as empty.
    async fn fetch_remote(&self, owner: &OwnerKey) -> SyncResult<(Vec<A::Item>, u64)> {
        let key = Self::key(owner);
        let gateway = Arc::clone(&self.ctx.gateway);
        let filter = A::KIND.filter(owner);
        let counters = &self.ctx.counters;

        let record = self
            .ctx
            .dedup
            .get_or_fetch(key.clone(), || {
                Counters::bump(&counters.fetches);
                async move { gateway.fetch_latest(&filter).await }
            })
            .await?;

        Ok(match record {
            Some(record) => match A::decode(&record) {
                Ok(items) => (items, record.created_at),
                Err(e) => {
                    Counters::bump(&counters.decode_failures);
                    warn!(%key, record = %record.id, error = %e, "undecodable document, treating as empty");
                    (Vec::new(), record.created_at)
                }
            },
            None => (Vec::new(), 0),
        })
    }

    /// Rebuilds an offline seed on the relays' copy: fetches it and
    /// re-applies every queued operation of this document in order.
    ///
    /// The result is cached unconfirmed and no longer marked as a seed.
    async fn rebase_offline_seed(&self, owner: &OwnerKey) -> SyncResult<CacheEntry> {
        let key = Self::key(owner);
        let (mut items, version) = self.fetch_remote(owner).await?;
        let queued: Vec<QueuedOperation> = self
            .ctx
            .queue
            .pending(owner)
            .into_iter()
            .filter(|queued| queued.state_kind() == A::KIND)
            .collect();
        for queued in &queued {
            items = A::apply(&items, &queued.op)?;
        }
        info!(%key, version, reapplied = queued.len(), "rebased offline edits on relay state");

        let entry = CacheEntry::new(A::into_value(items), false, version);
        self.ctx.cache.put(&key, entry.clone());
        Ok(entry)
    }

    /// Applies a mutation: recompute, cache optimistically, then publish or
    /// enqueue.
    ///
    /// A mutation that leaves the document unchanged succeeds without
    /// touching the network, unless the document is an offline seed. Offline mutations, and mutations of a document
    /// that still has queued operations, are enqueued behind them and
    /// succeed immediately.
    ///
    /// # Errors
    ///
    /// - [`SyncError::PublishExhausted`] if every publish attempt failed; the
    ///   cache is rolled back to its pre-mutation value
    /// - the fetch error if the document could not be loaded
    pub async fn apply(&self, owner: &OwnerKey, op: StateOp) -> SyncResult<()> {
        let key = Self::key(owner);
        let lock = self.ctx.doc_lock(&key);
        let _guard = lock.lock().await;

        let snapshot = self.load(owner).await?;
        let current = Self::items(snapshot.clone());
        let next = A::apply(&current, &op)?;
        // On an offline seed the operation may still change the relays' copy.
        if next == current && !snapshot.offline_seed {
            debug!(%key, op = op.name(), "mutation is a no-op");
            return Ok(());
        }

        self.ctx.cache.put(
            &key,
            CacheEntry::new(A::into_value(next.clone()), false, snapshot.version)
                .with_offline_seed(snapshot.offline_seed),
        );

        if !self.ctx.is_reachable() || self.ctx.queue.has_pending(owner, A::KIND) {
            let queued = QueuedOperation::new(owner.clone(), op);
            let id = queued.id;
            let name = queued.op.name();
            if !self.ctx.queue.enqueue(queued) {
                warn!(%key, %id, "offline operation is not durable");
            }
            info!(%key, %id, op = name, "queued mutation for replay");
            self.ctx.events.emit(SyncEvent::OperationQueued {
                owner: owner.clone(),
                id,
                op: name,
            });
            return Ok(());
        }

        match self.publish(owner, &next, snapshot.version, true).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let attempts = self.ctx.retry.max_attempts();
                warn!(%key, attempts, error = %e, "publish exhausted, rolling back");
                Counters::bump(&self.ctx.counters.rollbacks);
                self.ctx.cache.put(&key, snapshot);
                self.ctx.events.emit(SyncEvent::PublishFailed {
                    owner: owner.clone(),
                    kind: A::KIND,
                    error: e.to_string(),
                });
                Err(SyncError::PublishExhausted {
                    attempts,
                    message: e.to_string(),
                })
            }
        }
    }

    /// Replays one queued operation against the current document and
    /// publishes the result with a single attempt.
    ///
    /// The document is published even if the operation is a no-op on the
    /// current value, since the value may itself be an unpublished
    /// optimistic write. An offline seed is first rebased on the relays'
    /// copy.
    ///
    /// # Errors
    ///
    /// Returns the publish error, or the fetch error if an offline seed could
    /// not be rebased.
    pub async fn replay(&self, queued: &QueuedOperation) -> SyncResult<()> {
        let owner = &queued.owner;
        let key = Self::key(owner);
        let lock = self.ctx.doc_lock(&key);
        let _guard = lock.lock().await;

        let mut snapshot = self.load(owner).await?;
        if snapshot.offline_seed {
            snapshot = self.rebase_offline_seed(owner).await?;
        }
        let next = A::apply(&Self::items(snapshot.clone()), &queued.op)?;
        self.ctx.cache.put(
            &key,
            CacheEntry::new(A::into_value(next.clone()), false, snapshot.version),
        );

        self.publish(owner, &next, snapshot.version, false).await?;
        Counters::bump(&self.ctx.counters.replayed);
        self.ctx.events.emit(SyncEvent::OperationReplayed {
            owner: owner.clone(),
            id: queued.id,
        });
        Ok(())
    }

    /// Publishes `items` and confirms the cache entry on success.
    ///
    /// Returns the `created_at` of the published record.
    async fn publish(
        &self,
        owner: &OwnerKey,
        items: &[A::Item],
        base_version: u64,
        with_retry: bool,
    ) -> SyncResult<u64> {
        let key = Self::key(owner);
        let created_at = unix_now().max(base_version + 1);
        let draft = A::encode(owner, items, created_at)?;
        let relays = self.ctx.select_relays().await;
        let _publishing = PublishingGuard::new(&self.ctx.publishing, &key);

        let gateway = &*self.ctx.gateway;
        let (draft_ref, relays_ref) = (&draft, relays.as_slice());
        let record_id = if with_retry {
            self.ctx
                .retry
                .run_with_hook(
                    move |_| gateway.publish(draft_ref, relays_ref),
                    |attempt, e: &SyncError| {
                        Counters::bump(&self.ctx.counters.retries);
                        debug!(%key, attempt, error = %e, "publish attempt failed");
                    },
                )
                .await?
        } else {
            gateway.publish(draft_ref, relays_ref).await?
        };

        Counters::bump(&self.ctx.counters.publishes);
        self.ctx
            .cache
            .put(&key, CacheEntry::new(A::into_value(items.to_vec()), true, created_at));
        info!(%key, record = %record_id, relays = relays.len(), "published document");
        self.ctx.events.emit(SyncEvent::Published {
            owner: owner.clone(),
            kind: A::KIND,
            record_id,
        });
        Ok(created_at)
    }
}

impl<A: StateKindAdapter> Clone for SyncEngine<A> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.ctx))
    }
}

impl<A: StateKindAdapter> fmt::Debug for SyncEngine<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine").field("kind", &A::KIND).finish()
    }
}
