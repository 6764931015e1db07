//! Durable FIFO of mutations made while offline.
//!
//! # Invariants
//!
//! - Operations replay strictly in enqueue order per owner
//! - An operation leaves the queue only after its replay succeeds, or when
//!   an operator discards it after a terminal failure
//! - A failed operation blocks every later operation of the same owner
//! - Only one drain per owner runs at a time
//! - A queue whose persisted copy could not be read is never written back,
//!   so a transient store failure cannot erase durable operations

use crate::error::SyncResult;
use parking_lot::Mutex;
use relaymark_protocol::{OperationStatus, OwnerKey, QueuedOperation, StateKind};
use relaymark_storage::{KvStore, StorageResult};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

const QUEUE_PREFIX: &str = "queue/";

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Operations replayed and removed.
    pub replayed: usize,
    /// Operations still queued after the pass.
    pub remaining: usize,
    /// The operation that stopped the pass, if a replay failed.
    pub stopped_at: Option<QueuedOperation>,
    /// True if the pass stopped at an operation marked failed.
    pub blocked: bool,
    /// The operation that exhausted its retry budget during this pass.
    pub newly_failed: Option<QueuedOperation>,
}

#[derive(Debug, Default)]
struct OwnerQueue {
    ops: Vec<QueuedOperation>,
    /// False until the persisted copy has been read.
    loaded: bool,
}

impl OwnerQueue {
    /// Puts the persisted operations ahead of those queued while the store
    /// was unreadable. Returns true if local operations were kept.
    fn merge_loaded(&mut self, persisted: Vec<QueuedOperation>) -> bool {
        let local = std::mem::replace(&mut self.ops, persisted);
        let mut kept = false;
        for op in local {
            if !self.ops.iter().any(|p| p.id == op.id) {
                self.ops.push(op);
                kept = true;
            }
        }
        self.loaded = true;
        kept
    }
}

/// Per-owner persistent operation queue.
pub struct OfflineQueue {
    store: Arc<dyn KvStore>,
    queues: Mutex<HashMap<OwnerKey, OwnerQueue>>,
    drain_locks: Mutex<HashMap<OwnerKey, Arc<tokio::sync::Mutex<()>>>>,
    max_retries: u32,
}

impl OfflineQueue {
    /// Creates a queue persisting into `store`.
    ///
    /// An operation is marked failed once its retry count exceeds
    /// `max_retries`.
    pub fn new(store: Arc<dyn KvStore>, max_retries: u32) -> Self {
        Self {
            store,
            queues: Mutex::new(HashMap::new()),
            drain_locks: Mutex::new(HashMap::new()),
            max_retries,
        }
    }

    /// Appends an operation to its owner's queue and persists the queue.
    ///
    /// Returns false if the queue could not be persisted; the operation is
    /// still queued in memory and replays during this session.
    pub fn enqueue(&self, op: QueuedOperation) -> bool {
        let owner = op.owner.clone();
        debug!(%owner, op = op.op.name(), id = %op.id, "enqueueing offline operation");
        self.with_queue(&owner, |queue| {
            queue.ops.push(op);
            self.persist(&owner, queue)
        })
    }

    /// Returns the owner's queued operations in order, failed ones included.
    pub fn pending(&self, owner: &OwnerKey) -> Vec<QueuedOperation> {
        self.with_queue(owner, |queue| queue.ops.clone())
    }

    /// Returns the number of queued operations for the owner.
    pub fn len(&self, owner: &OwnerKey) -> usize {
        self.with_queue(owner, |queue| queue.ops.len())
    }

    /// Returns true if the owner has queued operations of `kind`.
    pub fn has_pending(&self, owner: &OwnerKey, kind: StateKind) -> bool {
        self.with_queue(owner, |queue| {
            queue.ops.iter().any(|op| op.state_kind() == kind)
        })
    }

    /// Returns the owner's operations marked failed.
    pub fn failed(&self, owner: &OwnerKey) -> Vec<QueuedOperation> {
        self.with_queue(owner, |queue| {
            queue.ops.iter().filter(|op| op.is_failed()).cloned().collect()
        })
    }

    /// Lists owners with a persisted or in-memory queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed.
    pub fn owners(&self) -> SyncResult<Vec<OwnerKey>> {
        let mut owners: Vec<OwnerKey> = self
            .store
            .keys(QUEUE_PREFIX)?
            .iter()
            .filter_map(|k| k.strip_prefix(QUEUE_PREFIX))
            .filter_map(|o| OwnerKey::parse(o).ok())
            .collect();
        owners.extend(
            self.queues
                .lock()
                .iter()
                .filter(|(_, queue)| !queue.ops.is_empty())
                .map(|(owner, _)| owner.clone()),
        );
        owners.sort();
        owners.dedup();
        Ok(owners)
    }

    /// Removes the owner's failed operations. Returns how many were removed.
    pub fn discard_failed(&self, owner: &OwnerKey) -> usize {
        self.with_queue(owner, |queue| {
            let before = queue.ops.len();
            queue.ops.retain(|op| !op.is_failed());
            let removed = before - queue.ops.len();
            if removed > 0 {
                info!(%owner, removed, "discarded failed operations");
                self.persist(owner, queue);
            }
            removed
        })
    }

    /// Resets the owner's failed operations to pending with a fresh retry
    /// budget. Returns how many were re-armed.
    pub fn rearm_failed(&self, owner: &OwnerKey) -> usize {
        self.with_queue(owner, |queue| {
            let mut rearmed = 0;
            for op in queue.ops.iter_mut().filter(|op| op.is_failed()) {
                op.status = OperationStatus::Pending;
                op.retry_count = 0;
                rearmed += 1;
            }
            if rearmed > 0 {
                info!(%owner, rearmed, "re-armed failed operations");
                self.persist(owner, queue);
            }
            rearmed
        })
    }

    /// Drops the owner's whole queue.
    pub fn clear(&self, owner: &OwnerKey) {
        self.with_queue(owner, |queue| {
            queue.ops.clear();
            self.persist(owner, queue);
        });
    }

    /// Replays the owner's queue in order.
    ///
    /// Each operation is passed to `replay`; on success it is removed, on
    /// failure its retry count is incremented (marking it failed once the
    /// count exceeds the budget) and the pass stops so that no later
    /// operation overtakes it.
    pub async fn drain<F, Fut>(&self, owner: &OwnerKey, mut replay: F) -> DrainReport
    where
        F: FnMut(QueuedOperation) -> Fut,
        Fut: Future<Output = SyncResult<()>>,
    {
        let lock = self.drain_lock(owner);
        let _guard = lock.lock().await;
        let mut report = DrainReport::default();

        loop {
            let Some(op) = self.with_queue(owner, |queue| queue.ops.first().cloned()) else {
                break;
            };
            if op.is_failed() {
                debug!(%owner, id = %op.id, "queue blocked by failed operation");
                report.blocked = true;
                report.stopped_at = Some(op);
                break;
            }

            match replay(op.clone()).await {
                Ok(()) => {
                    self.with_queue(owner, |queue| {
                        queue.ops.retain(|queued| queued.id != op.id);
                        self.persist(owner, queue);
                    });
                    debug!(%owner, id = %op.id, op = op.op.name(), "replayed queued operation");
                    report.replayed += 1;
                }
                Err(e) => {
                    let updated = self.with_queue(owner, |queue| {
                        let queued = queue.ops.iter_mut().find(|queued| queued.id == op.id)?;
                        queued.retry_count += 1;
                        queued.last_error = Some(e.to_string());
                        if queued.retry_count > self.max_retries {
                            queued.status = OperationStatus::Failed;
                        }
                        let updated = queued.clone();
                        self.persist(owner, queue);
                        Some(updated)
                    });

                    if let Some(updated) = updated {
                        if updated.is_failed() {
                            warn!(
                                %owner,
                                id = %updated.id,
                                retries = updated.retry_count,
                                error = %e,
                                "queued operation exceeded its retry budget"
                            );
                            report.blocked = true;
                            report.newly_failed = Some(updated.clone());
                        } else {
                            debug!(%owner, id = %updated.id, error = %e, "queued operation replay failed");
                        }
                        report.stopped_at = Some(updated);
                    }
                    break;
                }
            }
        }

        report.remaining = self.len(owner);
        report
    }

    fn drain_lock(&self, owner: &OwnerKey) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.drain_locks.lock().entry(owner.clone()).or_default())
    }

    /// Runs `f` on the owner's queue, reading the persisted copy first if it
    /// has not been read yet. A failed read is retried on the next access.
    fn with_queue<R>(&self, owner: &OwnerKey, f: impl FnOnce(&mut OwnerQueue) -> R) -> R {
        let mut queues = self.queues.lock();
        let queue = queues.entry(owner.clone()).or_default();
        if !queue.loaded {
            match self.load(owner) {
                Ok(persisted) => {
                    if queue.merge_loaded(persisted) {
                        self.persist(owner, queue);
                    }
                }
                Err(e) => warn!(%owner, error = %e, "offline queue storage unavailable"),
            }
        }
        f(queue)
    }

    fn load(&self, owner: &OwnerKey) -> StorageResult<Vec<QueuedOperation>> {
        let Some(bytes) = self.store.get(&storage_key(owner))? else {
            return Ok(Vec::new());
        };
        match ciborium::from_reader::<Vec<QueuedOperation>, _>(bytes.as_slice()) {
            Ok(ops) => Ok(ops),
            Err(e) => {
                warn!(%owner, error = %e, "corrupt persisted offline queue");
                Ok(Vec::new())
            }
        }
    }

    fn persist(&self, owner: &OwnerKey, queue: &OwnerQueue) -> bool {
        if !queue.loaded {
            warn!(%owner, "offline queue not loaded from storage, keeping it in memory");
            return false;
        }

        let key = storage_key(owner);
        let result = if queue.ops.is_empty() {
            self.store.delete(&key)
        } else {
            let mut bytes = Vec::new();
            if let Err(e) = ciborium::into_writer(&queue.ops, &mut bytes) {
                warn!(%owner, error = %e, "failed to encode offline queue");
                return false;
            }
            self.store.set(&key, &bytes)
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(%owner, error = %e, "failed to persist offline queue");
                false
            }
        }
    }
}

fn storage_key(owner: &OwnerKey) -> String {
    format!("{QUEUE_PREFIX}{owner}")
}

impl fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("owners_loaded", &self.queues.lock().len())
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use relaymark_protocol::StateOp;
    use relaymark_storage::InMemoryKvStore;

    fn alice() -> OwnerKey {
        OwnerKey::parse("alice").unwrap()
    }

    fn add(event_id: &str) -> QueuedOperation {
        QueuedOperation::new(
            alice(),
            StateOp::AddBookmark {
                event_id: event_id.into(),
            },
        )
    }

    fn event_id(op: &QueuedOperation) -> String {
        match &op.op {
            StateOp::AddBookmark { event_id } => event_id.clone(),
            other => panic!("unexpected op {other:?}"),
        }
    }

    fn queue(store: Arc<InMemoryKvStore>, max_retries: u32) -> OfflineQueue {
        OfflineQueue::new(store, max_retries)
    }

    #[tokio::test]
    async fn drain_replays_in_enqueue_order() {
        let q = queue(Arc::new(InMemoryKvStore::new()), 5);
        for id in ["e1", "e2", "e3"] {
            assert!(q.enqueue(add(id)));
        }

        let mut seen = Vec::new();
        let report = q
            .drain(&alice(), |op| {
                seen.push(event_id(&op));
                async { Ok(()) }
            })
            .await;

        assert_eq!(seen, vec!["e1", "e2", "e3"]);
        assert_eq!(report.replayed, 3);
        assert_eq!(report.remaining, 0);
        assert!(q.pending(&alice()).is_empty());
    }

    #[tokio::test]
    async fn failure_stops_the_pass_and_counts_retry() {
        let q = queue(Arc::new(InMemoryKvStore::new()), 5);
        q.enqueue(add("e1"));
        q.enqueue(add("e2"));

        let mut seen = Vec::new();
        let report = q
            .drain(&alice(), |op| {
                seen.push(event_id(&op));
                async { Err(SyncError::gateway_retryable("relay closed")) }
            })
            .await;

        assert_eq!(seen, vec!["e1"]);
        assert_eq!(report.replayed, 0);
        assert_eq!(report.remaining, 2);
        assert!(!report.blocked);
        let stopped = report.stopped_at.unwrap();
        assert_eq!(stopped.retry_count, 1);
        assert_eq!(stopped.last_error.as_deref(), Some("gateway error: relay closed"));
    }

    #[tokio::test]
    async fn exceeding_budget_marks_failed_and_blocks() {
        let q = queue(Arc::new(InMemoryKvStore::new()), 1);
        q.enqueue(add("e1"));
        q.enqueue(add("e2"));

        for _ in 0..2 {
            q.drain(&alice(), |_| async { Err(SyncError::Timeout) }).await;
        }
        let failed = q.failed(&alice());
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].retry_count, 2);
        assert_eq!(event_id(&failed[0]), "e1");

        // Later operations never overtake the failed one.
        let mut calls = 0;
        let report = q
            .drain(&alice(), |_| {
                calls += 1;
                async { Ok(()) }
            })
            .await;
        assert_eq!(calls, 0);
        assert!(report.blocked);
        assert_eq!(report.remaining, 2);
    }

    #[tokio::test]
    async fn operator_can_discard_or_rearm() {
        let q = queue(Arc::new(InMemoryKvStore::new()), 0);
        q.enqueue(add("e1"));
        q.enqueue(add("e2"));
        q.drain(&alice(), |_| async { Err(SyncError::Timeout) }).await;
        assert_eq!(q.failed(&alice()).len(), 1);

        assert_eq!(q.rearm_failed(&alice()), 1);
        assert!(q.failed(&alice()).is_empty());
        assert_eq!(q.pending(&alice())[0].retry_count, 0);

        q.drain(&alice(), |_| async { Err(SyncError::Timeout) }).await;
        assert_eq!(q.discard_failed(&alice()), 1);

        let remaining = q.pending(&alice());
        assert_eq!(remaining.len(), 1);
        assert_eq!(event_id(&remaining[0]), "e2");
    }

    #[tokio::test]
    async fn queue_survives_reload() {
        let store = Arc::new(InMemoryKvStore::new());
        queue(Arc::clone(&store), 5).enqueue(add("e1"));

        let reloaded = queue(Arc::clone(&store), 5);
        assert_eq!(reloaded.len(&alice()), 1);
        assert_eq!(reloaded.owners().unwrap(), vec![alice()]);

        reloaded.drain(&alice(), |_| async { Ok(()) }).await;
        assert!(store.get("queue/alice").unwrap().is_none());
    }

    #[tokio::test]
    async fn enqueue_reports_persistence_failure() {
        let store = Arc::new(InMemoryKvStore::new());
        store.set_unavailable(true);
        let q = queue(Arc::clone(&store), 5);

        assert!(!q.enqueue(add("e1")));
        // Still replayable in this session.
        assert_eq!(q.len(&alice()), 1);
        assert!(q.has_pending(&alice(), StateKind::BookmarkList));
        assert!(!q.has_pending(&alice(), StateKind::BookmarkCollections));
    }

    #[tokio::test]
    async fn unreadable_store_does_not_erase_persisted_queue() {
        let store = Arc::new(InMemoryKvStore::new());
        queue(Arc::clone(&store), 5).enqueue(add("e1"));

        let q = queue(Arc::clone(&store), 5);
        store.set_unavailable(true);
        assert_eq!(q.len(&alice()), 0);
        store.set_unavailable(false);
        assert!(q.enqueue(add("e2")));

        let ids: Vec<String> = queue(Arc::clone(&store), 5)
            .pending(&alice())
            .iter()
            .map(event_id)
            .collect();
        assert_eq!(ids, vec!["e1", "e2"]);
    }

    #[tokio::test]
    async fn operations_queued_while_unreadable_follow_persisted_ones() {
        let store = Arc::new(InMemoryKvStore::new());
        queue(Arc::clone(&store), 5).enqueue(add("e1"));

        let q = queue(Arc::clone(&store), 5);
        store.set_unavailable(true);
        assert!(!q.enqueue(add("e2")));
        store.set_unavailable(false);

        let mut seen = Vec::new();
        let report = q
            .drain(&alice(), |op| {
                seen.push(event_id(&op));
                async { Ok(()) }
            })
            .await;
        assert_eq!(seen, vec!["e1", "e2"]);
        assert_eq!(report.remaining, 0);
        assert!(store.get("queue/alice").unwrap().is_none());
    }
}
