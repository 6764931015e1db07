//! Request coalescing for network fetches.
//!
//! At most one fetch per key is in flight at a time. Callers arriving while a
//! fetch is outstanding join it and receive the same result, success or
//! failure. The map entry is removed exactly once, when the fetch settles or
//! its timeout elapses, after which the key is immediately eligible for a
//! new fetch.

use crate::error::{SyncError, SyncResult};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Future for the completion of a deduplicated fetch.
pub type SharedFetch<V> = Shared<BoxFuture<'static, SyncResult<V>>>;

type InFlight<K, V> = Arc<Mutex<HashMap<K, (u64, SharedFetch<V>)>>>;

/// Coalesces concurrent fetches for the same key.
pub struct FetchDeduplicator<K, V> {
    in_flight: InFlight<K, V>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl<K, V> FetchDeduplicator<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a deduplicator whose fetches give up after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            timeout,
        }
    }

    /// Returns the result of the in-flight fetch for `key`, starting one
    /// with `fetch` if none is outstanding.
    ///
    /// `fetch` is only called when a new fetch is started. The fetch is
    /// driven by a background task, so it completes (and clears its map
    /// entry) even if every caller stops waiting.
    ///
    /// # Errors
    ///
    /// Returns the fetch's error, or [`SyncError::Timeout`] if it did not
    /// settle within the timeout.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F) -> SyncResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SyncResult<V>> + Send + 'static,
    {
        let shared = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(&key) {
                Some((_, pending)) => {
                    debug!(?key, "joining in-flight fetch");
                    pending.clone()
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let pending = self.start(key.clone(), id, fetch());
                    in_flight.insert(key, (id, pending.clone()));
                    tokio::spawn(pending.clone().map(|_| ()));
                    pending
                }
            }
        };

        shared.await
    }

    fn start<Fut>(&self, key: K, id: u64, fetch: Fut) -> SharedFetch<V>
    where
        Fut: Future<Output = SyncResult<V>> + Send + 'static,
    {
        let in_flight = Arc::clone(&self.in_flight);
        let timeout = self.timeout;

        async move {
            let result = match tokio::time::timeout(timeout, fetch).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(?key, ?timeout, "fetch did not settle in time");
                    Err(SyncError::Timeout)
                }
            };

            let mut in_flight = in_flight.lock();
            if in_flight.get(&key).map(|(entry_id, _)| *entry_id) == Some(id) {
                in_flight.remove(&key);
            }
            result
        }
        .boxed()
        .shared()
    }

    /// Returns the number of fetches currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Returns true if a fetch for `key` is in flight.
    pub fn is_in_flight(&self, key: &K) -> bool {
        self.in_flight.lock().contains_key(key)
    }
}

impl<K, V> Debug for FetchDeduplicator<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchDeduplicator")
            .field("in_flight", &self.in_flight.lock().len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn dedup(timeout_ms: u64) -> FetchDeduplicator<&'static str, u32> {
        FetchDeduplicator::new(Duration::from_millis(timeout_ms))
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let dedup = dedup(1_000);
        let calls = Arc::new(AtomicUsize::new(0));

        let fetch = || {
            let calls = Arc::clone(&calls);
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(42)
            }
        };

        let (a, b, c) = tokio::join!(
            dedup.get_or_fetch("k", fetch()),
            dedup.get_or_fetch("k", fetch()),
            dedup.get_or_fetch("k", fetch()),
        );

        assert_eq!((a, b, c), (Ok(42), Ok(42), Ok(42)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dedup.in_flight(), 0);
    }

    #[tokio::test]
    async fn distinct_keys_fetch_independently() {
        let dedup = dedup(1_000);
        let (a, b) = tokio::join!(
            dedup.get_or_fetch("a", || async { Ok(1) }),
            dedup.get_or_fetch("b", || async { Ok(2) }),
        );
        assert_eq!((a, b), (Ok(1), Ok(2)));
    }

    #[tokio::test]
    async fn failure_reaches_every_waiter_and_key_is_reusable() {
        let dedup = dedup(1_000);

        let failing = || async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(SyncError::gateway_retryable("relay closed"))
        };
        let (a, b) = tokio::join!(
            dedup.get_or_fetch("k", failing),
            dedup.get_or_fetch("k", failing),
        );
        assert_eq!(a, Err(SyncError::gateway_retryable("relay closed")));
        assert_eq!(a, b);
        assert!(!dedup.is_in_flight(&"k"));

        let retry = dedup.get_or_fetch("k", || async { Ok(9) }).await;
        assert_eq!(retry, Ok(9));
    }

    #[tokio::test]
    async fn timeout_clears_entry() {
        let dedup = dedup(30);

        let result = dedup
            .get_or_fetch("k", || futures::future::pending::<SyncResult<u32>>())
            .await;
        assert_eq!(result, Err(SyncError::Timeout));
        assert_eq!(dedup.in_flight(), 0);
    }

    #[tokio::test]
    async fn abandoned_fetch_still_settles() {
        let dedup = dedup(1_000);

        let waiter = dedup.get_or_fetch("k", || async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(1)
        });
        // Poll once to start the fetch, then drop the only waiter.
        let _ = futures::poll!(Box::pin(waiter));
        assert!(dedup.is_in_flight(&"k"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!dedup.is_in_flight(&"k"));
    }
}
