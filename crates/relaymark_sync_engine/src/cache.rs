//! Two-tier document cache.
//!
//! The memory tier is fast but lost on reload; the persistent tier survives
//! reloads so a user sees their last-known bookmarks before any relay
//! answers. Persistent-tier access is best-effort: failures are logged and
//! never change the outcome of the logical operation.

use crate::error::SyncResult;
use parking_lot::Mutex;
use relaymark_protocol::{OwnerKey, StateKind, StateValue};
use relaymark_storage::KvStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const CACHE_PREFIX: &str = "cache/";

/// Identifies one replaceable document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentKey {
    /// Owner of the document.
    pub owner: OwnerKey,
    /// Kind of the document.
    pub kind: StateKind,
}

impl DocumentKey {
    /// Creates a document key.
    pub fn new(owner: OwnerKey, kind: StateKind) -> Self {
        Self { owner, kind }
    }

    fn storage_key(&self) -> String {
        format!("{CACHE_PREFIX}{}/{}", self.owner, self.kind)
    }

    fn from_storage_key(key: &str) -> Option<Self> {
        let (owner, kind) = key.strip_prefix(CACHE_PREFIX)?.rsplit_once('/')?;
        Some(Self {
            owner: OwnerKey::parse(owner).ok()?,
            kind: kind.parse().ok()?,
        })
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.kind)
    }
}

/// A cached document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The decoded document.
    pub value: StateValue,
    /// When the entry was written (seconds since the Unix epoch).
    pub fetched_at: u64,
    /// False while the value is an optimistic write not yet acknowledged by
    /// a successful publish.
    pub confirmed: bool,
    /// `created_at` of the relay record this value mirrors, 0 if none.
    pub version: u64,
    /// True when the value was built on an empty document because no relay
    /// was reachable. The relays' copy must be merged in before it is
    /// published.
    #[serde(default)]
    pub offline_seed: bool,
}

impl CacheEntry {
    /// Creates an entry stamped with the current time.
    pub fn new(value: StateValue, confirmed: bool, version: u64) -> Self {
        Self {
            value,
            fetched_at: relaymark_protocol::unix_now(),
            confirmed,
            version,
            offline_seed: false,
        }
    }

    /// Creates an empty, unconfirmed entry standing in for a document that
    /// could not be fetched.
    pub fn offline_seed(value: StateValue) -> Self {
        Self {
            offline_seed: true,
            ..Self::new(value, false, 0)
        }
    }

    /// Returns the entry with its `offline_seed` flag set to `seed`.
    pub fn with_offline_seed(mut self, seed: bool) -> Self {
        self.offline_seed = seed;
        self
    }
}

#[derive(Debug)]
struct MemorySlot {
    entry: CacheEntry,
    last_access: Instant,
}

/// Memory + persistent cache of decoded documents.
pub struct StateCache {
    memory: Mutex<HashMap<DocumentKey, MemorySlot>>,
    store: Arc<dyn KvStore>,
    idle_ttl: Duration,
}

impl StateCache {
    /// Creates a cache persisting into `store`.
    pub fn new(store: Arc<dyn KvStore>, idle_ttl: Duration) -> Self {
        Self {
            memory: Mutex::new(HashMap::new()),
            store,
            idle_ttl,
        }
    }

    /// Returns the cached entry, checking memory first and promoting a
    /// persistent hit into memory.
    pub fn get(&self, key: &DocumentKey) -> Option<CacheEntry> {
        {
            let mut memory = self.memory.lock();
            if let Some(slot) = memory.get_mut(key) {
                if slot.last_access.elapsed() <= self.idle_ttl {
                    slot.last_access = Instant::now();
                    return Some(slot.entry.clone());
                }
                debug!(%key, "evicting idle memory entry");
                memory.remove(key);
            }
        }

        let entry = self.load_persisted(key)?;
        self.memory.lock().insert(
            key.clone(),
            MemorySlot {
                entry: entry.clone(),
                last_access: Instant::now(),
            },
        );
        Some(entry)
    }

    /// Returns the memory-tier entry only.
    pub fn get_memory(&self, key: &DocumentKey) -> Option<CacheEntry> {
        self.memory.lock().get(key).map(|slot| slot.entry.clone())
    }

    /// Writes both tiers.
    pub fn put(&self, key: &DocumentKey, entry: CacheEntry) {
        self.persist(key, &entry);
        self.memory.lock().insert(
            key.clone(),
            MemorySlot {
                entry,
                last_access: Instant::now(),
            },
        );
    }

    /// Clears one document, or every document of `owner` when `kind` is `None`.
    pub fn invalidate(&self, owner: &OwnerKey, kind: Option<StateKind>) {
        let kinds: Vec<StateKind> = match kind {
            Some(kind) => vec![kind],
            None => StateKind::ALL.to_vec(),
        };

        let mut memory = self.memory.lock();
        for kind in kinds {
            let key = DocumentKey::new(owner.clone(), kind);
            memory.remove(&key);
            if let Err(e) = self.store.delete(&key.storage_key()) {
                warn!(%key, error = %e, "failed to delete persisted cache entry");
            }
        }
    }

    /// Drops memory-tier entries idle longer than the TTL.
    ///
    /// Returns the number of entries evicted. Persisted copies are kept.
    pub fn evict_idle(&self) -> usize {
        let mut memory = self.memory.lock();
        let before = memory.len();
        memory.retain(|_, slot| slot.last_access.elapsed() <= self.idle_ttl);
        before - memory.len()
    }

    /// Returns the number of memory-tier entries.
    pub fn memory_len(&self) -> usize {
        self.memory.lock().len()
    }

    /// Lists persisted entries, optionally for a single owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed. Entries that fail to
    /// decode are skipped.
    pub fn persisted(&self, owner: Option<&OwnerKey>) -> SyncResult<Vec<(DocumentKey, CacheEntry)>> {
        let prefix = match owner {
            Some(owner) => format!("{CACHE_PREFIX}{owner}/"),
            None => CACHE_PREFIX.to_string(),
        };

        let mut entries = Vec::new();
        for storage_key in self.store.keys(&prefix)? {
            let Some(key) = DocumentKey::from_storage_key(&storage_key) else {
                continue;
            };
            if let Some(entry) = self.load_persisted(&key) {
                entries.push((key, entry));
            }
        }
        Ok(entries)
    }

    fn load_persisted(&self, key: &DocumentKey) -> Option<CacheEntry> {
        let bytes = match self.store.get(&key.storage_key()) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(%key, error = %e, "persistent cache unavailable");
                return None;
            }
        };

        match ciborium::from_reader::<CacheEntry, _>(bytes.as_slice()) {
            Ok(entry) if entry.value.kind() == key.kind => Some(entry),
            Ok(_) => {
                warn!(%key, "persisted cache entry has wrong kind");
                None
            }
            Err(e) => {
                warn!(%key, error = %e, "corrupt persisted cache entry");
                None
            }
        }
    }

    fn persist(&self, key: &DocumentKey, entry: &CacheEntry) {
        let mut bytes = Vec::new();
        if let Err(e) = ciborium::into_writer(entry, &mut bytes) {
            warn!(%key, error = %e, "failed to encode cache entry");
            return;
        }
        if let Err(e) = self.store.set(&key.storage_key(), &bytes) {
            warn!(%key, error = %e, "failed to persist cache entry");
        }
    }
}

impl fmt::Debug for StateCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateCache")
            .field("memory_entries", &self.memory_len())
            .field("idle_ttl", &self.idle_ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaymark_storage::InMemoryKvStore;

    fn key(owner: &str, kind: StateKind) -> DocumentKey {
        DocumentKey::new(OwnerKey::parse(owner).unwrap(), kind)
    }

    fn list(ids: &[&str]) -> StateValue {
        StateValue::BookmarkList(ids.iter().map(|s| s.to_string()).collect())
    }

    fn cache_with(store: Arc<InMemoryKvStore>) -> StateCache {
        StateCache::new(store, Duration::from_secs(60))
    }

    #[test]
    fn put_then_get_from_memory() {
        let cache = cache_with(Arc::new(InMemoryKvStore::new()));
        let k = key("alice", StateKind::BookmarkList);

        cache.put(&k, CacheEntry::new(list(&["e1"]), true, 3));
        let entry = cache.get(&k).unwrap();
        assert_eq!(entry.value, list(&["e1"]));
        assert!(entry.confirmed);
        assert_eq!(entry.version, 3);
    }

    #[test]
    fn persistent_hit_is_promoted() {
        let store = Arc::new(InMemoryKvStore::new());
        let k = key("alice", StateKind::BookmarkList);

        // Simulate a reload: write with one cache, read with a fresh one.
        cache_with(Arc::clone(&store)).put(&k, CacheEntry::new(list(&["e1"]), false, 0));

        let reloaded = cache_with(store);
        assert_eq!(reloaded.memory_len(), 0);
        let entry = reloaded.get(&k).unwrap();
        assert_eq!(entry.value, list(&["e1"]));
        assert!(!entry.confirmed);
        assert_eq!(reloaded.memory_len(), 1);
    }

    #[test]
    fn persistent_failure_does_not_fail_put_or_get() {
        let store = Arc::new(InMemoryKvStore::new());
        store.set_unavailable(true);
        let cache = cache_with(Arc::clone(&store));
        let k = key("alice", StateKind::BookmarkList);

        cache.put(&k, CacheEntry::new(list(&["e1"]), true, 0));
        assert_eq!(cache.get(&k).unwrap().value, list(&["e1"]));

        let other = key("bob", StateKind::BookmarkList);
        assert!(cache.get(&other).is_none());
    }

    #[test]
    fn quota_exceeded_keeps_memory_tier() {
        let store = Arc::new(InMemoryKvStore::with_capacity(4));
        let cache = cache_with(Arc::clone(&store));
        let k = key("alice", StateKind::BookmarkList);

        cache.put(&k, CacheEntry::new(list(&["e1", "e2", "e3"]), true, 0));
        assert!(store.is_empty());
        assert_eq!(cache.get(&k).unwrap().value.len(), 3);
    }

    #[test]
    fn invalidate_one_kind_or_all() {
        let store = Arc::new(InMemoryKvStore::new());
        let cache = cache_with(Arc::clone(&store));
        let alice = OwnerKey::parse("alice").unwrap();

        for kind in StateKind::ALL {
            cache.put(
                &DocumentKey::new(alice.clone(), kind),
                CacheEntry::new(StateValue::empty(kind), true, 0),
            );
        }
        cache.put(
            &key("bob", StateKind::BookmarkList),
            CacheEntry::new(list(&[]), true, 0),
        );

        cache.invalidate(&alice, Some(StateKind::BookmarkList));
        assert!(cache.get(&key("alice", StateKind::BookmarkList)).is_none());
        assert!(cache.get(&key("alice", StateKind::BookmarkMetadata)).is_some());

        cache.invalidate(&alice, None);
        assert!(cache.get(&key("alice", StateKind::BookmarkMetadata)).is_none());
        assert!(cache.get(&key("bob", StateKind::BookmarkList)).is_some());
        assert_eq!(store.keys("cache/alice/").unwrap().len(), 0);
    }

    #[test]
    fn idle_entries_are_evicted_from_memory_only() {
        let store = Arc::new(InMemoryKvStore::new());
        let cache = StateCache::new(store.clone(), Duration::from_millis(5));
        let k = key("alice", StateKind::BookmarkList);

        cache.put(&k, CacheEntry::new(list(&["e1"]), true, 0));
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(cache.evict_idle(), 1);
        assert_eq!(cache.memory_len(), 0);
        // Still readable through the persistent tier.
        assert_eq!(cache.get(&k).unwrap().value, list(&["e1"]));
    }

    #[test]
    fn corrupt_persisted_entry_is_a_miss() {
        let store = Arc::new(InMemoryKvStore::new());
        store.set("cache/alice/bookmark-list", b"\xff\x00garbage").unwrap();
        let cache = cache_with(store);
        assert!(cache.get(&key("alice", StateKind::BookmarkList)).is_none());
    }

    #[test]
    fn persisted_listing() {
        let store = Arc::new(InMemoryKvStore::new());
        let cache = cache_with(Arc::clone(&store));
        cache.put(&key("alice", StateKind::BookmarkList), CacheEntry::new(list(&["a"]), true, 0));
        cache.put(&key("bob", StateKind::BookmarkList), CacheEntry::new(list(&["b"]), true, 0));

        let all = cache.persisted(None).unwrap();
        assert_eq!(all.len(), 2);

        let alice = OwnerKey::parse("alice").unwrap();
        let mine = cache.persisted(Some(&alice)).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].0.kind, StateKind::BookmarkList);
    }
}
