//! In-memory key-value store for testing.

use crate::backend::KvStore;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// An in-memory key-value store.
///
/// This store keeps all values in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Sessions that don't need persistence
///
/// A capacity (in value bytes) can be configured to model a browser
/// storage quota; writes beyond it fail with
/// [`StorageError::QuotaExceeded`]. The store can also be switched
/// unavailable to model a storage backend that refuses all access.
///
/// # Example
///
/// ```rust
/// use relaymark_storage::{InMemoryKvStore, KvStore, StorageError};
///
/// let store = InMemoryKvStore::with_capacity(4);
/// store.set("a", b"1234").unwrap();
/// assert!(matches!(store.set("b", b"5"), Err(StorageError::QuotaExceeded { .. })));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
    capacity: Option<usize>,
    unavailable: AtomicBool,
}

impl InMemoryKvStore {
    /// Creates a new empty store with no capacity limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new empty store holding at most `capacity` value bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Makes every subsequent call fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Returns the total number of value bytes held.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.data.read().values().map(Vec::len).sum()
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable)
        } else {
            Ok(())
        }
    }
}

impl KvStore for InMemoryKvStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.check_available()?;
        Ok(self.data.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.check_available()?;
        let mut data = self.data.write();

        if let Some(capacity) = self.capacity {
            let used: usize = data
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, v)| v.len())
                .sum();
            let available = capacity.saturating_sub(used);
            if value.len() > available {
                return Err(StorageError::QuotaExceeded {
                    requested: value.len(),
                    available,
                });
            }
        }

        data.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        self.check_available()?;
        self.data.write().remove(key);
        Ok(())
    }

    fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.check_available()?;
        Ok(self
            .data
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
