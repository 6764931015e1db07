//! Key-value store trait definition.

use crate::error::StorageResult;
use std::sync::Arc;

/// A durable key-value store.
///
/// Stores are **opaque byte maps**. The sync engine owns all value
/// encoding; stores never look inside a value.
///
/// # Invariants
///
/// - `get` returns exactly the bytes of the last successful `set` for that key
/// - `get` on an unknown key is `Ok(None)`, never an error
/// - `delete` of an unknown key succeeds
/// - A failed `set` leaves the previous value intact
/// - Stores must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryKvStore`] - For testing
/// - [`super::FileKvStore`] - For persistent storage
pub trait KvStore: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or the value cannot be read.
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or out of capacity.
    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Removes `key` from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    fn delete(&self, key: &str) -> StorageResult<()>;

    /// Lists all keys starting with `prefix`, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    fn keys(&self, prefix: &str) -> StorageResult<Vec<String>>;
}

impl<S: KvStore + ?Sized> KvStore for Arc<S> {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        (**self).delete(key)
    }

    fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        (**self).keys(prefix)
    }
}
