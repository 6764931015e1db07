//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The write would exceed the store's capacity.
    #[error("storage quota exceeded: {requested} bytes requested, {available} available")]
    QuotaExceeded {
        /// Bytes the write needed.
        requested: usize,
        /// Bytes still available.
        available: usize,
    },

    /// The key cannot be represented by this store.
    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    /// The stored data is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// The store is closed or otherwise unavailable.
    #[error("storage unavailable")]
    Unavailable,
}
