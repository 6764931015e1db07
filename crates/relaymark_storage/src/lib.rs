//! # relaymark Storage
//!
//! Durable key-value stores backing relaymark's persistent cache tier and
//! offline operation queue.
//!
//! Stores are **opaque byte maps**. They do not interpret the values they
//! hold; encoding is owned by the sync engine.
//!
//! ## Design Principles
//!
//! - Three operations (`get`, `set`, `delete`) plus prefix listing
//! - "Not found" is `Ok(None)`, "store unavailable" is `Err(_)`
//! - Stores may have a finite capacity; callers must tolerate write failures
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Stores
//!
//! - [`InMemoryKvStore`] - For testing and ephemeral sessions
//! - [`FileKvStore`] - One file per key under a directory
//!
//! ## Example
//!
//! ```rust
//! use relaymark_storage::{InMemoryKvStore, KvStore};
//!
//! let store = InMemoryKvStore::new();
//! store.set("cache/alice/bookmark-list", b"hello").unwrap();
//! assert_eq!(store.get("cache/alice/bookmark-list").unwrap(), Some(b"hello".to_vec()));
//! assert_eq!(store.get("missing").unwrap(), None);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::KvStore;
pub use error::{StorageError, StorageResult};
pub use file::FileKvStore;
pub use memory::InMemoryKvStore;
