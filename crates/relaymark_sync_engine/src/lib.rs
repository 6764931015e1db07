//! # Relaymark Sync Engine
//!
//! Replaceable-state synchronization for relaymark.
//!
//! This crate provides:
//! - Fetch deduplication (one in-flight fetch per document)
//! - Two-tier document cache (memory + persistent)
//! - Durable offline operation queue
//! - Retry with exponential backoff
//! - A generic document engine with one adapter per state kind
//! - The bookmark service API
//!
//! ## Architecture
//!
//! Every piece of user state is a *replaceable document*: the newest relay
//! record for an (owner, kind) pair fully replaces all earlier ones. The
//! engine therefore never sends deltas:
//! 1. Read the current document (cache first)
//! 2. Recompute the full document with a pure per-kind function
//! 3. Cache it optimistically
//! 4. Publish it, or queue the operation while offline
//!
//! ## Key Invariants
//!
//! - At most one network fetch per document is in flight
//! - A cache entry is only `confirmed` once the relays returned or accepted it
//! - Queued operations replay strictly in order per owner
//! - Duplicate adds and removals of absent items are no-ops, not errors

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod cache;
mod config;
mod connectivity;
mod dedup;
mod engine;
mod error;
mod events;
mod gateway;
mod queue;
mod retry;
mod service;

pub use adapter::{BookmarkListAdapter, CollectionsAdapter, MetadataAdapter, StateKindAdapter};
pub use cache::{CacheEntry, DocumentKey, StateCache};
pub use config::{RetryConfig, SyncConfig, DEFAULT_FALLBACK_RELAYS};
pub use connectivity::Connectivity;
pub use dedup::{FetchDeduplicator, SharedFetch};
pub use engine::{DocumentState, SyncContext, SyncEngine, SyncStats};
pub use error::{SyncError, SyncResult};
pub use events::{EventBus, SyncEvent};
pub use gateway::{MockGateway, RelayGateway};
pub use queue::{DrainReport, OfflineQueue};
pub use retry::RetryExecutor;
pub use service::BookmarkService;
