//! Clear-cache command implementation.

use super::open_store;
use relaymark_protocol::{OwnerKey, StateKind};
use relaymark_sync_engine::{StateCache, SyncConfig, SyncResult};
use std::path::Path;
use tracing::info;

/// Runs the clear-cache command.
///
/// Drops the owner's cached documents (or one kind) so the next session
/// refetches them. The offline queue is not touched.
pub fn run(path: &Path, owner: &str, kind: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let owner = OwnerKey::parse(owner)?;
    let kind: Option<StateKind> = kind.map(str::parse).transpose()?;

    let cache = StateCache::new(store, SyncConfig::default().cache_idle_ttl);
    let removed = clear(&cache, &owner, kind)?;

    info!(%owner, removed, "cleared cache");
    println!("Removed {} cached document(s) for {}", removed, owner);
    Ok(())
}

/// Invalidates the owner's documents and returns how many fewer are
/// persisted afterwards. Entries written concurrently by another process
/// can make that zero.
fn clear(cache: &StateCache, owner: &OwnerKey, kind: Option<StateKind>) -> SyncResult<usize> {
    let before = cache.persisted(Some(owner))?.len();
    cache.invalidate(owner, kind);
    let after = cache.persisted(Some(owner))?.len();
    Ok(before.saturating_sub(after))
}
