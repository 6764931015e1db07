//! CLI command implementations.

pub mod cache;
pub mod inspect;
pub mod queue;

use relaymark_protocol::OwnerKey;
use relaymark_storage::FileKvStore;
use std::path::Path;
use std::sync::Arc;

/// Opens the store directory, refusing to create one.
pub fn open_store(path: &Path) -> Result<Arc<FileKvStore>, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No relaymark store found at {:?}", path).into());
    }
    Ok(Arc::new(FileKvStore::open(path)?))
}

/// Parses an optional owner argument.
pub fn parse_owner(owner: Option<&str>) -> Result<Option<OwnerKey>, Box<dyn std::error::Error>> {
    Ok(owner.map(OwnerKey::parse).transpose()?)
}
