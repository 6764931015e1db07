//! Inspect command implementation.

use super::{open_store, parse_owner};
use relaymark_protocol::StateValue;
use relaymark_sync_engine::{StateCache, SyncConfig};
use serde::Serialize;
use std::path::Path;

/// Cache inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Number of cached documents.
    pub document_count: usize,
    /// Number of documents holding unpublished writes.
    pub unconfirmed_count: usize,
    /// The cached documents.
    pub documents: Vec<DocumentSummary>,
}

/// One cached document.
#[derive(Debug, Serialize)]
pub struct DocumentSummary {
    /// Owner key.
    pub owner: String,
    /// Document kind.
    pub kind: String,
    /// Whether the relays acknowledged this value.
    pub confirmed: bool,
    /// When the entry was written (seconds since the Unix epoch).
    pub fetched_at: u64,
    /// `created_at` of the mirrored relay record.
    pub version: u64,
    /// Number of items.
    pub item_count: usize,
    /// Decoded value (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<StateValue>,
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    owner: Option<&str>,
    show_items: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = collect(path, owner, show_items)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Reads every persisted cache entry, optionally for one owner.
pub fn collect(
    path: &Path,
    owner: Option<&str>,
    show_items: bool,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let owner = parse_owner(owner)?;
    let cache = StateCache::new(store, SyncConfig::default().cache_idle_ttl);

    let documents: Vec<DocumentSummary> = cache
        .persisted(owner.as_ref())?
        .into_iter()
        .map(|(key, entry)| DocumentSummary {
            owner: key.owner.to_string(),
            kind: key.kind.to_string(),
            confirmed: entry.confirmed,
            fetched_at: entry.fetched_at,
            version: entry.version,
            item_count: entry.value.len(),
            value: show_items.then_some(entry.value),
        })
        .collect();

    Ok(InspectResult {
        path: path.display().to_string(),
        document_count: documents.len(),
        unconfirmed_count: documents.iter().filter(|d| !d.confirmed).count(),
        documents,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Relaymark Cache Inspection");
    println!("==========================");
    println!();
    println!("Path: {}", result.path);
    println!("Documents:   {}", result.document_count);
    println!("Unconfirmed: {}", result.unconfirmed_count);

    for doc in &result.documents {
        println!();
        println!(
            "{}/{}  {} items, {}, version {}",
            doc.owner,
            doc.kind,
            doc.item_count,
            if doc.confirmed { "confirmed" } else { "optimistic" },
            doc.version
        );
        match &doc.value {
            Some(StateValue::BookmarkList(ids)) => {
                for id in ids {
                    println!("  {id}");
                }
            }
            Some(StateValue::BookmarkCollections(collections)) => {
                for c in collections {
                    println!("  [{}] {}", c.id, c.name);
                }
            }
            Some(StateValue::BookmarkMetadata(metadata)) => {
                for m in metadata {
                    println!(
                        "  {} collection={} tags={}",
                        m.event_id,
                        m.collection_id.as_deref().unwrap_or("-"),
                        m.tags.join(",")
                    );
                }
            }
            None => {}
        }
    }
}
