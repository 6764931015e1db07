//! Offline queue commands: list, discard failed, re-arm failed.

use super::{open_store, parse_owner};
use relaymark_protocol::{OperationStatus, OwnerKey, QueuedOperation};
use relaymark_sync_engine::{OfflineQueue, SyncConfig};
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Queue listing for one owner.
#[derive(Debug, Serialize)]
pub struct OwnerQueue {
    /// Owner key.
    pub owner: String,
    /// Number of queued operations.
    pub pending: usize,
    /// Number of operations marked failed.
    pub failed: usize,
    /// Operations in replay order.
    pub operations: Vec<QueuedOperation>,
}

fn open_queue(path: &Path) -> Result<OfflineQueue, Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    Ok(OfflineQueue::new(store, SyncConfig::default().queue_max_retries))
}

/// Lists queued operations, for one owner or every owner with a queue.
pub fn collect(path: &Path, owner: Option<&str>) -> Result<Vec<OwnerQueue>, Box<dyn std::error::Error>> {
    let queue = open_queue(path)?;
    let owners = match parse_owner(owner)? {
        Some(owner) => vec![owner],
        None => queue.owners()?,
    };

    Ok(owners
        .into_iter()
        .map(|owner| {
            let operations = queue.pending(&owner);
            OwnerQueue {
                owner: owner.to_string(),
                pending: operations.len(),
                failed: operations.iter().filter(|op| op.is_failed()).count(),
                operations,
            }
        })
        .collect())
}

/// Runs the queue command.
pub fn run_list(path: &Path, owner: Option<&str>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let queues = collect(path, owner)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&queues)?);
        }
        _ => {
            if queues.is_empty() {
                println!("No queued operations");
            }
            for q in &queues {
                println!("{}: {} queued, {} failed", q.owner, q.pending, q.failed);
                for op in &q.operations {
                    let status = match op.status {
                        OperationStatus::Pending => "pending",
                        OperationStatus::Failed => "FAILED",
                    };
                    println!(
                        "  {} {:<16} {:<7} retries={} enqueued_at={}",
                        op.id,
                        op.op.name(),
                        status,
                        op.retry_count,
                        op.enqueued_at
                    );
                    if let Some(err) = &op.last_error {
                        println!("      last error: {err}");
                    }
                }
            }
        }
    }

    Ok(())
}

/// Runs the discard-failed command.
pub fn run_discard(path: &Path, owner: &str) -> Result<usize, Box<dyn std::error::Error>> {
    let queue = open_queue(path)?;
    let owner = OwnerKey::parse(owner)?;
    let removed = queue.discard_failed(&owner);
    info!(%owner, removed, "discarded failed operations");
    println!("Discarded {removed} failed operation(s) for {owner}");
    Ok(removed)
}

/// Runs the rearm-failed command.
pub fn run_rearm(path: &Path, owner: &str) -> Result<usize, Box<dyn std::error::Error>> {
    let queue = open_queue(path)?;
    let owner = OwnerKey::parse(owner)?;
    let rearmed = queue.rearm_failed(&owner);
    info!(%owner, rearmed, "re-armed failed operations");
    println!("Re-armed {rearmed} failed operation(s) for {owner}");
    Ok(rearmed)
}
