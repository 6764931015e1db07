//! Relaymark CLI
//!
//! Operator tools for the local state of a relaymark client: the persisted
//! document cache and the offline operation queue.
//!
//! # Commands
//!
//! - `inspect` - Display cached documents
//! - `queue` - List queued offline operations
//! - `discard-failed` - Drop operations that exhausted their retries
//! - `rearm-failed` - Give failed operations a fresh retry budget
//! - `clear-cache` - Drop an owner's cached documents

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Relaymark command-line tools.
#[derive(Parser)]
#[command(name = "relaymark")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display cached documents
    Inspect {
        /// Only show this owner
        #[arg(short, long)]
        owner: Option<String>,

        /// Show document contents
        #[arg(short, long)]
        items: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List queued offline operations
    Queue {
        /// Only show this owner
        #[arg(short, long)]
        owner: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Drop an owner's failed operations, unblocking the rest of the queue
    DiscardFailed {
        /// Owner key
        owner: String,
    },

    /// Reset an owner's failed operations to pending
    RearmFailed {
        /// Owner key
        owner: String,
    },

    /// Drop an owner's cached documents
    ClearCache {
        /// Owner key
        owner: String,

        /// Only this kind (bookmark-list, bookmark-collections, bookmark-metadata)
        #[arg(short, long)]
        kind: Option<String>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect {
            owner,
            items,
            format,
        } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, owner.as_deref(), items, &format)?;
        }
        Commands::Queue { owner, format } => {
            let path = cli.path.ok_or("Store path required for queue")?;
            commands::queue::run_list(&path, owner.as_deref(), &format)?;
        }
        Commands::DiscardFailed { owner } => {
            let path = cli.path.ok_or("Store path required for discard-failed")?;
            commands::queue::run_discard(&path, &owner)?;
        }
        Commands::RearmFailed { owner } => {
            let path = cli.path.ok_or("Store path required for rearm-failed")?;
            commands::queue::run_rearm(&path, &owner)?;
        }
        Commands::ClearCache { owner, kind } => {
            let path = cli.path.ok_or("Store path required for clear-cache")?;
            commands::cache::run(&path, &owner, kind.as_deref())?;
        }
        Commands::Version => {
            println!("Relaymark CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
