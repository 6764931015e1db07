//! Error types for the sync engine.

use relaymark_protocol::ProtocolError;
use relaymark_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// `Clone` so that every caller joined on one deduplicated fetch receives
/// the same failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// No owner key is available.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Malformed caller input, rejected before any cache or network work.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The gateway has no reachable relay.
    #[error("no relay reachable")]
    NetworkUnavailable,

    /// Every publish attempt failed; the optimistic write was rolled back.
    #[error("publish failed after {attempts} attempts: {message}")]
    PublishExhausted {
        /// Attempts made.
        attempts: u32,
        /// Message of the last failure.
        message: String,
    },

    /// A relay returned a payload that does not parse.
    #[error("decode failure: {0}")]
    Decode(String),

    /// Relay gateway error.
    #[error("gateway error: {message}")]
    Gateway {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The fetch did not settle in time.
    #[error("operation timed out")]
    Timeout,

    /// Persistent storage failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// An operation was routed to the adapter of another kind.
    #[error("operation {op} does not apply to {kind}")]
    KindMismatch {
        /// Operation name.
        op: &'static str,
        /// Document kind.
        kind: &'static str,
    },
}

impl SyncError {
    /// Creates a retryable gateway error.
    pub fn gateway_retryable(message: impl Into<String>) -> Self {
        Self::Gateway {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable gateway error.
    pub fn gateway_fatal(message: impl Into<String>) -> Self {
        Self::Gateway {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Gateway { retryable, .. } => *retryable,
            SyncError::Timeout | SyncError::NetworkUnavailable => true,
            _ => false,
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidInput { .. } => SyncError::InvalidInput(err.to_string()),
            ProtocolError::Decode(msg) => SyncError::Decode(msg),
            ProtocolError::Encode(msg) => SyncError::InvalidInput(msg),
        }
    }
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        SyncError::Storage(err.to_string())
    }
}
