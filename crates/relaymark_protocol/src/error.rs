//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while validating input or converting records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A caller-supplied value is malformed.
    #[error("invalid {field}: {reason}")]
    InvalidInput {
        /// Name of the offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// A relay record could not be turned into a document.
    #[error("decode failure: {0}")]
    Decode(String),

    /// A document could not be turned into record content.
    #[error("encode failure: {0}")]
    Encode(String),
}

impl ProtocolError {
    /// Creates an invalid-input error.
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::invalid("event_id", "must not be empty");
        assert_eq!(err.to_string(), "invalid event_id: must not be empty");

        let err = ProtocolError::Decode("expected array".into());
        assert!(err.to_string().contains("expected array"));
    }
}
