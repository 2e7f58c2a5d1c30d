//! Error types for peerlink shared types.

use thiserror::Error;

use crate::SignalKind;

/// Errors that can occur while encoding or decoding shared types.
#[derive(Debug, Error)]
pub enum TypesError {
    /// JSON encoding or decoding failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Envelope payload does not match its kind
    #[error("malformed {kind} payload: {reason}")]
    MalformedPayload {
        /// Kind of the offending envelope.
        kind: SignalKind,
        /// What was wrong with it.
        reason: String,
    },

    /// Identifier was empty or otherwise unusable
    #[error("invalid id: {0:?}")]
    InvalidId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = TypesError::MalformedPayload {
            kind: SignalKind::Answer,
            reason: "missing sdp".into(),
        };
        assert_eq!(err.to_string(), "malformed answer payload: missing sdp");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TypesError>();
    }
}
