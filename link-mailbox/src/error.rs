//! Error types for link-mailbox.

use std::path::PathBuf;

/// Mailbox storage errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Session record could not be encoded.
    #[error("record encoding failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Stored session record could not be decoded.
    #[error("record decoding failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Stored session id is not valid.
    #[error("invalid stored session id: {0}")]
    InvalidId(#[from] link_types::TypesError),

    /// Session does not exist.
    #[error("session not found: {session_id}")]
    SessionNotFound {
        /// The missing session id.
        session_id: String,
    },

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

/// Result type alias for mailbox operations.
pub type MailboxResult<T> = std::result::Result<T, MailboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_session() {
        let err = MailboxError::SessionNotFound {
            session_id: "T1".into(),
        };
        assert_eq!(err.to_string(), "session not found: T1");
    }
}
