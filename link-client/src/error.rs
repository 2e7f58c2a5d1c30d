//! Error types for link-client.

use crate::config::ConfigError;
use link_mailbox::MailboxError;
use link_types::{SessionId, TypesError};
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The engine task is gone.
    #[error("engine stopped")]
    Stopped,

    /// An engine for this session is already running.
    #[error("session already open: {0}")]
    AlreadyOpen(SessionId),

    /// Message encoding error.
    #[error("message error: {0}")]
    Message(#[from] TypesError),

    /// Mailbox error.
    #[error("mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(ClientError::Stopped.to_string(), "engine stopped");
        let id = SessionId::new("T1").unwrap();
        assert_eq!(
            ClientError::AlreadyOpen(id).to_string(),
            "session already open: T1"
        );
    }
}
