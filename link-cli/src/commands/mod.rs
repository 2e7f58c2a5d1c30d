//! CLI command implementations.

pub mod chat;
pub mod inspect;
pub mod sweep;

use anyhow::{Context, Result};
use link_client::LinkConfig;
use link_mailbox::SqliteMailbox;

/// Open the shared mailbox named in the configuration.
pub async fn open_mailbox(config: &LinkConfig) -> Result<SqliteMailbox> {
    let path = &config.mailbox.database;
    SqliteMailbox::new(path, config.mailbox.message_expiry())
        .await
        .with_context(|| format!("Failed to open mailbox {}", path.display()))
}
