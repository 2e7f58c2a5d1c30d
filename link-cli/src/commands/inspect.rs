//! Print session records.

use anyhow::{Context, Result};
use link_client::LinkConfig;
use link_mailbox::Mailbox;
use link_types::SessionId;

use super::open_mailbox;

/// Run the inspect command.
pub async fn run(config: &LinkConfig, session: Option<&str>) -> Result<()> {
    let mailbox = open_mailbox(config).await?;

    let Some(session) = session else {
        let sessions = mailbox.list_sessions().await?;
        if sessions.is_empty() {
            println!("No sessions in {}", config.mailbox.database.display());
        }
        for id in sessions {
            println!("{id}");
        }
        return Ok(());
    };

    let session_id = SessionId::new(session).context("Invalid session id")?;
    match mailbox.get_session(&session_id).await? {
        Some(record) => {
            let json = serde_json::to_string_pretty(&record)
                .context("Failed to format session record")?;
            println!("{json}");
        }
        None => println!("Session {session_id} not found"),
    }
    Ok(())
}
