//! One janitor pass.

use anyhow::{Context, Result};
use link_client::LinkConfig;
use link_mailbox::run_sweep;

use super::open_mailbox;

/// Run the sweep command.
pub async fn run(config: &LinkConfig) -> Result<()> {
    let mailbox = open_mailbox(config).await?;
    let report = run_sweep(&mailbox, &config.janitor)
        .await
        .context("Sweep failed")?;

    println!(
        "Swept {}: {} expired signals, {} sessions removed",
        config.mailbox.database.display(),
        report.messages_expired,
        report.sessions_removed
    );
    Ok(())
}
