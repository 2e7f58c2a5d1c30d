//! Background janitor for the mailbox.
//!
//! Runs periodically to drop expired envelopes and delete sessions nobody
//! uses anymore.

use crate::config::JanitorConfig;
use crate::error::MailboxResult;
use crate::record::SweepReport;
use crate::Mailbox;
use link_types::now_ms;
use std::sync::Arc;
use tokio::time::interval;

/// Run a single sweep with the configured session expiry.
pub async fn run_sweep(mailbox: &dyn Mailbox, config: &JanitorConfig) -> MailboxResult<SweepReport> {
    mailbox.sweep(now_ms(), config.session_expiry()).await
}

/// Spawn the background janitor task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_janitor(
    mailbox: Arc<dyn Mailbox>,
    config: JanitorConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Janitor disabled");
            return;
        }

        tracing::info!("Janitor started (interval: {}s)", config.interval_secs);

        let mut timer = interval(config.interval());

        loop {
            timer.tick().await;

            match run_sweep(mailbox.as_ref(), &config).await {
                Ok(report) => {
                    if report.sessions_removed > 0 || report.messages_expired > 0 {
                        tracing::info!(
                            sessions = report.sessions_removed,
                            messages = report.messages_expired,
                            "Janitor: swept mailbox"
                        );
                    } else {
                        tracing::debug!("Janitor: nothing to sweep");
                    }
                }
                Err(e) => {
                    tracing::error!("Janitor error: {}", e);
                }
            }
        }
    })
}
