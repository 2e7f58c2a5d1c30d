//! Mailbox and janitor configuration sections.

use link_types::constants::{JANITOR_INTERVAL, MESSAGE_EXPIRY, SESSION_EXPIRY};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// `[mailbox]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct MailboxConfig {
    /// Path to the shared SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
    /// Base envelope expiry in milliseconds (doubled with a connected peer).
    #[serde(default = "default_message_expiry_ms")]
    pub message_expiry_ms: u64,
}

/// `[janitor]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct JanitorConfig {
    /// Enable the janitor task (default: true).
    #[serde(default = "default_janitor_enabled")]
    pub enabled: bool,
    /// Sweep interval in seconds (default: 60).
    #[serde(default = "default_janitor_interval")]
    pub interval_secs: u64,
    /// Inactivity before an empty session is deleted, in seconds (default: 1 hour).
    #[serde(default = "default_session_expiry")]
    pub session_expiry_secs: u64,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("peerlink.db")
}

fn default_message_expiry_ms() -> u64 {
    MESSAGE_EXPIRY.as_millis() as u64
}

fn default_janitor_enabled() -> bool {
    true
}

fn default_janitor_interval() -> u64 {
    JANITOR_INTERVAL.as_secs()
}

fn default_session_expiry() -> u64 {
    SESSION_EXPIRY.as_secs()
}

impl MailboxConfig {
    /// Base envelope expiry.
    pub fn message_expiry(&self) -> Duration {
        Duration::from_millis(self.message_expiry_ms)
    }
}

impl JanitorConfig {
    /// Sweep interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Session inactivity window.
    pub fn session_expiry(&self) -> Duration {
        Duration::from_secs(self.session_expiry_secs)
    }
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            message_expiry_ms: default_message_expiry_ms(),
        }
    }
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            enabled: default_janitor_enabled(),
            interval_secs: default_janitor_interval(),
            session_expiry_secs: default_session_expiry(),
        }
    }
}
