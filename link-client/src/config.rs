//! Configuration loading for peerlink engines.
//!
//! Configuration is loaded from a TOML file (default: `peerlink.toml`).
//! Every field has a default, so an empty file is a valid configuration.

use link_core::Timings;
use link_mailbox::{JanitorConfig, MailboxConfig};
use link_types::constants::{
    CONNECTION_TIMEOUT, HOST_PING_INTERVAL, HOST_READY_TIMEOUT, ICE_GATHERING_TIMEOUT,
    MAX_RECONNECT_ATTEMPTS, OFFER_WAIT, POLL_INTERVAL, RECONNECT_DELAY,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LinkConfig {
    /// Engine timing.
    #[serde(default)]
    pub timing: TimingConfig,
    /// Shared mailbox.
    #[serde(default)]
    pub mailbox: MailboxConfig,
    /// Mailbox janitor.
    #[serde(default)]
    pub janitor: JanitorConfig,
    /// ICE and data channel settings.
    #[serde(default)]
    pub ice: IceConfig,
}

/// `[timing]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    /// Mailbox poll period (default: 1000 ms).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Delay before each reconnect attempt (default: 2000 ms).
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    /// Reconnect attempts before giving up (default: 3).
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// ICE gathering timeout (default: 10000 ms).
    #[serde(default = "default_ice_gathering_timeout")]
    pub ice_gathering_timeout_ms: u64,
    /// Connection establishment timeout (default: 30000 ms).
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_ms: u64,
    /// How long a peer waits for the host to be ready (default: 30000 ms).
    #[serde(default = "default_host_ready_timeout")]
    pub host_ready_timeout_ms: u64,
    /// How long a peer waits for an offer before asking again (default: 3000 ms).
    #[serde(default = "default_offer_wait")]
    pub offer_wait_ms: u64,
    /// Host liveness refresh period (default: 5000 ms).
    #[serde(default = "default_host_ping_interval")]
    pub host_ping_interval_ms: u64,
}

/// `[ice]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct IceConfig {
    /// STUN server URLs.
    #[serde(default = "default_stun_servers")]
    pub stun_servers: Vec<String>,
    /// Label of the data channel the host creates.
    #[serde(default = "default_channel_label")]
    pub channel_label: String,
}

// Default value functions
fn ms(d: Duration) -> u64 {
    d.as_millis() as u64
}

fn default_poll_interval() -> u64 {
    ms(POLL_INTERVAL)
}

fn default_reconnect_delay() -> u64 {
    ms(RECONNECT_DELAY)
}

fn default_max_reconnect_attempts() -> u32 {
    MAX_RECONNECT_ATTEMPTS
}

fn default_ice_gathering_timeout() -> u64 {
    ms(ICE_GATHERING_TIMEOUT)
}

fn default_connection_timeout() -> u64 {
    ms(CONNECTION_TIMEOUT)
}

fn default_host_ready_timeout() -> u64 {
    ms(HOST_READY_TIMEOUT)
}

fn default_offer_wait() -> u64 {
    ms(OFFER_WAIT)
}

fn default_host_ping_interval() -> u64 {
    ms(HOST_PING_INTERVAL)
}

fn default_stun_servers() -> Vec<String> {
    vec!["stun:stun.l.google.com:19302".to_string()]
}

fn default_channel_label() -> String {
    "peerlink".to_string()
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            reconnect_delay_ms: default_reconnect_delay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            ice_gathering_timeout_ms: default_ice_gathering_timeout(),
            connection_timeout_ms: default_connection_timeout(),
            host_ready_timeout_ms: default_host_ready_timeout(),
            offer_wait_ms: default_offer_wait(),
            host_ping_interval_ms: default_host_ping_interval(),
        }
    }
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_servers: default_stun_servers(),
            channel_label: default_channel_label(),
        }
    }
}

impl TimingConfig {
    /// Convert to the engine's timing parameters.
    pub fn to_timings(&self) -> Timings {
        Timings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            max_reconnect_attempts: self.max_reconnect_attempts,
            ice_gathering_timeout: Duration::from_millis(self.ice_gathering_timeout_ms),
            connection_timeout: Duration::from_millis(self.connection_timeout_ms),
            host_ready_timeout: Duration::from_millis(self.host_ready_timeout_ms),
            offer_wait: Duration::from_millis(self.offer_wait_ms),
            host_ping_interval: Duration::from_millis(self.host_ping_interval_ms),
        }
    }
}

impl LinkConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_config_is_all_defaults() {
        let config: LinkConfig = toml::from_str("").unwrap();
        assert_eq!(config.timing.to_timings(), Timings::default());
        assert_eq!(config.mailbox.database, PathBuf::from("peerlink.db"));
        assert!(config.janitor.enabled);
        assert_eq!(config.ice.channel_label, "peerlink");
        assert_eq!(config.ice.stun_servers.len(), 1);
    }

    #[test]
    fn sections_override_fields() {
        let config: LinkConfig = toml::from_str(
            r#"
            [timing]
            max_reconnect_attempts = 5
            reconnect_delay_ms = 500

            [mailbox]
            database = "/tmp/shared.db"

            [ice]
            stun_servers = []
            "#,
        )
        .unwrap();

        let timings = config.timing.to_timings();
        assert_eq!(timings.max_reconnect_attempts, 5);
        assert_eq!(timings.reconnect_delay, Duration::from_millis(500));
        assert_eq!(timings.poll_interval, Duration::from_secs(1));
        assert_eq!(config.mailbox.database, PathBuf::from("/tmp/shared.db"));
        assert!(config.ice.stun_servers.is_empty());
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[janitor]\nenabled = false").unwrap();

        let config = LinkConfig::from_file(file.path()).unwrap();
        assert!(!config.janitor.enabled);
    }

    #[test]
    fn from_file_reports_path() {
        let err = LinkConfig::from_file(std::path::Path::new("/nonexistent/peerlink.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
        assert!(err.to_string().contains("/nonexistent/peerlink.toml"));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[timing\nbroken").unwrap();
        assert!(matches!(
            LinkConfig::from_file(file.path()),
            Err(ConfigError::ParseError { .. })
        ));
    }
}
