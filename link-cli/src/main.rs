//! # peerlink
//!
//! CLI tool for peerlink sessions.
//!
//! ## Commands
//!
//! - `host`: Create a session and wait for a peer
//! - `join`: Join a hosted session
//! - `inspect`: Print a session record from the mailbox
//! - `sweep`: Run one janitor pass over the mailbox
//!
//! ## Example
//!
//! ```bash
//! # On the first machine (sharing peerlink.db with the second)
//! peerlink host T1
//!
//! # On the second machine
//! peerlink join T1
//!
//! # Lines typed on either side are sent over the data channel.
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use link_client::LinkConfig;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;

use commands::{chat, inspect, sweep};

/// Default configuration file, used when present.
const DEFAULT_CONFIG: &str = "peerlink.toml";

/// CLI tool for peerlink sessions.
#[derive(Parser, Debug)]
#[command(name = "peerlink")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: peerlink.toml if it exists)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Log filter, overrides RUST_LOG (for example `debug` or `link_client=trace`)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a session and wait for a peer
    Host {
        /// Session id (for example a tournament id)
        session: String,
    },

    /// Join a hosted session
    Join {
        /// Session id
        session: String,
    },

    /// Print a session record as JSON
    Inspect {
        /// Session id; lists every session when omitted
        session: Option<String>,
    },

    /// Drop expired signals and abandoned sessions once
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref())?;

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Host { session } => {
            chat::run(&config, &session, link_types::Role::Host).await?;
        }
        Commands::Join { session } => {
            chat::run(&config, &session, link_types::Role::Peer).await?;
        }
        Commands::Inspect { session } => {
            inspect::run(&config, session.as_deref()).await?;
        }
        Commands::Sweep => {
            sweep::run(&config).await?;
        }
    }

    Ok(())
}

fn init_tracing(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).context("Invalid log level")?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!(e))
}

/// Load the configuration.
///
/// An explicit path must exist. Without one, `peerlink.toml` is read if it
/// exists and defaults are used otherwise.
fn load_config(path: Option<&Path>) -> Result<LinkConfig> {
    match path {
        Some(path) => LinkConfig::from_file(path).context("Failed to load configuration"),
        None => {
            let default = Path::new(DEFAULT_CONFIG);
            if default.exists() {
                LinkConfig::from_file(default).context("Failed to load configuration")
            } else {
                Ok(LinkConfig::default())
            }
        }
    }
}
