//! # link-types
//!
//! Shared types for the peerlink signaling and synchronization engine.
//!
//! This crate provides the foundational types used across all peerlink crates:
//! - [`SessionId`], [`PeerId`], [`Role`] - Identity and politeness
//! - [`SignalEnvelope`], [`SignalKind`] - Mailbox signaling messages
//! - [`SessionDescription`], [`IceCandidate`] - Negotiation payloads
//! - [`AppMessage`] - Versioned application envelope carried over the channel
//! - [`constants`] - Protocol version and timing defaults
//! - [`TypesError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod constants;
mod error;
mod ids;
mod message;
mod signal;

pub use constants::PROTOCOL_VERSION;
pub use error::TypesError;
pub use ids::{PeerId, Role, SessionId};
pub use message::AppMessage;
pub use signal::{IceCandidate, SdpKind, SessionDescription, SignalEnvelope, SignalKind};

/// Milliseconds since the Unix epoch, or 0 if the system clock is before it.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
