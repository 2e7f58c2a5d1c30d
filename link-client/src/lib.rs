//! # link-client
//!
//! Serverless peer connection engine for peerlink.
//!
//! Two participants of a session establish a direct data channel without any
//! signaling server: offers, answers and ICE candidates travel through a
//! shared [`Mailbox`](link_mailbox::Mailbox) that both sides poll.
//!
//! ## Architecture
//!
//! Each engine runs as one tokio task that owns a pure
//! [`Negotiator`](link_core::Negotiator) and interprets its actions:
//!
//! ```text
//! Application → LinkHandle → engine task → PeerTransport → Network
//!                                ↓    ↘
//!                  link-core (pure)    Mailbox (shared storage)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use link_client::{LinkHandle, LinkOptions, MockNetwork};
//! use link_mailbox::MemoryMailbox;
//!
//! let mailbox = Arc::new(MemoryMailbox::new());
//! let network = Arc::new(MockNetwork::new());
//! let (host, _messages) = LinkHandle::spawn(
//!     LinkOptions::new(session_id, Role::Host),
//!     mailbox.clone(),
//!     network.clone(),
//! );
//! host.connect()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
mod engine;
pub mod error;
pub mod handle;
pub mod registry;
pub mod scheduler;
pub mod transport;

pub use config::{ConfigError, IceConfig, LinkConfig, TimingConfig};
pub use error::ClientError;
pub use handle::{LinkHandle, LinkOptions, Messages};
pub use registry::LinkRegistry;
pub use scheduler::TokioScheduler;
pub use transport::{
    MockNetwork, PeerTransport, TransportError, TransportEvent, TransportEvents,
    TransportFactory, WebRtcFactory, WebRtcTransport,
};
