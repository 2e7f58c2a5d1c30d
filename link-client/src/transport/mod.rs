//! Transport abstraction for peerlink.
//!
//! A transport is one peer connection object plus its data channel. The
//! engine creates a fresh one for every connection attempt through a
//! [`TransportFactory`] and drives it with the negotiation steps below.
//!
//! # Design
//!
//! Calls go engine → transport; callbacks go transport → engine as
//! [`TransportEvent`]s on a channel. Every event is tagged with the
//! generation of the transport that produced it, so the engine can drop
//! late events from a transport it already closed.

mod mock;
mod rtc;

pub use mock::MockNetwork;
pub use rtc::{WebRtcFactory, WebRtcTransport};

use async_trait::async_trait;
use link_core::{IceConnectionState, IceGatheringState, SignalingState};
use link_types::{IceCandidate, Role, SessionDescription};
use thiserror::Error;
use tokio::sync::mpsc;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Creating the connection object failed.
    #[error("connection setup failed: {0}")]
    Setup(String),

    /// An offer/answer step failed.
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// A remote candidate was refused.
    #[error("candidate rejected: {0}")]
    Candidate(String),

    /// The data channel is not open.
    #[error("not connected")]
    NotConnected,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The connection object is closed.
    #[error("connection closed")]
    Closed,
}

/// Callback from a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The connection wants (re)negotiation.
    NegotiationNeeded,
    /// A local candidate was discovered.
    LocalCandidate(IceCandidate),
    /// Gathering phase changed.
    IceGatheringChanged(IceGatheringState),
    /// ICE connectivity changed.
    IceConnectionChanged(IceConnectionState),
    /// Signaling state changed.
    SignalingChanged(SignalingState),
    /// The data channel opened.
    ChannelOpened,
    /// The data channel closed or errored.
    ChannelClosed {
        /// Why.
        reason: String,
    },
    /// Bytes arrived on the data channel.
    Message(Vec<u8>),
}

/// Sending half of the engine's transport event channel, bound to one
/// transport generation.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl TransportEvents {
    /// Bind `tx` to `generation`.
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { generation, tx }
    }

    /// Generation this sender belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver an event. Returns `false` once the engine is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }
}

/// One peer connection with its data channel.
///
/// Offer/answer methods both generate a description and apply it locally.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Create an offer and set it as the local description.
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, TransportError>;

    /// Apply a remote offer, rolling back a pending local offer first if
    /// needed, then create and apply the answer.
    async fn accept_offer(
        &self,
        offer: SessionDescription,
        rollback: bool,
    ) -> Result<SessionDescription, TransportError>;

    /// Apply a remote answer.
    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), TransportError>;

    /// Add a remote candidate.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    /// Send bytes over the data channel.
    async fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Whether the data channel is open.
    fn is_open(&self) -> bool;

    /// Close channel and connection.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Creates transports.
///
/// The host side is expected to create the data channel, which makes the
/// transport emit [`TransportEvent::NegotiationNeeded`].
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Create a transport for `role`, reporting through `events`.
    async fn open(
        &self,
        role: Role,
        events: TransportEvents,
    ) -> Result<Box<dyn PeerTransport>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_with_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = TransportEvents::new(7, tx);
        assert!(events.emit(TransportEvent::ChannelOpened));
        assert_eq!(rx.try_recv().unwrap(), (7, TransportEvent::ChannelOpened));

        drop(rx);
        assert!(!events.emit(TransportEvent::NegotiationNeeded));
    }
}
