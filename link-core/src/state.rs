//! Observable connection state.
//!
//! The application only ever sees a [`LinkState`]: a coarse status, an
//! optional reason string and diagnostic substates that never gate behavior.

use serde::Serialize;
use std::fmt;

/// Coarse connection status reported to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    /// No attempt in progress.
    Disconnected,
    /// Negotiating, or waiting to retry.
    Connecting,
    /// Peer role with an open channel.
    Connected,
    /// Host role with an open channel.
    Host,
}

impl LinkStatus {
    /// Whether the channel is open.
    pub fn is_open(self) -> bool {
        matches!(self, LinkStatus::Connected | LinkStatus::Host)
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkStatus::Disconnected => "disconnected",
            LinkStatus::Connecting => "connecting",
            LinkStatus::Connected => "connected",
            LinkStatus::Host => "host",
        };
        f.write_str(s)
    }
}

/// ICE gathering phase of the local connection object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IceGatheringState {
    /// Nothing gathered yet.
    New,
    /// Discovering local candidates.
    Gathering,
    /// All local candidates found.
    Complete,
}

/// ICE connectivity of the local connection object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IceConnectionState {
    /// Waiting for candidates.
    New,
    /// Checking candidate pairs.
    Checking,
    /// A usable pair was found.
    Connected,
    /// Checking finished.
    Completed,
    /// Connectivity lost, may recover.
    Disconnected,
    /// No usable pair.
    Failed,
    /// Shut down.
    Closed,
}

/// Offer/answer signaling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalingState {
    /// No exchange outstanding.
    Stable,
    /// Local offer applied, waiting for an answer.
    HaveLocalOffer,
    /// Remote offer applied, answer not yet created.
    HaveRemoteOffer,
    /// Connection object closed.
    Closed,
}

/// Raw negotiation substates surfaced for diagnostics only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    /// Last reported ICE gathering state.
    pub ice_gathering: Option<IceGatheringState>,
    /// Last reported ICE connection state.
    pub ice_connection: Option<IceConnectionState>,
    /// Last reported signaling state.
    pub signaling: Option<SignalingState>,
}

/// Snapshot of the engine state delivered to the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkState {
    /// Coarse status.
    pub status: LinkStatus,
    /// Remote parties with an open channel (host: from the mailbox peer list).
    pub connected_peers: usize,
    /// Reason of the last failure, if any.
    pub error: Option<String>,
    /// Reconnect attempts made since the last successful open.
    pub reconnect_attempts: u32,
    /// Diagnostic substates.
    pub diagnostics: Diagnostics,
}

impl LinkState {
    /// The initial, idle state.
    pub fn disconnected() -> Self {
        Self {
            status: LinkStatus::Disconnected,
            connected_peers: 0,
            error: None,
            reconnect_attempts: 0,
            diagnostics: Diagnostics::default(),
        }
    }
}

impl Default for LinkState {
    fn default() -> Self {
        Self::disconnected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_statuses() {
        assert!(!LinkStatus::Disconnected.is_open());
        assert!(!LinkStatus::Connecting.is_open());
        assert!(LinkStatus::Connected.is_open());
        assert!(LinkStatus::Host.is_open());
    }

    #[test]
    fn state_serializes_in_camel_case() {
        let mut state = LinkState::disconnected();
        state.diagnostics.signaling = Some(SignalingState::HaveLocalOffer);
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["status"], "disconnected");
        assert_eq!(value["connectedPeers"], 0);
        assert_eq!(value["diagnostics"]["signaling"], "have-local-offer");
    }
}
