//! The persisted session record and its pure operations.
//!
//! Storage backends load a record, call one of these methods and store it
//! back. Keeping the rules here means every backend behaves identically.

use link_types::constants::SESSION_RECORD_VERSION;
use link_types::{PeerId, SessionId, SignalEnvelope};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Host availability as advertised in the session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    /// Host is present.
    Active,
    /// Host finished gathering and accepts connections.
    Ready,
}

/// Bookkeeping fields of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    /// Record layout version.
    pub version: u32,
    /// Creation time (ms since epoch).
    pub created: u64,
    /// Last liveness refresh from the host (ms since epoch).
    pub last_host_ping: u64,
    /// Whether the host accepts connections.
    pub ready_for_connections: bool,
}

/// One session in the mailbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Session id (the synchronized document id).
    pub session_id: SessionId,
    /// Current host.
    pub host_id: PeerId,
    /// Advertised host status.
    pub host_status: HostStatus,
    /// Last write (ms since epoch).
    pub last_active: u64,
    /// Peers with an open channel. No duplicates.
    pub connected_peers: Vec<PeerId>,
    /// Pending envelopes in insertion order.
    pub messages: Vec<SignalEnvelope>,
    /// Bookkeeping.
    pub metadata: SessionMetadata,
}

/// Partial update merged by [`SessionRecord::apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPatch {
    /// New host.
    pub host_id: Option<PeerId>,
    /// New host status.
    pub host_status: Option<HostStatus>,
    /// New readiness flag.
    pub ready_for_connections: Option<bool>,
    /// New liveness time.
    pub last_host_ping: Option<u64>,
}

impl SessionPatch {
    /// Host finished gathering.
    pub fn ready() -> Self {
        Self {
            host_status: Some(HostStatus::Ready),
            ready_for_connections: Some(true),
            ..Self::default()
        }
    }

    /// Host liveness refresh.
    pub fn host_alive(now_ms: u64) -> Self {
        Self {
            host_status: Some(HostStatus::Active),
            ready_for_connections: Some(true),
            last_host_ping: Some(now_ms),
            ..Self::default()
        }
    }
}

/// Result of a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Envelopes removed for age.
    pub messages_expired: usize,
    /// Sessions deleted as abandoned.
    pub sessions_removed: usize,
}

impl SweepReport {
    /// Fold another report into this one.
    pub fn merge(&mut self, other: SweepReport) {
        self.messages_expired += other.messages_expired;
        self.sessions_removed += other.sessions_removed;
    }
}

impl SessionRecord {
    /// A fresh record for a host that just arrived.
    pub fn new(session_id: SessionId, host_id: PeerId, now_ms: u64) -> Self {
        Self {
            session_id,
            host_id,
            host_status: HostStatus::Active,
            last_active: now_ms,
            connected_peers: Vec::new(),
            messages: Vec::new(),
            metadata: SessionMetadata {
                version: SESSION_RECORD_VERSION,
                created: now_ms,
                last_host_ping: now_ms,
                ready_for_connections: false,
            },
        }
    }

    /// Take the host fields of `incoming` while keeping our envelopes,
    /// connected peers and creation time.
    pub fn adopt(&mut self, incoming: SessionRecord) {
        let created = self.metadata.created;
        self.host_id = incoming.host_id;
        self.host_status = incoming.host_status;
        self.last_active = incoming.last_active;
        self.metadata = incoming.metadata;
        self.metadata.created = created;
    }

    /// Merge a patch and refresh the last-active time.
    pub fn apply(&mut self, patch: SessionPatch, now_ms: u64) {
        if let Some(host_id) = patch.host_id {
            self.host_id = host_id;
        }
        if let Some(status) = patch.host_status {
            self.host_status = status;
        }
        if let Some(ready) = patch.ready_for_connections {
            self.metadata.ready_for_connections = ready;
        }
        if let Some(ping) = patch.last_host_ping {
            self.metadata.last_host_ping = ping;
        }
        self.last_active = now_ms;
    }

    /// Envelope expiry window: the base window, doubled while any peer is
    /// connected.
    pub fn message_expiry_ms(&self, base: Duration) -> u64 {
        let base = base.as_millis() as u64;
        if self.connected_peers.is_empty() {
            base
        } else {
            base.saturating_mul(2)
        }
    }

    /// Drop envelopes older than the expiry window. Returns how many.
    pub fn expire_messages(&mut self, now_ms: u64, base: Duration) -> usize {
        let window = self.message_expiry_ms(base);
        let before = self.messages.len();
        self.messages.retain(|m| m.age_ms(now_ms) <= window);
        before - self.messages.len()
    }

    /// Append an envelope.
    ///
    /// Expired envelopes are swept first and an older offer/answer on the
    /// same route is dropped. If the timestamp is already taken the envelope
    /// is stored under the next free one. Returns the stored timestamp.
    pub fn push_signal(&mut self, mut envelope: SignalEnvelope, now_ms: u64, base: Duration) -> u64 {
        self.expire_messages(now_ms, base);
        self.messages.retain(|m| !m.is_superseded_by(&envelope));

        if self.messages.iter().any(|m| m.timestamp == envelope.timestamp) {
            let max = self.messages.iter().map(|m| m.timestamp).max().unwrap_or(0);
            envelope.timestamp = max + 1;
        }

        let timestamp = envelope.timestamp;
        self.messages.push(envelope);
        self.last_active = now_ms;
        timestamp
    }

    /// Envelopes for `receiver`: control first, then offers/answers, then
    /// candidates, each group by timestamp.
    pub fn signals_for(&self, receiver: &PeerId) -> Vec<SignalEnvelope> {
        let mut signals: Vec<SignalEnvelope> = self
            .messages
            .iter()
            .filter(|m| m.is_for(receiver))
            .cloned()
            .collect();
        signals.sort_by_key(|m| (m.kind.delivery_rank(), m.timestamp));
        signals
    }

    /// Remove the first envelope with `timestamp`.
    pub fn remove_signal(&mut self, timestamp: u64) -> bool {
        match self.messages.iter().position(|m| m.timestamp == timestamp) {
            Some(index) => {
                self.messages.remove(index);
                true
            }
            None => false,
        }
    }

    /// Add a connected peer. Returns whether it was new.
    pub fn add_peer(&mut self, peer: &PeerId) -> bool {
        if self.connected_peers.contains(peer) {
            return false;
        }
        self.connected_peers.push(peer.clone());
        true
    }

    /// Remove a connected peer. Returns whether it was present.
    pub fn remove_peer(&mut self, peer: &PeerId) -> bool {
        let before = self.connected_peers.len();
        self.connected_peers.retain(|p| p != peer);
        before != self.connected_peers.len()
    }

    /// Whether the janitor may delete this session: idle for longer than
    /// `session_expiry`, nobody connected and nothing pending.
    pub fn is_abandoned(&self, now_ms: u64, session_expiry: Duration) -> bool {
        let idle = now_ms.saturating_sub(self.last_active);
        idle > session_expiry.as_millis() as u64
            && self.connected_peers.is_empty()
            && self.messages.is_empty()
    }
}
