//! Signaling envelopes exchanged through the mailbox.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{PeerId, TypesError};

/// Kind discriminator for a signaling envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    /// Session description proposing a connection
    Offer,
    /// Session description accepting an offer
    Answer,
    /// One trickled ICE candidate
    IceCandidate,
    /// Host finished gathering and accepts connections
    Ready,
    /// Peer asks the host for a fresh offer
    Renegotiate,
}

impl SignalKind {
    /// Only the newest envelope of a superseding kind is kept per
    /// (sender, receiver) pair.
    pub fn is_superseding(self) -> bool {
        matches!(self, SignalKind::Offer | SignalKind::Answer)
    }

    /// Delivery order within one poll batch.
    ///
    /// Control envelopes first, then descriptions, then candidates, so a
    /// candidate is never handed over before the description it depends on.
    pub fn delivery_rank(self) -> u8 {
        match self {
            SignalKind::Ready | SignalKind::Renegotiate => 0,
            SignalKind::Offer | SignalKind::Answer => 1,
            SignalKind::IceCandidate => 2,
        }
    }

    /// Wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice-candidate",
            SignalKind::Ready => "ready",
            SignalKind::Renegotiate => "renegotiate",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One signaling message stored in a session's mailbox.
///
/// Immutable once created. The timestamp doubles as the removal key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalEnvelope {
    /// Envelope kind
    #[serde(rename = "type")]
    pub kind: SignalKind,
    /// Participant that deposited the envelope
    pub sender_id: PeerId,
    /// Addressee; `None` broadcasts to anyone polling
    #[serde(default)]
    pub receiver_id: Option<PeerId>,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    /// Opaque negotiation payload
    #[serde(default)]
    pub data: serde_json::Value,
}

impl SignalEnvelope {
    /// Create a new envelope.
    pub fn new(
        kind: SignalKind,
        sender_id: PeerId,
        receiver_id: Option<PeerId>,
        timestamp: u64,
        data: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            sender_id,
            receiver_id,
            timestamp,
            data,
        }
    }

    /// Whether `peer` should receive this envelope.
    ///
    /// Addressed envelopes go to their receiver; broadcasts go to everyone
    /// except the sender.
    pub fn is_for(&self, peer: &PeerId) -> bool {
        match &self.receiver_id {
            Some(receiver) => receiver == peer,
            None => &self.sender_id != peer,
        }
    }

    /// Whether `newer` replaces this envelope in the mailbox.
    pub fn is_superseded_by(&self, newer: &SignalEnvelope) -> bool {
        self.kind.is_superseding()
            && self.kind == newer.kind
            && self.sender_id == newer.sender_id
            && self.receiver_id == newer.receiver_id
    }

    /// Age relative to `now_ms`, saturating at zero for clock skew.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.timestamp)
    }

    /// Decode the payload of an offer or answer.
    pub fn description(&self) -> Result<SessionDescription, TypesError> {
        let description: SessionDescription =
            serde_json::from_value(self.data.clone()).map_err(|e| {
                TypesError::MalformedPayload {
                    kind: self.kind,
                    reason: e.to_string(),
                }
            })?;
        let expected = match self.kind {
            SignalKind::Offer => SdpKind::Offer,
            SignalKind::Answer => SdpKind::Answer,
            other => {
                return Err(TypesError::MalformedPayload {
                    kind: other,
                    reason: "envelope does not carry a description".into(),
                })
            }
        };
        if description.kind != expected {
            return Err(TypesError::MalformedPayload {
                kind: self.kind,
                reason: format!("description type is {}", description.kind),
            });
        }
        Ok(description)
    }

    /// Decode the payload of an ICE candidate envelope.
    pub fn candidate(&self) -> Result<IceCandidate, TypesError> {
        if self.kind != SignalKind::IceCandidate {
            return Err(TypesError::MalformedPayload {
                kind: self.kind,
                reason: "envelope does not carry a candidate".into(),
            });
        }
        serde_json::from_value(self.data.clone()).map_err(|e| TypesError::MalformedPayload {
            kind: self.kind,
            reason: e.to_string(),
        })
    }
}

/// SDP type of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// An offer
    Offer,
    /// An answer
    Answer,
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpKind::Offer => f.write_str("offer"),
            SdpKind::Answer => f.write_str("answer"),
        }
    }
}

/// A local or remote session description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub kind: SdpKind,
    /// Raw SDP text
    pub sdp: String,
}

impl SessionDescription {
    /// Create an offer description.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Create an answer description.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }

    /// Encode as an envelope payload.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({ "type": self.kind, "sdp": self.sdp })
    }
}

/// A trickled ICE candidate in its browser-compatible JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate line
    pub candidate: String,
    /// Media stream identification tag
    #[serde(default)]
    pub sdp_mid: Option<String>,
    /// Media line index
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    /// ICE username fragment
    #[serde(default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Create a candidate for the first media line.
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    /// Encode as an envelope payload.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
