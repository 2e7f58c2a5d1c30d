//! Application messages carried over an open channel.
//!
//! The engine never interprets these; it only stamps the version on the way
//! out and decodes the envelope on the way in.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{TypesError, PROTOCOL_VERSION};

/// Versioned application envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppMessage {
    /// Protocol version of the sender
    pub version: u32,
    /// Application-defined message kind (for example `state-update`)
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque application payload
    pub payload: serde_json::Value,
    /// Milliseconds since the Unix epoch when the message was sent
    pub timestamp: u64,
}

impl AppMessage {
    /// Wrap a serializable payload, stamping the current protocol version.
    pub fn new<T: Serialize>(kind: &str, payload: &T) -> Result<Self, TypesError> {
        Ok(Self {
            version: PROTOCOL_VERSION,
            kind: kind.to_string(),
            payload: serde_json::to_value(payload)?,
            timestamp: crate::now_ms(),
        })
    }

    /// Whether this process understands the sender's protocol version.
    pub fn is_supported(&self) -> bool {
        self.version == PROTOCOL_VERSION
    }

    /// Decode the payload into an application type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, TypesError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Serialize to JSON bytes for the channel.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TypesError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from JSON bytes received on the channel.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Fixture {
        round: u32,
        home: String,
        away: String,
    }

    #[test]
    fn new_message_carries_current_version() {
        let msg = AppMessage::new("ping", &()).unwrap();
        assert_eq!(msg.version, PROTOCOL_VERSION);
        assert!(msg.is_supported());
    }

    #[test]
    fn payload_decodes_back_to_application_type() {
        let fixture = Fixture {
            round: 2,
            home: "Reds".into(),
            away: "Blues".into(),
        };
        let msg = AppMessage::new("state-update", &fixture).unwrap();
        let bytes = msg.to_bytes().unwrap();
        let restored = AppMessage::from_bytes(&bytes).unwrap();
        assert_eq!(restored.kind, "state-update");
        assert_eq!(restored.payload_as::<Fixture>().unwrap(), fixture);
    }

    #[test]
    fn unknown_version_is_flagged_not_rejected() {
        let raw = br#"{"version":99,"type":"x","payload":null,"timestamp":0}"#;
        let msg = AppMessage::from_bytes(raw).unwrap();
        assert!(!msg.is_supported());
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(matches!(
            AppMessage::from_bytes(b"not json"),
            Err(TypesError::Json(_))
        ));
    }
}
