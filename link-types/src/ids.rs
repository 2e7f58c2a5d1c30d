//! Identity types for peerlink.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TypesError;

/// Identifier of a synchronized document and its mailbox session.
///
/// The session id is the document id (for example a tournament id), so it is
/// chosen by the application rather than generated.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Create a SessionId, rejecting empty or whitespace-only ids.
    pub fn new(id: impl Into<String>) -> Result<Self, TypesError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(TypesError::InvalidId(id));
        }
        Ok(Self(id))
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

/// Identifier of one participant process.
///
/// Random UUID v4 (simple format) for generated ids.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Create a new random PeerId.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Create a PeerId from an existing string, rejecting empty ids.
    pub fn new(id: impl Into<String>) -> Result<Self, TypesError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(TypesError::InvalidId(id));
        }
        Ok(Self(id))
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short: String = self.0.chars().take(8).collect();
        write!(f, "PeerId({})", short)
    }
}

/// Which side of the star topology a participant plays.
///
/// The host is polite: it yields its own offer when offers collide.
/// The peer is impolite: its offer wins and it ignores colliding offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Creates the session and the data channel.
    Host,
    /// Joins an existing session.
    Peer,
}

impl Role {
    /// Whether this role yields during an offer collision.
    pub fn is_polite(self) -> bool {
        matches!(self, Role::Host)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Host => f.write_str("host"),
            Role::Peer => f.write_str("peer"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_rejects_blank() {
        assert!(SessionId::new("").is_err());
        assert!(SessionId::new("   ").is_err());
        assert_eq!(SessionId::new("T1").unwrap().as_str(), "T1");
    }

    #[test]
    fn peer_ids_are_unique() {
        let a = PeerId::random();
        let b = PeerId::random();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn peer_id_debug_is_shortened() {
        let id = PeerId::new("0123456789abcdef").unwrap();
        assert_eq!(format!("{:?}", id), "PeerId(01234567)");
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = SessionId::new("T1").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"T1\"");
    }

    #[test]
    fn host_is_polite_peer_is_not() {
        assert!(Role::Host.is_polite());
        assert!(!Role::Peer.is_polite());
    }
}
