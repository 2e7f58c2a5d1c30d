//! # link-mailbox
//!
//! The signaling mailbox shared by every participant of a session.
//!
//! Participants never talk to each other directly while negotiating. They
//! deposit [`SignalEnvelope`]s into a session record and poll for envelopes
//! addressed to them. This crate provides:
//!
//! - [`SessionRecord`] - the persisted record and its pure operations
//! - [`Mailbox`] - the async storage trait
//! - [`MemoryMailbox`] and [`SqliteMailbox`] - storage backends
//! - [`spawn_janitor`] - background sweep of expired envelopes and sessions
//!
//! [`SignalEnvelope`]: link_types::SignalEnvelope

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod janitor;
pub mod memory;
pub mod record;
pub mod sqlite;

pub use config::{JanitorConfig, MailboxConfig};
pub use error::{MailboxError, MailboxResult};
pub use janitor::{run_sweep, spawn_janitor};
pub use memory::MemoryMailbox;
pub use record::{HostStatus, SessionMetadata, SessionPatch, SessionRecord, SweepReport};
pub use sqlite::SqliteMailbox;

use async_trait::async_trait;
use link_types::{PeerId, SessionId, SignalEnvelope};
use std::time::Duration;

/// Storage for session records.
///
/// Every operation is a read-modify-write of one whole record. Concurrent
/// writers to the same record race; the last writer wins.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Insert a session. An existing record for the same id keeps its
    /// envelopes and connected peers.
    async fn create_session(&self, record: SessionRecord) -> MailboxResult<()>;

    /// Fetch a session record.
    async fn get_session(&self, session_id: &SessionId) -> MailboxResult<Option<SessionRecord>>;

    /// Merge `patch` into a session and refresh its last-active time.
    ///
    /// Returns `false` (and does nothing) when the session is absent.
    async fn update_session(
        &self,
        session_id: &SessionId,
        patch: SessionPatch,
    ) -> MailboxResult<bool>;

    /// Delete a session. Returns whether it existed.
    async fn delete_session(&self, session_id: &SessionId) -> MailboxResult<bool>;

    /// Append an envelope, superseding older offers/answers on the same route
    /// and sweeping expired envelopes first.
    ///
    /// Returns the timestamp the envelope is stored under.
    async fn add_signal(
        &self,
        session_id: &SessionId,
        envelope: SignalEnvelope,
    ) -> MailboxResult<u64>;

    /// Envelopes visible to `receiver`, in delivery order.
    async fn signals_for(
        &self,
        session_id: &SessionId,
        receiver: &PeerId,
    ) -> MailboxResult<Vec<SignalEnvelope>>;

    /// Remove one envelope by timestamp. Returns whether one was removed.
    async fn remove_signal(&self, session_id: &SessionId, timestamp: u64) -> MailboxResult<bool>;

    /// Add a peer to the connected set. Returns whether it was newly added.
    async fn add_connected_peer(
        &self,
        session_id: &SessionId,
        peer: &PeerId,
    ) -> MailboxResult<bool>;

    /// Remove a peer from the connected set. Returns whether it was present.
    async fn remove_connected_peer(
        &self,
        session_id: &SessionId,
        peer: &PeerId,
    ) -> MailboxResult<bool>;

    /// Ids of every stored session.
    async fn list_sessions(&self) -> MailboxResult<Vec<SessionId>>;

    /// Drop expired envelopes everywhere and delete abandoned sessions.
    async fn sweep(&self, now_ms: u64, session_expiry: Duration) -> MailboxResult<SweepReport>;
}
