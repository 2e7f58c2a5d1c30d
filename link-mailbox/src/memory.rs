//! In-process mailbox.
//!
//! Shared by engines living in the same process, and used throughout the
//! test suites.

use crate::error::{MailboxError, MailboxResult};
use crate::record::{SessionPatch, SessionRecord, SweepReport};
use crate::Mailbox;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use link_types::constants::MESSAGE_EXPIRY;
use link_types::{now_ms, PeerId, SessionId, SignalEnvelope};
use std::time::Duration;

/// Mailbox backed by a concurrent map.
#[derive(Debug)]
pub struct MemoryMailbox {
    sessions: DashMap<SessionId, SessionRecord>,
    message_expiry: Duration,
}

impl MemoryMailbox {
    /// Create an empty mailbox with the default envelope expiry.
    pub fn new() -> Self {
        Self::with_expiry(MESSAGE_EXPIRY)
    }

    /// Create an empty mailbox with a custom base envelope expiry.
    pub fn with_expiry(message_expiry: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            message_expiry,
        }
    }

    /// Insert a record as-is, replacing any existing one.
    pub fn insert_raw(&self, record: SessionRecord) {
        self.sessions.insert(record.session_id.clone(), record);
    }

    /// Number of stored sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are stored.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for MemoryMailbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Mailbox for MemoryMailbox {
    async fn create_session(&self, record: SessionRecord) -> MailboxResult<()> {
        match self.sessions.entry(record.session_id.clone()) {
            Entry::Occupied(mut existing) => existing.get_mut().adopt(record),
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
        }
        Ok(())
    }

    async fn get_session(&self, session_id: &SessionId) -> MailboxResult<Option<SessionRecord>> {
        Ok(self.sessions.get(session_id).map(|r| r.value().clone()))
    }

    async fn update_session(
        &self,
        session_id: &SessionId,
        patch: SessionPatch,
    ) -> MailboxResult<bool> {
        match self.sessions.get_mut(session_id) {
            Some(mut record) => {
                record.apply(patch, now_ms());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_session(&self, session_id: &SessionId) -> MailboxResult<bool> {
        Ok(self.sessions.remove(session_id).is_some())
    }

    async fn add_signal(
        &self,
        session_id: &SessionId,
        envelope: SignalEnvelope,
    ) -> MailboxResult<u64> {
        let mut record =
            self.sessions
                .get_mut(session_id)
                .ok_or_else(|| MailboxError::SessionNotFound {
                    session_id: session_id.to_string(),
                })?;
        Ok(record.push_signal(envelope, now_ms(), self.message_expiry))
    }

    async fn signals_for(
        &self,
        session_id: &SessionId,
        receiver: &PeerId,
    ) -> MailboxResult<Vec<SignalEnvelope>> {
        Ok(self
            .sessions
            .get(session_id)
            .map(|r| r.signals_for(receiver))
            .unwrap_or_default())
    }

    async fn remove_signal(&self, session_id: &SessionId, timestamp: u64) -> MailboxResult<bool> {
        Ok(self
            .sessions
            .get_mut(session_id)
            .map(|mut r| r.remove_signal(timestamp))
            .unwrap_or(false))
    }

    async fn add_connected_peer(
        &self,
        session_id: &SessionId,
        peer: &PeerId,
    ) -> MailboxResult<bool> {
        Ok(self
            .sessions
            .get_mut(session_id)
            .map(|mut r| r.add_peer(peer))
            .unwrap_or(false))
    }

    async fn remove_connected_peer(
        &self,
        session_id: &SessionId,
        peer: &PeerId,
    ) -> MailboxResult<bool> {
        Ok(self
            .sessions
            .get_mut(session_id)
            .map(|mut r| r.remove_peer(peer))
            .unwrap_or(false))
    }

    async fn list_sessions(&self) -> MailboxResult<Vec<SessionId>> {
        Ok(self.sessions.iter().map(|e| e.key().clone()).collect())
    }

    async fn sweep(&self, now_ms: u64, session_expiry: Duration) -> MailboxResult<SweepReport> {
        let mut report = SweepReport::default();
        let message_expiry = self.message_expiry;
        self.sessions.retain(|_, record| {
            report.messages_expired += record.expire_messages(now_ms, message_expiry);
            let keep = !record.is_abandoned(now_ms, session_expiry);
            if !keep {
                report.sessions_removed += 1;
            }
            keep
        });
        Ok(report)
    }
}
