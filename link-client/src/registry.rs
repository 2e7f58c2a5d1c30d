//! Registry of running engines, one per session.
//!
//! The registry is an ordinary value owned by the application. Engines live
//! as long as their entry (or another handle clone) does.

use crate::error::ClientError;
use crate::handle::{LinkHandle, LinkOptions, Messages};
use crate::transport::TransportFactory;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use link_mailbox::Mailbox;
use link_types::SessionId;
use std::sync::Arc;
use tracing::info;

/// Maps session id to its engine handle.
pub struct LinkRegistry {
    mailbox: Arc<dyn Mailbox>,
    factory: Arc<dyn TransportFactory>,
    links: DashMap<SessionId, LinkHandle>,
}

impl LinkRegistry {
    /// Create an empty registry whose engines share `mailbox` and `factory`.
    pub fn new(mailbox: Arc<dyn Mailbox>, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            mailbox,
            factory,
            links: DashMap::new(),
        }
    }

    /// Spawn an engine for `options.session_id`.
    ///
    /// # Errors
    ///
    /// [`ClientError::AlreadyOpen`] if that session already has an engine.
    pub fn open(&self, options: LinkOptions) -> Result<(LinkHandle, Messages), ClientError> {
        match self.links.entry(options.session_id.clone()) {
            Entry::Occupied(_) => Err(ClientError::AlreadyOpen(options.session_id)),
            Entry::Vacant(entry) => {
                let (handle, messages) =
                    LinkHandle::spawn(options, self.mailbox.clone(), self.factory.clone());
                info!(session = %handle.session_id(), role = %handle.role(), "link opened");
                entry.insert(handle.clone());
                Ok((handle, messages))
            }
        }
    }

    /// Handle for a session, if open.
    pub fn get(&self, session_id: &SessionId) -> Option<LinkHandle> {
        self.links.get(session_id).map(|h| h.value().clone())
    }

    /// Clean up and forget one engine. Returns whether it was open.
    pub async fn close(&self, session_id: &SessionId, complete: bool) -> Result<bool, ClientError> {
        let Some((_, handle)) = self.links.remove(session_id) else {
            return Ok(false);
        };
        handle.cleanup(complete).await?;
        info!(session = %session_id, "link closed");
        Ok(true)
    }

    /// Clean up and forget every engine.
    pub async fn close_all(&self, complete: bool) -> Result<(), ClientError> {
        let ids: Vec<SessionId> = self.links.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.close(&id, complete).await?;
        }
        Ok(())
    }

    /// Number of open engines.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Whether no engine is open.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockNetwork;
    use link_mailbox::MemoryMailbox;
    use link_types::Role;

    fn registry() -> LinkRegistry {
        LinkRegistry::new(Arc::new(MemoryMailbox::new()), Arc::new(MockNetwork::new()))
    }

    fn session(id: &str) -> SessionId {
        SessionId::new(id).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn one_engine_per_session() {
        let registry = registry();
        registry
            .open(LinkOptions::new(session("T1"), Role::Host))
            .unwrap();
        let err = registry
            .open(LinkOptions::new(session("T1"), Role::Peer))
            .unwrap_err();
        assert!(matches!(err, ClientError::AlreadyOpen(_)));

        registry
            .open(LinkOptions::new(session("T2"), Role::Peer))
            .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(&session("T1")).unwrap().role(), Role::Host);
    }

    #[tokio::test(start_paused = true)]
    async fn close_removes_entry() {
        let registry = registry();
        registry
            .open(LinkOptions::new(session("T1"), Role::Host))
            .unwrap();

        assert!(registry.close(&session("T1"), true).await.unwrap());
        assert!(!registry.close(&session("T1"), true).await.unwrap());
        assert!(registry.get(&session("T1")).is_none());

        registry
            .open(LinkOptions::new(session("T1"), Role::Host))
            .unwrap();
        registry
            .open(LinkOptions::new(session("T2"), Role::Peer))
            .unwrap();
        registry.close_all(false).await.unwrap();
        assert!(registry.is_empty());
    }
}
