//! Mock transport for testing.
//!
//! [`MockNetwork`] is an in-process stand-in for the network: every
//! transport it opens is an endpoint, and applying an answer links the
//! offering endpoint with the answering one. Descriptions are plain strings
//! naming the endpoints, so a stale answer fails like it would for real.

use super::{PeerTransport, TransportError, TransportEvent, TransportEvents, TransportFactory};
use async_trait::async_trait;
use link_core::{IceConnectionState, IceGatheringState, SignalingState};
use link_types::{IceCandidate, Role, SessionDescription};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// In-process network of mock transports.
///
/// Cloning shares the same network.
#[derive(Debug, Default, Clone)]
pub struct MockNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

#[derive(Debug, Default)]
struct NetworkInner {
    next_id: u64,
    endpoints: HashMap<u64, Endpoint>,
    opened: usize,
    stall_gathering: bool,
    fail_next_open: Option<String>,
    fail_next_offer: Option<String>,
    fail_next_answer: Option<String>,
    fail_next_candidate: Option<String>,
    fail_next_send: Option<String>,
}

#[derive(Debug)]
struct Endpoint {
    role: Role,
    events: TransportEvents,
    partner: Option<u64>,
    open: bool,
    local_offer: bool,
    sent: Vec<Vec<u8>>,
}

impl MockNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Transports opened so far.
    pub fn opened(&self) -> usize {
        self.lock().opened
    }

    /// Transports not yet closed.
    pub fn live_endpoints(&self) -> usize {
        self.lock().endpoints.len()
    }

    /// Endpoints whose channel is open.
    pub fn open_channels(&self) -> usize {
        self.lock().endpoints.values().filter(|e| e.open).count()
    }

    /// Live endpoints of `role`.
    pub fn endpoints_with_role(&self, role: Role) -> usize {
        self.lock()
            .endpoints
            .values()
            .filter(|e| e.role == role)
            .count()
    }

    /// Every message sent through open channels, in order.
    pub fn sent_messages(&self) -> Vec<Vec<u8>> {
        let inner = self.lock();
        let mut ids: Vec<_> = inner.endpoints.keys().copied().collect();
        ids.sort();
        ids.iter()
            .flat_map(|id| inner.endpoints[id].sent.clone())
            .collect()
    }

    /// Stop gathering before completion from now on.
    pub fn stall_gathering(&self, stall: bool) {
        self.lock().stall_gathering = stall;
    }

    /// Cause the next `open()` to fail with the given error.
    pub fn fail_next_open(&self, error: &str) {
        self.lock().fail_next_open = Some(error.to_string());
    }

    /// Cause the next `create_offer()` to fail with the given error.
    pub fn fail_next_offer(&self, error: &str) {
        self.lock().fail_next_offer = Some(error.to_string());
    }

    /// Cause the next `apply_answer()` to fail with the given error.
    pub fn fail_next_answer(&self, error: &str) {
        self.lock().fail_next_answer = Some(error.to_string());
    }

    /// Cause the next `add_ice_candidate()` to fail with the given error.
    pub fn fail_next_candidate(&self, error: &str) {
        self.lock().fail_next_candidate = Some(error.to_string());
    }

    /// Cause the next `send()` to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.lock().fail_next_send = Some(error.to_string());
    }

    /// Break every open link. Both ends see their channel close.
    ///
    /// Returns the number of endpoints affected.
    pub fn drop_links(&self) -> usize {
        let mut inner = self.lock();
        let mut dropped = 0;
        for endpoint in inner.endpoints.values_mut().filter(|e| e.open) {
            endpoint.open = false;
            endpoint.partner = None;
            endpoint.events.emit(TransportEvent::IceConnectionChanged(
                IceConnectionState::Disconnected,
            ));
            endpoint.events.emit(TransportEvent::ChannelClosed {
                reason: "link dropped".into(),
            });
            dropped += 1;
        }
        dropped
    }
}

fn gather(inner: &NetworkInner, id: u64) {
    let Some(endpoint) = inner.endpoints.get(&id) else {
        return;
    };
    let events = &endpoint.events;
    events.emit(TransportEvent::IceGatheringChanged(IceGatheringState::Gathering));
    if inner.stall_gathering {
        return;
    }
    events.emit(TransportEvent::LocalCandidate(IceCandidate::new(format!(
        "candidate:{id} 1 udp 2130706431 127.0.0.1 {} typ host",
        40000 + id
    ))));
    events.emit(TransportEvent::IceGatheringChanged(IceGatheringState::Complete));
}

fn parse_ids(sdp: &str, prefix: &str) -> Option<Vec<u64>> {
    let rest = sdp.strip_prefix(prefix)?;
    rest.split_whitespace().map(|s| s.parse().ok()).collect()
}

#[async_trait]
impl TransportFactory for MockNetwork {
    async fn open(
        &self,
        role: Role,
        events: TransportEvents,
    ) -> Result<Box<dyn PeerTransport>, TransportError> {
        let mut inner = self.lock();

        // Check for forced failure
        if let Some(error) = inner.fail_next_open.take() {
            return Err(TransportError::Setup(error));
        }

        inner.next_id += 1;
        inner.opened += 1;
        let id = inner.next_id;

        // The host creates the data channel, which asks for negotiation.
        if role == Role::Host {
            events.emit(TransportEvent::NegotiationNeeded);
        }
        inner.endpoints.insert(
            id,
            Endpoint {
                role,
                events,
                partner: None,
                open: false,
                local_offer: false,
                sent: Vec::new(),
            },
        );

        Ok(Box::new(MockTransport {
            id,
            network: self.clone(),
        }))
    }
}

/// One endpoint of a [`MockNetwork`].
#[derive(Debug)]
struct MockTransport {
    id: u64,
    network: MockNetwork,
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn create_offer(&self, _ice_restart: bool) -> Result<SessionDescription, TransportError> {
        let mut inner = self.network.lock();
        if let Some(error) = inner.fail_next_offer.take() {
            return Err(TransportError::Negotiation(error));
        }
        let endpoint = inner
            .endpoints
            .get_mut(&self.id)
            .ok_or(TransportError::Closed)?;

        endpoint.local_offer = true;
        endpoint
            .events
            .emit(TransportEvent::SignalingChanged(SignalingState::HaveLocalOffer));
        gather(&inner, self.id);

        Ok(SessionDescription::offer(format!("mock-offer {}", self.id)))
    }

    async fn accept_offer(
        &self,
        offer: SessionDescription,
        rollback: bool,
    ) -> Result<SessionDescription, TransportError> {
        let mut inner = self.network.lock();
        let endpoint = inner
            .endpoints
            .get_mut(&self.id)
            .ok_or(TransportError::Closed)?;

        let offerer = parse_ids(&offer.sdp, "mock-offer")
            .and_then(|ids| ids.first().copied())
            .ok_or_else(|| TransportError::Negotiation("unrecognized offer".into()))?;
        if endpoint.local_offer && !rollback {
            return Err(TransportError::Negotiation(
                "remote offer while a local offer is pending".into(),
            ));
        }

        endpoint.local_offer = false;
        endpoint
            .events
            .emit(TransportEvent::SignalingChanged(SignalingState::HaveRemoteOffer));
        endpoint
            .events
            .emit(TransportEvent::SignalingChanged(SignalingState::Stable));
        gather(&inner, self.id);

        Ok(SessionDescription::answer(format!(
            "mock-answer {} {offerer}",
            self.id
        )))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), TransportError> {
        let mut inner = self.network.lock();
        if let Some(error) = inner.fail_next_answer.take() {
            return Err(TransportError::Negotiation(error));
        }

        let ids = parse_ids(&answer.sdp, "mock-answer")
            .filter(|ids| ids.len() == 2)
            .ok_or_else(|| TransportError::Negotiation("unrecognized answer".into()))?;
        let (answerer, offerer) = (ids[0], ids[1]);

        let endpoint = inner
            .endpoints
            .get_mut(&self.id)
            .ok_or(TransportError::Closed)?;
        if !endpoint.local_offer {
            return Err(TransportError::Negotiation("no local offer pending".into()));
        }
        if offerer != self.id {
            return Err(TransportError::Negotiation(
                "answer belongs to another offer".into(),
            ));
        }
        endpoint.local_offer = false;
        endpoint
            .events
            .emit(TransportEvent::SignalingChanged(SignalingState::Stable));

        // The answering side may already be gone; then nothing opens.
        if !inner.endpoints.contains_key(&answerer) {
            return Ok(());
        }
        for (id, partner) in [(self.id, answerer), (answerer, self.id)] {
            if let Some(endpoint) = inner.endpoints.get_mut(&id) {
                endpoint.partner = Some(partner);
                endpoint.open = true;
                endpoint.events.emit(TransportEvent::IceConnectionChanged(
                    IceConnectionState::Connected,
                ));
                endpoint.events.emit(TransportEvent::ChannelOpened);
            }
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<(), TransportError> {
        let mut inner = self.network.lock();
        if let Some(error) = inner.fail_next_candidate.take() {
            return Err(TransportError::Candidate(error));
        }
        if !inner.endpoints.contains_key(&self.id) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.network.lock();
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }
        let partner = match inner.endpoints.get_mut(&self.id) {
            Some(endpoint) if endpoint.open => {
                endpoint.sent.push(data.to_vec());
                endpoint.partner
            }
            _ => return Err(TransportError::NotConnected),
        };
        let partner = partner
            .and_then(|p| inner.endpoints.get(&p))
            .ok_or(TransportError::NotConnected)?;
        partner.events.emit(TransportEvent::Message(data.to_vec()));
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.network
            .lock()
            .endpoints
            .get(&self.id)
            .map(|e| e.open)
            .unwrap_or(false)
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut inner = self.network.lock();
        let Some(endpoint) = inner.endpoints.remove(&self.id) else {
            return Ok(());
        };
        if let Some(partner) = endpoint.partner.and_then(|p| inner.endpoints.get_mut(&p)) {
            if partner.open {
                partner.open = false;
                partner.partner = None;
                partner.events.emit(TransportEvent::ChannelClosed {
                    reason: "remote closed".into(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    type Rx = mpsc::UnboundedReceiver<(u64, TransportEvent)>;

    async fn open(network: &MockNetwork, role: Role) -> (Box<dyn PeerTransport>, Rx) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = network
            .open(role, TransportEvents::new(1, tx))
            .await
            .unwrap();
        (transport, rx)
    }

    fn drain(rx: &mut Rx) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok((_, event)) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn host_open_requests_negotiation() {
        let network = MockNetwork::new();
        let (_host, mut rx) = open(&network, Role::Host).await;
        assert_eq!(drain(&mut rx), vec![TransportEvent::NegotiationNeeded]);

        let (_peer, mut rx) = open(&network, Role::Peer).await;
        assert!(drain(&mut rx).is_empty());
        assert_eq!(network.opened(), 2);
    }

    #[tokio::test]
    async fn offer_answer_opens_both_channels() {
        let network = MockNetwork::new();
        let (host, mut host_rx) = open(&network, Role::Host).await;
        let (peer, mut peer_rx) = open(&network, Role::Peer).await;

        let offer = host.create_offer(false).await.unwrap();
        let answer = peer.accept_offer(offer, false).await.unwrap();
        host.apply_answer(answer).await.unwrap();

        assert!(host.is_open());
        assert!(peer.is_open());
        assert!(drain(&mut host_rx).contains(&TransportEvent::ChannelOpened));
        let peer_events = drain(&mut peer_rx);
        assert!(peer_events.contains(&TransportEvent::ChannelOpened));
        assert!(peer_events
            .iter()
            .any(|e| matches!(e, TransportEvent::LocalCandidate(_))));

        host.send(b"hello").await.unwrap();
        assert_eq!(
            drain(&mut peer_rx),
            vec![TransportEvent::Message(b"hello".to_vec())]
        );
    }

    #[tokio::test]
    async fn answer_for_other_offer_is_rejected() {
        let network = MockNetwork::new();
        let (host, _h) = open(&network, Role::Host).await;
        let (other, _o) = open(&network, Role::Host).await;
        let (peer, _p) = open(&network, Role::Peer).await;

        host.create_offer(false).await.unwrap();
        let other_offer = other.create_offer(false).await.unwrap();
        let answer = peer.accept_offer(other_offer, false).await.unwrap();

        assert!(matches!(
            host.apply_answer(answer).await,
            Err(TransportError::Negotiation(_))
        ));
    }

    #[tokio::test]
    async fn collision_requires_rollback() {
        let network = MockNetwork::new();
        let (host, _h) = open(&network, Role::Host).await;
        let (peer, _p) = open(&network, Role::Peer).await;

        host.create_offer(false).await.unwrap();
        let peer_offer = peer.create_offer(false).await.unwrap();

        assert!(host.accept_offer(peer_offer.clone(), false).await.is_err());
        assert!(host.accept_offer(peer_offer, true).await.is_ok());
    }

    #[tokio::test]
    async fn drop_links_closes_both_sides() {
        let network = MockNetwork::new();
        let (host, mut host_rx) = open(&network, Role::Host).await;
        let (peer, mut peer_rx) = open(&network, Role::Peer).await;
        let offer = host.create_offer(false).await.unwrap();
        host.apply_answer(peer.accept_offer(offer, false).await.unwrap())
            .await
            .unwrap();
        drain(&mut host_rx);
        drain(&mut peer_rx);

        assert_eq!(network.drop_links(), 2);
        assert!(!host.is_open());
        assert!(drain(&mut peer_rx).contains(&TransportEvent::ChannelClosed {
            reason: "link dropped".into()
        }));
        assert!(matches!(
            host.send(b"x").await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn close_notifies_partner() {
        let network = MockNetwork::new();
        let (host, _h) = open(&network, Role::Host).await;
        let (peer, mut peer_rx) = open(&network, Role::Peer).await;
        let offer = host.create_offer(false).await.unwrap();
        host.apply_answer(peer.accept_offer(offer, false).await.unwrap())
            .await
            .unwrap();
        drain(&mut peer_rx);

        host.close().await.unwrap();
        assert_eq!(network.live_endpoints(), 1);
        assert_eq!(
            drain(&mut peer_rx),
            vec![TransportEvent::ChannelClosed {
                reason: "remote closed".into()
            }]
        );
    }

    #[tokio::test]
    async fn stalled_gathering_never_completes() {
        let network = MockNetwork::new();
        network.stall_gathering(true);
        let (host, mut rx) = open(&network, Role::Host).await;
        host.create_offer(false).await.unwrap();
        let events = drain(&mut rx);
        assert!(events.contains(&TransportEvent::IceGatheringChanged(
            IceGatheringState::Gathering
        )));
        assert!(!events.contains(&TransportEvent::IceGatheringChanged(
            IceGatheringState::Complete
        )));
    }

    #[tokio::test]
    async fn fail_hooks() {
        let network = MockNetwork::new();
        network.fail_next_open("no interfaces");
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(
            network.open(Role::Peer, TransportEvents::new(1, tx)).await,
            Err(TransportError::Setup(_))
        ));

        let (host, _h) = open(&network, Role::Host).await;
        network.fail_next_offer("boom");
        assert!(host.create_offer(false).await.is_err());
        let offer = host.create_offer(false).await.unwrap();

        let (peer, _p) = open(&network, Role::Peer).await;
        let answer = peer.accept_offer(offer, false).await.unwrap();
        network.fail_next_answer("bad answer");
        assert!(matches!(
            host.apply_answer(answer.clone()).await,
            Err(TransportError::Negotiation(_))
        ));
        host.apply_answer(answer).await.unwrap();

        let candidate = IceCandidate::new("candidate:9 1 udp 1 10.0.0.9 5000 typ host");
        network.fail_next_candidate("stale");
        assert!(matches!(
            peer.add_ice_candidate(candidate.clone()).await,
            Err(TransportError::Candidate(_))
        ));
        assert!(peer.add_ice_candidate(candidate).await.is_ok());

        network.fail_next_send("full");
        assert!(matches!(
            host.send(b"x").await,
            Err(TransportError::SendFailed(_))
        ));
        host.send(b"y").await.unwrap();
        assert_eq!(network.sent_messages(), vec![b"y".to_vec()]);
        assert_eq!(network.endpoints_with_role(Role::Host), 1);
    }
}
