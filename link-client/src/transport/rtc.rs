//! WebRTC transport built on the `webrtc` crate.
//!
//! The host creates one ordered, reliable data channel; the peer adopts the
//! channel announced by the host. Connection callbacks are forwarded to the
//! engine as [`TransportEvent`]s and never touch negotiation state.

use super::{PeerTransport, TransportError, TransportEvent, TransportEvents, TransportFactory};
use crate::config::IceConfig;
use async_trait::async_trait;
use bytes::Bytes;
use link_core::{IceConnectionState, IceGatheringState, SignalingState};
use link_types::{IceCandidate, Role, SessionDescription};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;

/// Creates [`WebRtcTransport`]s from an [`IceConfig`].
pub struct WebRtcFactory {
    config: IceConfig,
    api: API,
}

impl WebRtcFactory {
    /// Create a factory.
    pub fn new(config: IceConfig) -> Self {
        Self {
            config,
            api: APIBuilder::new().build(),
        }
    }

    fn ice_servers(&self) -> Vec<RTCIceServer> {
        ice_servers(&self.config.stun_servers)
    }
}

fn ice_servers(urls: &[String]) -> Vec<RTCIceServer> {
    if urls.is_empty() {
        return Vec::new();
    }
    vec![RTCIceServer {
        urls: urls.to_vec(),
        ..Default::default()
    }]
}

#[async_trait]
impl TransportFactory for WebRtcFactory {
    async fn open(
        &self,
        role: Role,
        events: TransportEvents,
    ) -> Result<Box<dyn PeerTransport>, TransportError> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers(),
            ..Default::default()
        };
        let pc = self
            .api
            .new_peer_connection(config)
            .await
            .map_err(|e| TransportError::Setup(e.to_string()))?;

        let transport = WebRtcTransport {
            pc: Arc::new(pc),
            channel: Arc::new(Mutex::new(None)),
            open: Arc::new(AtomicBool::new(false)),
        };
        transport.wire_connection(&events);

        match role {
            Role::Host => {
                let init = RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                };
                let dc = transport
                    .pc
                    .create_data_channel(&self.config.channel_label, Some(init))
                    .await
                    .map_err(|e| TransportError::Setup(e.to_string()))?;
                attach_channel(dc, &transport.channel, &transport.open, events);
            }
            Role::Peer => {
                let slot = transport.channel.clone();
                let open = transport.open.clone();
                transport
                    .pc
                    .on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                        debug!(label = dc.label(), "data channel announced");
                        attach_channel(dc, &slot, &open, events.clone());
                        Box::pin(async {})
                    }));
            }
        }

        Ok(Box::new(transport))
    }
}

/// A peer connection and its data channel.
pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    open: Arc<AtomicBool>,
}

impl WebRtcTransport {
    fn wire_connection(&self, events: &TransportEvents) {
        let tx = events.clone();
        self.pc.on_negotiation_needed(Box::new(move || {
            tx.emit(TransportEvent::NegotiationNeeded);
            Box::pin(async {})
        }));

        let tx = events.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                // `None` marks the end of gathering, reported separately.
                if let Some(init) = candidate.and_then(|c| c.to_json().ok()) {
                    tx.emit(TransportEvent::LocalCandidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    }));
                }
                Box::pin(async {})
            }));

        let tx = events.clone();
        self.pc
            .on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
                if let Some(state) = gathering_state(state) {
                    tx.emit(TransportEvent::IceGatheringChanged(state));
                }
                Box::pin(async {})
            }));

        let tx = events.clone();
        self.pc
            .on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
                debug!(?state, "ICE connection state changed");
                if let Some(state) = connection_state(state) {
                    tx.emit(TransportEvent::IceConnectionChanged(state));
                }
                Box::pin(async {})
            }));

        let tx = events.clone();
        self.pc
            .on_signaling_state_change(Box::new(move |state: RTCSignalingState| {
                if let Some(state) = signaling_state(state) {
                    tx.emit(TransportEvent::SignalingChanged(state));
                }
                Box::pin(async {})
            }));
    }

    fn current_channel(&self) -> Option<Arc<RTCDataChannel>> {
        self.channel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

fn attach_channel(
    dc: Arc<RTCDataChannel>,
    slot: &Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    open: &Arc<AtomicBool>,
    events: TransportEvents,
) {
    let tx = events.clone();
    let flag = open.clone();
    dc.on_open(Box::new(move || {
        flag.store(true, Ordering::SeqCst);
        tx.emit(TransportEvent::ChannelOpened);
        Box::pin(async {})
    }));

    let tx = events.clone();
    let flag = open.clone();
    dc.on_close(Box::new(move || {
        if flag.swap(false, Ordering::SeqCst) {
            tx.emit(TransportEvent::ChannelClosed {
                reason: "data channel closed".into(),
            });
        }
        Box::pin(async {})
    }));

    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        events.emit(TransportEvent::Message(msg.data.to_vec()));
        Box::pin(async {})
    }));

    *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(dc);
}

fn negotiation(e: webrtc::Error) -> TransportError {
    TransportError::Negotiation(e.to_string())
}

fn rollback_description() -> Result<RTCSessionDescription, TransportError> {
    serde_json::from_value(serde_json::json!({ "type": "rollback", "sdp": "" }))
        .map_err(|e| TransportError::Negotiation(e.to_string()))
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, TransportError> {
        let options = RTCOfferOptions {
            voice_activity_detection: false,
            ice_restart,
        };
        let offer = self
            .pc
            .create_offer(Some(options))
            .await
            .map_err(negotiation)?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(negotiation)?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn accept_offer(
        &self,
        offer: SessionDescription,
        rollback: bool,
    ) -> Result<SessionDescription, TransportError> {
        if rollback {
            self.pc
                .set_local_description(rollback_description()?)
                .await
                .map_err(negotiation)?;
        }
        let remote = RTCSessionDescription::offer(offer.sdp).map_err(negotiation)?;
        self.pc
            .set_remote_description(remote)
            .await
            .map_err(negotiation)?;

        let answer = self.pc.create_answer(None).await.map_err(negotiation)?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(negotiation)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), TransportError> {
        let remote = RTCSessionDescription::answer(answer.sdp).map_err(negotiation)?;
        self.pc
            .set_remote_description(remote)
            .await
            .map_err(negotiation)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| TransportError::Candidate(e.to_string()))
    }

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let dc = match self.current_channel() {
            Some(dc) if self.is_open() => dc,
            _ => return Err(TransportError::NotConnected),
        };
        dc.send(&Bytes::copy_from_slice(data))
            .await
            .map(|_| ())
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::SeqCst);
        if let Some(dc) = self.current_channel() {
            if let Err(e) = dc.close().await {
                debug!(error = %e, "closing data channel failed");
            }
        }
        self.pc
            .close()
            .await
            .map_err(|e| TransportError::Setup(e.to_string()))
    }
}

fn gathering_state(state: RTCIceGathererState) -> Option<IceGatheringState> {
    match state {
        RTCIceGathererState::New => Some(IceGatheringState::New),
        RTCIceGathererState::Gathering => Some(IceGatheringState::Gathering),
        RTCIceGathererState::Complete => Some(IceGatheringState::Complete),
        _ => None,
    }
}

fn connection_state(state: RTCIceConnectionState) -> Option<IceConnectionState> {
    match state {
        RTCIceConnectionState::New => Some(IceConnectionState::New),
        RTCIceConnectionState::Checking => Some(IceConnectionState::Checking),
        RTCIceConnectionState::Connected => Some(IceConnectionState::Connected),
        RTCIceConnectionState::Completed => Some(IceConnectionState::Completed),
        RTCIceConnectionState::Disconnected => Some(IceConnectionState::Disconnected),
        RTCIceConnectionState::Failed => Some(IceConnectionState::Failed),
        RTCIceConnectionState::Closed => Some(IceConnectionState::Closed),
        _ => None,
    }
}

fn signaling_state(state: RTCSignalingState) -> Option<SignalingState> {
    match state {
        RTCSignalingState::Stable => Some(SignalingState::Stable),
        RTCSignalingState::HaveLocalOffer | RTCSignalingState::HaveRemotePranswer => {
            Some(SignalingState::HaveLocalOffer)
        }
        RTCSignalingState::HaveRemoteOffer | RTCSignalingState::HaveLocalPranswer => {
            Some(SignalingState::HaveRemoteOffer)
        }
        RTCSignalingState::Closed => Some(SignalingState::Closed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn stun_urls_become_one_ice_server() {
        let servers = ice_servers(&[
            "stun:stun.l.google.com:19302".to_string(),
            "stun:stun1.l.google.com:19302".to_string(),
        ]);
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].urls.len(), 2);
        assert!(ice_servers(&[]).is_empty());
    }

    #[test]
    fn state_mapping() {
        assert_eq!(
            gathering_state(RTCIceGathererState::Complete),
            Some(IceGatheringState::Complete)
        );
        assert_eq!(gathering_state(RTCIceGathererState::Unspecified), None);
        assert_eq!(
            connection_state(RTCIceConnectionState::Failed),
            Some(IceConnectionState::Failed)
        );
        assert_eq!(
            signaling_state(RTCSignalingState::HaveLocalOffer),
            Some(SignalingState::HaveLocalOffer)
        );
    }

    #[test]
    fn rollback_description_parses() {
        let rollback = rollback_description().unwrap();
        assert_eq!(rollback.sdp, "");
    }

    #[tokio::test]
    async fn host_offer_contains_data_channel() {
        let factory = WebRtcFactory::new(IceConfig {
            stun_servers: Vec::new(),
            channel_label: "peerlink".into(),
        });
        let (tx, _rx) = mpsc::unbounded_channel();
        let host = factory
            .open(Role::Host, TransportEvents::new(1, tx))
            .await
            .unwrap();

        let offer = host.create_offer(false).await.unwrap();
        assert!(offer.sdp.starts_with("v=0"));
        assert!(offer.sdp.contains("webrtc-datachannel"));
        assert!(!host.is_open());
        host.close().await.unwrap();
    }
}
