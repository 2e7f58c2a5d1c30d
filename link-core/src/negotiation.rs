//! Perfect-negotiation state machine.
//!
//! One [`Negotiator`] drives one engine: a single peer connection between the
//! local party and one remote party. The host is the polite side and yields
//! on offer collisions; the peer is impolite and ignores colliding offers.
//!
//! The machine is pure. It consumes [`Event`]s (transport callbacks, mailbox
//! envelopes, timer expiry, user requests) and returns [`Action`]s for the
//! driver to execute. Results of asynchronous actions come back as events.

use crate::candidates::CandidateQueue;
use crate::reconnect::{Reconnector, RetryDecision};
use crate::state::{IceConnectionState, IceGatheringState, LinkState, LinkStatus, SignalingState};
use crate::timer::{Timer, Timings};
use link_types::{IceCandidate, PeerId, Role, SessionDescription, SignalEnvelope, SignalKind};
use std::fmt;
use std::time::Duration;

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// User asked to connect.
    ConnectRequested,
    /// User asked to tear down. `complete` also removes the mailbox footprint.
    CleanupRequested {
        /// Remove the host session / peer registration too.
        complete: bool,
    },
    /// The transport wants a (re)negotiation.
    NegotiationNeeded,
    /// A `CreateOffer` action finished and the offer is the local description.
    LocalOfferCreated {
        /// Epoch carried by the `CreateOffer` action.
        epoch: u64,
        /// The offer.
        description: SessionDescription,
    },
    /// An `AcceptOffer` action finished and the answer is the local description.
    LocalAnswerCreated {
        /// The answer.
        description: SessionDescription,
    },
    /// An `ApplyAnswer` action finished.
    RemoteAnswerApplied,
    /// The transport discovered a local candidate.
    LocalCandidate(IceCandidate),
    /// The transport refused a remote candidate from an `AddCandidates` action.
    CandidateRejected {
        /// The refused candidate.
        candidate: IceCandidate,
        /// Transport error text.
        reason: String,
    },
    /// ICE gathering phase changed.
    IceGatheringChanged(IceGatheringState),
    /// ICE connectivity changed.
    IceConnectionChanged(IceConnectionState),
    /// Transport signaling state changed (diagnostic only).
    SignalingChanged(SignalingState),
    /// The data channel opened.
    ChannelOpened,
    /// The data channel closed or errored.
    ChannelClosed {
        /// Why it closed.
        reason: String,
    },
    /// An envelope addressed to us was read from the mailbox.
    SignalReceived(SignalEnvelope),
    /// Poll saw the host's ready flag in the session metadata.
    HostReadyObserved {
        /// The session's host.
        host_id: PeerId,
    },
    /// Poll counted the session's connected peers.
    PeersCounted(usize),
    /// A driver step failed.
    StepFailed {
        /// Which step.
        step: Step,
        /// Error text.
        reason: String,
    },
    /// A scheduled timer expired.
    TimerFired(Timer),
}

/// Driver steps whose failure is fed back as [`Event::StepFailed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Creating the transport.
    OpenConnection,
    /// Creating the host session.
    CreateSession,
    /// Creating and applying a local offer.
    CreateOffer,
    /// Applying a remote offer and answering.
    AcceptOffer,
    /// Applying a remote answer.
    ApplyAnswer,
    /// Depositing an envelope.
    Deposit,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::OpenConnection => "open connection",
            Step::CreateSession => "create session",
            Step::CreateOffer => "create offer",
            Step::AcceptOffer => "accept offer",
            Step::ApplyAnswer => "apply answer",
            Step::Deposit => "deposit signal",
        };
        f.write_str(s)
    }
}

/// Side effect requested by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Create a fresh transport for this attempt.
    OpenConnection,
    /// Close the current transport.
    CloseConnection,
    /// Host: create (or refresh) the session record.
    CreateSession,
    /// Host: delete the session record.
    DeleteSession,
    /// Host: mark the session ready for connections.
    PublishReady,
    /// Host: refresh the liveness fields of the session record.
    RefreshHost,
    /// Add a party to the session's connected-peer list.
    RegisterPeer(PeerId),
    /// Remove a party from the session's connected-peer list.
    UnregisterPeer(PeerId),
    /// Start the mailbox poll loop.
    StartPolling,
    /// Stop the mailbox poll loop.
    StopPolling,
    /// Deposit an envelope. The driver stamps sender and timestamp.
    Deposit {
        /// Envelope kind.
        kind: SignalKind,
        /// Addressee, `None` to broadcast.
        receiver: Option<PeerId>,
        /// Payload.
        data: serde_json::Value,
    },
    /// Remove a consumed envelope from the mailbox.
    Acknowledge {
        /// Timestamp of the consumed envelope.
        timestamp: u64,
    },
    /// Create an offer and apply it as the local description.
    CreateOffer {
        /// Echoed back in [`Event::LocalOfferCreated`].
        epoch: u64,
        /// Request fresh ICE credentials.
        ice_restart: bool,
    },
    /// Apply a remote offer (rolling back a local one first) and answer it.
    AcceptOffer {
        /// The remote offer.
        description: SessionDescription,
        /// Roll back the pending local offer first.
        rollback: bool,
    },
    /// Apply a remote answer.
    ApplyAnswer {
        /// The remote answer.
        description: SessionDescription,
    },
    /// Hand remote candidates to the transport, in order.
    AddCandidates(Vec<IceCandidate>),
    /// Arm a timer.
    Schedule {
        /// Which timer.
        timer: Timer,
        /// Fires after this delay.
        delay: Duration,
    },
    /// Disarm a timer.
    Cancel(Timer),
    /// Disarm every timer.
    CancelAllTimers,
    /// Publish a new state snapshot.
    Report(LinkState),
}

/// Lifecycle of the engine as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No attempt running.
    Idle,
    /// An attempt is running.
    Active,
    /// Waiting for the reconnect timer.
    Backoff,
}

/// The negotiation state machine for one engine.
#[derive(Debug, Clone)]
pub struct Negotiator {
    role: Role,
    local_id: PeerId,
    timings: Timings,
    phase: Phase,
    remote_id: Option<PeerId>,
    making_offer: bool,
    negotiating: bool,
    ignore_offer: bool,
    signaling: SignalingState,
    has_remote_description: bool,
    host_ready: bool,
    offer_seen: bool,
    connection_open: bool,
    footprint: bool,
    offer_epoch: u64,
    candidates: CandidateQueue,
    reconnect: Reconnector,
    state: LinkState,
}

impl Negotiator {
    /// Create an idle machine.
    pub fn new(role: Role, local_id: PeerId, timings: Timings) -> Self {
        let reconnect = Reconnector::new(timings.max_reconnect_attempts, timings.reconnect_delay);
        Self {
            role,
            local_id,
            timings,
            phase: Phase::Idle,
            remote_id: None,
            making_offer: false,
            negotiating: false,
            ignore_offer: false,
            signaling: SignalingState::Stable,
            has_remote_description: false,
            host_ready: false,
            offer_seen: false,
            connection_open: false,
            footprint: false,
            offer_epoch: 0,
            candidates: CandidateQueue::new(),
            reconnect,
            state: LinkState::disconnected(),
        }
    }

    /// Our role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Our party id.
    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// The party we are negotiating with, once known.
    pub fn remote_id(&self) -> Option<&PeerId> {
        self.remote_id.as_ref()
    }

    /// Current snapshot.
    pub fn state(&self) -> &LinkState {
        &self.state
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Timing parameters.
    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    /// Whether the channel is open.
    pub fn is_open(&self) -> bool {
        self.state.status.is_open()
    }

    /// Whether a local offer is being created.
    pub fn is_making_offer(&self) -> bool {
        self.making_offer
    }

    /// Whether the last remote offer was ignored due to a collision.
    pub fn is_ignoring_offer(&self) -> bool {
        self.ignore_offer
    }

    /// Signaling state as tracked by the machine.
    pub fn signaling(&self) -> SignalingState {
        self.signaling
    }

    /// Remote candidates waiting for a remote description.
    pub fn pending_candidates(&self) -> usize {
        self.candidates.len()
    }

    /// Process one event and return the actions to execute, in order.
    pub fn apply(&mut self, event: Event) -> Vec<Action> {
        let before = self.state.clone();
        let mut actions = Vec::new();

        match event {
            Event::ConnectRequested => self.on_connect_requested(&mut actions),
            Event::CleanupRequested { complete } => {
                self.cleanup(complete, &mut actions);
                // Always re-announce; the driver suppresses duplicates.
                actions.push(Action::Report(self.state.clone()));
                return actions;
            }
            Event::TimerFired(Timer::Reconnect) => {
                if self.phase == Phase::Backoff {
                    self.start_attempt(&mut actions);
                }
            }
            // Everything else belongs to a running attempt.
            _ if self.phase != Phase::Active => {}
            Event::NegotiationNeeded => self.on_negotiation_needed(&mut actions),
            Event::LocalOfferCreated { epoch, description } => {
                self.on_local_offer(epoch, description, &mut actions)
            }
            Event::LocalAnswerCreated { description } => {
                self.on_local_answer(description, &mut actions)
            }
            Event::RemoteAnswerApplied => self.on_answer_applied(&mut actions),
            Event::LocalCandidate(candidate) => {
                actions.push(Action::Deposit {
                    kind: SignalKind::IceCandidate,
                    receiver: self.remote_id.clone(),
                    data: candidate.to_value(),
                });
            }
            Event::CandidateRejected { candidate, .. } => {
                if !self.ignore_offer {
                    self.candidates.requeue(candidate);
                }
            }
            Event::IceGatheringChanged(gathering) => self.on_gathering(gathering, &mut actions),
            Event::IceConnectionChanged(connection) => {
                self.state.diagnostics.ice_connection = Some(connection);
                if connection == IceConnectionState::Failed {
                    self.fail("ICE connection failed".into(), true, &mut actions);
                }
            }
            Event::SignalingChanged(signaling) => {
                self.state.diagnostics.signaling = Some(signaling);
            }
            Event::ChannelOpened => self.on_channel_opened(&mut actions),
            Event::ChannelClosed { reason } => self.fail(reason, true, &mut actions),
            Event::SignalReceived(envelope) => self.on_signal(envelope, &mut actions),
            Event::HostReadyObserved { host_id } => {
                if self.role == Role::Peer {
                    self.on_host_ready(host_id, &mut actions);
                }
            }
            Event::PeersCounted(count) => {
                if self.role == Role::Host {
                    self.state.connected_peers = count;
                }
            }
            Event::StepFailed { step, reason } => {
                if step == Step::CreateOffer {
                    self.making_offer = false;
                }
                self.fail(format!("{step} failed: {reason}"), true, &mut actions);
            }
            Event::TimerFired(timer) => self.on_timer(timer, &mut actions),
        }

        if self.state != before {
            actions.push(Action::Report(self.state.clone()));
        }
        actions
    }

    fn on_connect_requested(&mut self, actions: &mut Vec<Action>) {
        match self.phase {
            Phase::Active => {}
            Phase::Backoff => {
                actions.push(Action::Cancel(Timer::Reconnect));
                self.reconnect.reset();
                self.state.reconnect_attempts = 0;
                self.state.error = None;
                self.start_attempt(actions);
            }
            Phase::Idle => {
                self.reconnect.reset();
                self.state.reconnect_attempts = 0;
                self.state.error = None;
                self.start_attempt(actions);
            }
        }
    }

    fn start_attempt(&mut self, actions: &mut Vec<Action>) {
        self.reset_negotiation();
        self.phase = Phase::Active;
        self.state.status = LinkStatus::Connecting;
        self.state.diagnostics = Default::default();

        actions.push(Action::OpenConnection);
        self.connection_open = true;
        if self.role == Role::Host {
            actions.push(Action::CreateSession);
            self.footprint = true;
        }
        actions.push(Action::StartPolling);
        if self.role == Role::Peer {
            actions.push(Action::Schedule {
                timer: Timer::HostReady,
                delay: self.timings.host_ready_timeout,
            });
            actions.push(Action::Schedule {
                timer: Timer::ConnectionEstablish,
                delay: self.timings.connection_timeout,
            });
        }
    }

    fn reset_negotiation(&mut self) {
        self.remote_id = None;
        self.making_offer = false;
        self.negotiating = false;
        self.ignore_offer = false;
        self.signaling = SignalingState::Stable;
        self.has_remote_description = false;
        self.host_ready = false;
        self.offer_seen = false;
        self.offer_epoch += 1;
        self.candidates.clear();
    }

    fn on_negotiation_needed(&mut self, actions: &mut Vec<Action>) {
        if self.making_offer || self.negotiating {
            return;
        }
        self.make_offer(false, actions);
    }

    fn make_offer(&mut self, ice_restart: bool, actions: &mut Vec<Action>) {
        self.making_offer = true;
        self.negotiating = true;
        self.offer_epoch += 1;
        actions.push(Action::CreateOffer {
            epoch: self.offer_epoch,
            ice_restart,
        });
    }

    fn on_local_offer(
        &mut self,
        epoch: u64,
        description: SessionDescription,
        actions: &mut Vec<Action>,
    ) {
        // Superseded by a rollback or a newer offer.
        if !self.making_offer || epoch != self.offer_epoch {
            return;
        }
        self.making_offer = false;
        self.signaling = SignalingState::HaveLocalOffer;
        actions.push(Action::Deposit {
            kind: SignalKind::Offer,
            receiver: self.remote_id.clone(),
            data: description.to_value(),
        });
    }

    fn on_local_answer(&mut self, description: SessionDescription, actions: &mut Vec<Action>) {
        if self.signaling != SignalingState::HaveRemoteOffer {
            return;
        }
        self.negotiating = false;
        self.ignore_offer = false;
        self.signaling = SignalingState::Stable;
        self.has_remote_description = true;
        self.flush_candidates(actions);
        actions.push(Action::Deposit {
            kind: SignalKind::Answer,
            receiver: self.remote_id.clone(),
            data: description.to_value(),
        });
    }

    fn on_answer_applied(&mut self, actions: &mut Vec<Action>) {
        self.negotiating = false;
        self.ignore_offer = false;
        self.has_remote_description = true;
        self.flush_candidates(actions);
    }

    fn flush_candidates(&mut self, actions: &mut Vec<Action>) {
        if !self.candidates.is_empty() {
            actions.push(Action::AddCandidates(self.candidates.drain()));
        }
    }

    fn on_gathering(&mut self, gathering: IceGatheringState, actions: &mut Vec<Action>) {
        self.state.diagnostics.ice_gathering = Some(gathering);
        match gathering {
            IceGatheringState::New => {}
            IceGatheringState::Gathering => actions.push(Action::Schedule {
                timer: Timer::IceGathering,
                delay: self.timings.ice_gathering_timeout,
            }),
            IceGatheringState::Complete => {
                actions.push(Action::Cancel(Timer::IceGathering));
                if self.role == Role::Host {
                    actions.push(Action::PublishReady);
                    actions.push(Action::Deposit {
                        kind: SignalKind::Ready,
                        receiver: None,
                        data: serde_json::Value::Null,
                    });
                }
            }
        }
    }

    fn on_channel_opened(&mut self, actions: &mut Vec<Action>) {
        if self.state.status.is_open() {
            return;
        }
        self.reconnect.reset();
        self.state.reconnect_attempts = 0;
        self.state.error = None;

        for timer in [
            Timer::ConnectionEstablish,
            Timer::HostReady,
            Timer::OfferWait,
            Timer::IceGathering,
        ] {
            actions.push(Action::Cancel(timer));
        }

        match self.role {
            Role::Host => {
                self.state.status = LinkStatus::Host;
                self.state.connected_peers = self.state.connected_peers.max(1);
                if let Some(remote) = &self.remote_id {
                    actions.push(Action::RegisterPeer(remote.clone()));
                }
                actions.push(Action::RefreshHost);
                actions.push(Action::Schedule {
                    timer: Timer::HostPing,
                    delay: self.timings.host_ping_interval,
                });
            }
            Role::Peer => {
                self.state.status = LinkStatus::Connected;
                self.state.connected_peers = 1;
                actions.push(Action::RegisterPeer(self.local_id.clone()));
                self.footprint = true;
            }
        }
    }

    fn on_signal(&mut self, envelope: SignalEnvelope, actions: &mut Vec<Action>) {
        // Peers leave offers in the mailbox until the host is ready.
        if envelope.kind == SignalKind::Offer && self.role == Role::Peer && !self.host_ready {
            return;
        }
        actions.push(Action::Acknowledge {
            timestamp: envelope.timestamp,
        });

        match envelope.kind {
            SignalKind::Ready => {
                if self.role == Role::Peer {
                    self.on_host_ready(envelope.sender_id, actions);
                }
            }
            SignalKind::Renegotiate => {
                if self.role == Role::Host {
                    self.on_renegotiate(envelope.sender_id, actions);
                }
            }
            SignalKind::Offer => {
                if let Ok(description) = envelope.description() {
                    self.on_remote_offer(envelope.sender_id, description, actions);
                }
            }
            SignalKind::Answer => {
                if let Ok(description) = envelope.description() {
                    self.on_remote_answer(envelope.sender_id, description, actions);
                }
            }
            SignalKind::IceCandidate => {
                if let Ok(candidate) = envelope.candidate() {
                    if self.has_remote_description {
                        actions.push(Action::AddCandidates(vec![candidate]));
                    } else {
                        self.candidates.push(candidate);
                    }
                }
            }
        }
    }

    fn on_host_ready(&mut self, host_id: PeerId, actions: &mut Vec<Action>) {
        if self.host_ready {
            return;
        }
        self.host_ready = true;
        self.remote_id = Some(host_id);
        actions.push(Action::Cancel(Timer::HostReady));
        if !self.offer_seen {
            actions.push(Action::Schedule {
                timer: Timer::OfferWait,
                delay: self.timings.offer_wait,
            });
        }
    }

    fn on_renegotiate(&mut self, sender: PeerId, actions: &mut Vec<Action>) {
        if self.state.status.is_open() {
            self.fail("renegotiation requested while connected".into(), true, actions);
            return;
        }
        self.engage_remote(sender, actions);
        if !self.making_offer {
            self.make_offer(true, actions);
        }
    }

    /// Host: remember who we are negotiating with and bound the attempt.
    fn engage_remote(&mut self, sender: PeerId, actions: &mut Vec<Action>) {
        if self.remote_id.as_ref() == Some(&sender) {
            return;
        }
        self.remote_id = Some(sender);
        if self.role == Role::Host {
            actions.push(Action::Schedule {
                timer: Timer::ConnectionEstablish,
                delay: self.timings.connection_timeout,
            });
        }
    }

    fn on_remote_offer(
        &mut self,
        sender: PeerId,
        description: SessionDescription,
        actions: &mut Vec<Action>,
    ) {
        self.offer_seen = true;
        actions.push(Action::Cancel(Timer::OfferWait));
        self.engage_remote(sender, actions);

        let polite = self.role.is_polite();
        let collision =
            self.making_offer || self.negotiating || self.signaling != SignalingState::Stable;
        self.ignore_offer = !polite && collision;
        if self.ignore_offer {
            return;
        }

        let rollback = collision && self.signaling == SignalingState::HaveLocalOffer;
        if collision {
            // Invalidate any offer still being created.
            self.making_offer = false;
            self.offer_epoch += 1;
        }
        self.negotiating = true;
        self.has_remote_description = false;
        self.signaling = SignalingState::HaveRemoteOffer;
        actions.push(Action::AcceptOffer {
            description,
            rollback,
        });
    }

    fn on_remote_answer(
        &mut self,
        sender: PeerId,
        description: SessionDescription,
        actions: &mut Vec<Action>,
    ) {
        if self.signaling != SignalingState::HaveLocalOffer {
            return;
        }
        self.engage_remote(sender, actions);
        // Our offer has been answered; the offer we ignored is obsolete.
        self.ignore_offer = false;
        self.signaling = SignalingState::Stable;
        actions.push(Action::ApplyAnswer { description });
    }

    fn on_timer(&mut self, timer: Timer, actions: &mut Vec<Action>) {
        match timer {
            Timer::IceGathering => match self.role {
                Role::Host => {
                    if !self.making_offer {
                        self.make_offer(true, actions);
                    }
                }
                Role::Peer => self.fail("ICE gathering timed out".into(), true, actions),
            },
            Timer::ConnectionEstablish => {
                if !self.state.status.is_open() {
                    self.fail("connection timed out".into(), true, actions);
                }
            }
            Timer::HostReady => {
                if !self.host_ready {
                    self.fail("host did not become ready".into(), true, actions);
                }
            }
            Timer::OfferWait => {
                if self.role == Role::Peer && self.host_ready && !self.offer_seen {
                    actions.push(Action::Deposit {
                        kind: SignalKind::Renegotiate,
                        receiver: self.remote_id.clone(),
                        data: serde_json::Value::Null,
                    });
                    actions.push(Action::Schedule {
                        timer: Timer::OfferWait,
                        delay: self.timings.offer_wait,
                    });
                }
            }
            Timer::HostPing => {
                if self.role == Role::Host && self.state.status.is_open() {
                    actions.push(Action::RefreshHost);
                    actions.push(Action::Schedule {
                        timer: Timer::HostPing,
                        delay: self.timings.host_ping_interval,
                    });
                }
            }
            Timer::Reconnect => {}
        }
    }

    fn fail(&mut self, reason: String, retryable: bool, actions: &mut Vec<Action>) {
        self.stop_attempt(actions);
        match self.reconnect.on_failure(retryable) {
            RetryDecision::Retry { attempt, delay } => {
                self.phase = Phase::Backoff;
                self.state.status = LinkStatus::Connecting;
                self.state.reconnect_attempts = attempt;
                self.state.error = Some(reason);
                if self.role == Role::Peer {
                    self.state.connected_peers = 0;
                }
                actions.push(Action::Schedule {
                    timer: Timer::Reconnect,
                    delay,
                });
            }
            RetryDecision::GiveUp { attempts } => {
                self.remove_footprint(actions);
                self.phase = Phase::Idle;
                self.state = LinkState {
                    status: LinkStatus::Disconnected,
                    connected_peers: 0,
                    error: Some(reason),
                    reconnect_attempts: attempts,
                    diagnostics: Default::default(),
                };
            }
        }
    }

    /// Stop everything belonging to the running attempt.
    fn stop_attempt(&mut self, actions: &mut Vec<Action>) {
        actions.push(Action::CancelAllTimers);
        actions.push(Action::StopPolling);
        if self.connection_open {
            actions.push(Action::CloseConnection);
            self.connection_open = false;
        }
        self.reset_negotiation();
    }

    fn remove_footprint(&mut self, actions: &mut Vec<Action>) {
        if !self.footprint {
            return;
        }
        self.footprint = false;
        match self.role {
            Role::Host => actions.push(Action::DeleteSession),
            Role::Peer => actions.push(Action::UnregisterPeer(self.local_id.clone())),
        }
    }

    fn cleanup(&mut self, complete: bool, actions: &mut Vec<Action>) {
        if self.phase != Phase::Idle || self.connection_open {
            self.stop_attempt(actions);
        }
        if complete {
            self.remove_footprint(actions);
        }
        self.phase = Phase::Idle;
        self.reconnect.reset();
        self.state = LinkState::disconnected();
    }
}
