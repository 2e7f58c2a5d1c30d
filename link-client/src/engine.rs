//! The engine task.
//!
//! One engine drives one [`Negotiator`] for one session. It is the only
//! place where core actions turn into I/O: mailbox reads and writes,
//! transport calls and timers. Results that matter to the machine are fed
//! back in as events, so every failure reaches the negotiator's single
//! failure path.

use crate::error::ClientError;
use crate::scheduler::TokioScheduler;
use crate::transport::{PeerTransport, TransportEvent, TransportEvents, TransportFactory};
use link_core::{Action, Event, LinkState, Negotiator, Scheduler, Step};
use link_mailbox::{Mailbox, SessionPatch, SessionRecord};
use link_types::{now_ms, AppMessage, Role, SessionId, SignalEnvelope, SignalKind};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Requests from a [`LinkHandle`](crate::LinkHandle).
#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Send {
        message: AppMessage,
        reply: oneshot::Sender<Result<bool, ClientError>>,
    },
    Cleanup {
        complete: bool,
        done: oneshot::Sender<()>,
    },
}

pub(crate) struct Engine {
    session_id: SessionId,
    negotiator: Negotiator,
    mailbox: Arc<dyn Mailbox>,
    factory: Arc<dyn TransportFactory>,
    transport: Option<Box<dyn PeerTransport>>,
    /// Bumped whenever the transport is replaced or closed.
    generation: u64,
    events_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
    scheduler: TokioScheduler,
    poll: Interval,
    polling: bool,
    last_timestamp: u64,
    state_tx: watch::Sender<LinkState>,
    messages_tx: mpsc::UnboundedSender<AppMessage>,
}

impl Engine {
    pub(crate) fn new(
        session_id: SessionId,
        negotiator: Negotiator,
        mailbox: Arc<dyn Mailbox>,
        factory: Arc<dyn TransportFactory>,
        events_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
        state_tx: watch::Sender<LinkState>,
        messages_tx: mpsc::UnboundedSender<AppMessage>,
    ) -> Self {
        let mut poll = tokio::time::interval(negotiator.timings().poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            session_id,
            negotiator,
            mailbox,
            factory,
            transport: None,
            generation: 0,
            events_tx,
            scheduler: TokioScheduler::new(),
            poll,
            polling: false,
            last_timestamp: 0,
            state_tx,
            messages_tx,
        }
    }

    /// Run until every handle is dropped.
    ///
    /// Work is strictly sequential: a poll, a timer and a transport callback
    /// never interleave, so a poll cannot re-enter itself.
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
    ) {
        debug!(session = %self.session_id, role = %self.negotiator.role(), "engine started");
        loop {
            let next_timer = self.scheduler.next().map(|(_, deadline)| deadline);
            let polling = self.polling;

            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.dispatch(Event::CleanupRequested { complete: false }).await;
                        break;
                    }
                },
                Some((generation, event)) = events.recv() => {
                    if generation != self.generation {
                        debug!(generation, "dropping event from a closed connection");
                        continue;
                    }
                    self.handle_transport_event(event).await;
                }
                _ = self.poll.tick(), if polling => self.poll_mailbox().await,
                _ = sleep_until(next_timer), if next_timer.is_some() => {
                    while let Some(timer) = self.scheduler.pop_due(Instant::now()) {
                        debug!(?timer, "timer fired");
                        self.dispatch(Event::TimerFired(timer)).await;
                    }
                }
            }
        }
        debug!(session = %self.session_id, "engine stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.dispatch(Event::ConnectRequested).await,
            Command::Send { message, reply } => {
                let _ = reply.send(self.send(message).await);
            }
            Command::Cleanup { complete, done } => {
                self.dispatch(Event::CleanupRequested { complete }).await;
                let _ = done.send(());
            }
        }
    }

    async fn send(&mut self, message: AppMessage) -> Result<bool, ClientError> {
        let transport = match &self.transport {
            Some(transport) if self.negotiator.is_open() => transport,
            _ => {
                debug!(kind = %message.kind, "channel not open, dropping message");
                return Ok(false);
            }
        };
        let bytes = message.to_bytes()?;
        if let Err(e) = transport.send(&bytes).await {
            warn!(kind = %message.kind, error = %e, "send failed, dropping message");
            return Ok(false);
        }
        Ok(true)
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        let event = match event {
            TransportEvent::Message(bytes) => {
                self.deliver(&bytes);
                return;
            }
            TransportEvent::NegotiationNeeded => Event::NegotiationNeeded,
            TransportEvent::LocalCandidate(candidate) => Event::LocalCandidate(candidate),
            TransportEvent::IceGatheringChanged(state) => Event::IceGatheringChanged(state),
            TransportEvent::IceConnectionChanged(state) => Event::IceConnectionChanged(state),
            TransportEvent::SignalingChanged(state) => Event::SignalingChanged(state),
            TransportEvent::ChannelOpened => Event::ChannelOpened,
            TransportEvent::ChannelClosed { reason } => Event::ChannelClosed { reason },
        };
        self.dispatch(event).await;
    }

    fn deliver(&self, bytes: &[u8]) {
        match AppMessage::from_bytes(bytes) {
            Ok(message) => {
                if !message.is_supported() {
                    debug!(version = message.version, "message from another protocol version");
                }
                let _ = self.messages_tx.send(message);
            }
            Err(e) => warn!(error = %e, len = bytes.len(), "dropping unparseable message"),
        }
    }

    /// Feed `event` to the machine and execute the resulting actions,
    /// feeding their outcomes back in until nothing is left.
    async fn dispatch(&mut self, event: Event) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            for action in self.negotiator.apply(event) {
                queue.extend(self.execute(action).await);
            }
        }
    }

    async fn poll_mailbox(&mut self) {
        let generation = self.generation;
        let local_id = self.negotiator.local_id().clone();

        let record = match self.mailbox.get_session(&self.session_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                warn!(session = %self.session_id, error = %e, "mailbox poll failed");
                return;
            }
        };
        match self.negotiator.role() {
            Role::Peer => {
                if record.metadata.ready_for_connections {
                    self.dispatch(Event::HostReadyObserved {
                        host_id: record.host_id.clone(),
                    })
                    .await;
                }
            }
            Role::Host => {
                self.dispatch(Event::PeersCounted(record.connected_peers.len()))
                    .await;
            }
        }

        let envelopes = match self.mailbox.signals_for(&self.session_id, &local_id).await {
            Ok(envelopes) => envelopes,
            Err(e) => {
                warn!(session = %self.session_id, error = %e, "reading signals failed");
                return;
            }
        };
        for envelope in envelopes {
            // The attempt ended while handling an earlier envelope.
            if !self.polling || self.generation != generation {
                break;
            }
            log_malformed(&envelope);
            let kind = envelope.kind;
            let sender = envelope.sender_id.clone();
            self.dispatch(Event::SignalReceived(envelope)).await;
            if kind == SignalKind::Offer && self.negotiator.is_ignoring_offer() {
                debug!(from = %sender, "ignoring colliding offer");
            }
        }
    }

    /// Strictly increasing timestamps for our own envelopes.
    fn next_timestamp(&mut self) -> u64 {
        self.last_timestamp = now_ms().max(self.last_timestamp + 1);
        self.last_timestamp
    }

    async fn execute(&mut self, action: Action) -> Vec<Event> {
        match action {
            Action::OpenConnection => {
                self.close_transport().await;
                let events = TransportEvents::new(self.generation, self.events_tx.clone());
                match self.factory.open(self.negotiator.role(), events).await {
                    Ok(transport) => {
                        debug!(generation = self.generation, "connection opened");
                        self.transport = Some(transport);
                    }
                    Err(e) => return failed(Step::OpenConnection, e),
                }
            }
            Action::CloseConnection => self.close_transport().await,
            Action::CreateSession => {
                let record = SessionRecord::new(
                    self.session_id.clone(),
                    self.negotiator.local_id().clone(),
                    now_ms(),
                );
                if let Err(e) = self.mailbox.create_session(record).await {
                    return failed(Step::CreateSession, e);
                }
                info!(session = %self.session_id, "session created");
            }
            Action::DeleteSession => match self.mailbox.delete_session(&self.session_id).await {
                Ok(_) => info!(session = %self.session_id, "session deleted"),
                Err(e) => warn!(session = %self.session_id, error = %e, "deleting session failed"),
            },
            Action::PublishReady => self.patch_session(SessionPatch::ready()).await,
            Action::RefreshHost => self.patch_session(SessionPatch::host_alive(now_ms())).await,
            Action::RegisterPeer(peer) => {
                if let Err(e) = self.mailbox.add_connected_peer(&self.session_id, &peer).await {
                    warn!(%peer, error = %e, "registering peer failed");
                }
            }
            Action::UnregisterPeer(peer) => {
                if let Err(e) = self
                    .mailbox
                    .remove_connected_peer(&self.session_id, &peer)
                    .await
                {
                    warn!(%peer, error = %e, "unregistering peer failed");
                }
            }
            Action::StartPolling => {
                self.polling = true;
                self.poll.reset_immediately();
            }
            Action::StopPolling => self.polling = false,
            Action::Deposit {
                kind,
                receiver,
                data,
            } => {
                let envelope = SignalEnvelope::new(
                    kind,
                    self.negotiator.local_id().clone(),
                    receiver,
                    self.next_timestamp(),
                    data,
                );
                if let Err(e) = self.mailbox.add_signal(&self.session_id, envelope).await {
                    return failed(Step::Deposit, e);
                }
                debug!(%kind, "signal deposited");
            }
            Action::Acknowledge { timestamp } => {
                if let Err(e) = self.mailbox.remove_signal(&self.session_id, timestamp).await {
                    warn!(timestamp, error = %e, "acknowledging signal failed");
                }
            }
            Action::CreateOffer { epoch, ice_restart } => {
                let Some(transport) = &self.transport else {
                    return not_open(Step::CreateOffer);
                };
                return match transport.create_offer(ice_restart).await {
                    Ok(description) => vec![Event::LocalOfferCreated { epoch, description }],
                    Err(e) => failed(Step::CreateOffer, e),
                };
            }
            Action::AcceptOffer {
                description,
                rollback,
            } => {
                let Some(transport) = &self.transport else {
                    return not_open(Step::AcceptOffer);
                };
                if rollback {
                    debug!("rolling back local offer");
                }
                return match transport.accept_offer(description, rollback).await {
                    Ok(description) => vec![Event::LocalAnswerCreated { description }],
                    Err(e) => failed(Step::AcceptOffer, e),
                };
            }
            Action::ApplyAnswer { description } => {
                let Some(transport) = &self.transport else {
                    return not_open(Step::ApplyAnswer);
                };
                return match transport.apply_answer(description).await {
                    Ok(()) => vec![Event::RemoteAnswerApplied],
                    Err(e) => failed(Step::ApplyAnswer, e),
                };
            }
            Action::AddCandidates(candidates) => {
                let Some(transport) = &self.transport else {
                    return Vec::new();
                };
                let mut rejected = Vec::new();
                for candidate in candidates {
                    if let Err(e) = transport.add_ice_candidate(candidate.clone()).await {
                        debug!(error = %e, "candidate rejected");
                        rejected.push(Event::CandidateRejected {
                            candidate,
                            reason: e.to_string(),
                        });
                    }
                }
                return rejected;
            }
            Action::Schedule { timer, delay } => self.scheduler.schedule(timer, delay),
            Action::Cancel(timer) => self.scheduler.cancel(timer),
            Action::CancelAllTimers => self.scheduler.cancel_all(),
            Action::Report(state) => self.report(state),
        }
        Vec::new()
    }

    async fn close_transport(&mut self) {
        // Late callbacks from the old connection must not reach the machine.
        self.generation += 1;
        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                debug!(error = %e, "closing connection failed");
            }
        }
    }

    async fn patch_session(&self, patch: SessionPatch) {
        match self.mailbox.update_session(&self.session_id, patch).await {
            Ok(true) => {}
            Ok(false) => warn!(session = %self.session_id, "session vanished from mailbox"),
            Err(e) => warn!(session = %self.session_id, error = %e, "updating session failed"),
        }
    }

    fn report(&self, state: LinkState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            if current.status != state.status {
                info!(
                    session = %self.session_id,
                    from = %current.status,
                    to = %state.status,
                    attempts = state.reconnect_attempts,
                    error = state.error.as_deref().unwrap_or(""),
                    "link status changed"
                );
            }
            *current = state;
            true
        });
        if !changed {
            debug!(session = %self.session_id, "state unchanged");
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn failed(step: Step, error: impl std::fmt::Display) -> Vec<Event> {
    warn!(%step, error = %error, "step failed");
    vec![Event::StepFailed {
        step,
        reason: error.to_string(),
    }]
}

fn not_open(step: Step) -> Vec<Event> {
    failed(step, "no connection")
}

fn log_malformed(envelope: &SignalEnvelope) {
    let result = match envelope.kind {
        SignalKind::Offer | SignalKind::Answer => envelope.description().map(|_| ()),
        SignalKind::IceCandidate => envelope.candidate().map(|_| ()),
        SignalKind::Ready | SignalKind::Renegotiate => Ok(()),
    };
    if let Err(e) = result {
        warn!(from = %envelope.sender_id, kind = %envelope.kind, error = %e, "dropping malformed signal");
    }
}
