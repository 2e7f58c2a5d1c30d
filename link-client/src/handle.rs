//! Application-facing handle to a running engine.

use crate::engine::{Command, Engine};
use crate::error::ClientError;
use crate::transport::TransportFactory;
use link_core::{LinkState, Negotiator, Timings};
use link_mailbox::Mailbox;
use link_types::{AppMessage, PeerId, Role, SessionId};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

/// Messages received over the channel, in arrival order.
pub type Messages = mpsc::UnboundedReceiver<AppMessage>;

/// Parameters for one engine.
#[derive(Debug, Clone)]
pub struct LinkOptions {
    /// Session (document) to join.
    pub session_id: SessionId,
    /// Host or peer.
    pub role: Role,
    /// Our party id.
    pub local_id: PeerId,
    /// Timing parameters.
    pub timings: Timings,
}

impl LinkOptions {
    /// Options with a fresh random party id and default timings.
    pub fn new(session_id: SessionId, role: Role) -> Self {
        Self {
            session_id,
            role,
            local_id: PeerId::random(),
            timings: Timings::default(),
        }
    }

    /// Use these timings.
    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Use a fixed party id.
    pub fn with_local_id(mut self, local_id: PeerId) -> Self {
        self.local_id = local_id;
        self
    }
}

/// Handle to an engine task.
///
/// Cheap to clone. The engine runs until every clone is dropped, then tears
/// its connection down without touching its mailbox footprint.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    session_id: SessionId,
    local_id: PeerId,
    role: Role,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<LinkState>,
}

impl LinkHandle {
    /// Spawn an engine on the current tokio runtime.
    ///
    /// The engine stays idle until [`LinkHandle::connect`].
    pub fn spawn(
        options: LinkOptions,
        mailbox: Arc<dyn Mailbox>,
        factory: Arc<dyn TransportFactory>,
    ) -> (Self, Messages) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (messages_tx, messages_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(LinkState::disconnected());

        let negotiator = Negotiator::new(options.role, options.local_id.clone(), options.timings);
        let engine = Engine::new(
            options.session_id.clone(),
            negotiator,
            mailbox,
            factory,
            events_tx,
            state_tx,
            messages_tx,
        );
        tokio::spawn(engine.run(commands_rx, events_rx));

        let handle = Self {
            session_id: options.session_id,
            local_id: options.local_id,
            role: options.role,
            commands: commands_tx,
            state: state_rx,
        };
        (handle, messages_rx)
    }

    /// Session this engine serves.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Our party id.
    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// Our role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Start connecting. Also restarts an engine that gave up.
    ///
    /// A no-op while an attempt is already running.
    pub fn connect(&self) -> Result<(), ClientError> {
        self.command(Command::Connect)
    }

    /// Send an application message.
    ///
    /// Returns `Ok(false)` when the channel is not open or the transport
    /// refuses the message; the message is dropped.
    pub async fn send<T: Serialize>(&self, kind: &str, payload: &T) -> Result<bool, ClientError> {
        let message = AppMessage::new(kind, payload)?;
        let (reply, rx) = oneshot::channel();
        self.command(Command::Send { message, reply })?;
        rx.await.map_err(|_| ClientError::Stopped)?
    }

    /// Tear the link down. With `complete`, also remove the host's session
    /// or the peer's registration from the mailbox.
    ///
    /// Safe to call repeatedly and from any state.
    pub async fn cleanup(&self, complete: bool) -> Result<(), ClientError> {
        let (done, rx) = oneshot::channel();
        self.command(Command::Cleanup { complete, done })?;
        rx.await.map_err(|_| ClientError::Stopped)
    }

    /// Latest state snapshot.
    pub fn state(&self) -> LinkState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }

    /// Wait until the state satisfies `predicate` and return it.
    pub async fn wait_for<F>(&self, predicate: F) -> Result<LinkState, ClientError>
    where
        F: FnMut(&LinkState) -> bool,
    {
        let mut state = self.state.clone();
        let result = state
            .wait_for(predicate)
            .await
            .map(|state| state.clone())
            .map_err(|_| ClientError::Stopped);
        result
    }

    fn command(&self, command: Command) -> Result<(), ClientError> {
        self.commands.send(command).map_err(|_| ClientError::Stopped)
    }
}
