//! # link-core
//!
//! Pure logic for peerlink (no I/O, instant tests).
//!
//! This crate implements the connection negotiation state machine, the
//! reconnection controller and the timer model without any network, mailbox
//! or clock access.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take events and produce
//! actions without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic collision handling (same events → same actions)
//! - Virtual time: timers are actions, advanced by a [`VirtualScheduler`]
//!
//! The actual I/O (mailbox polling, transport calls, real timers) is
//! performed by `link-client`, which interprets the actions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod candidates;
pub mod negotiation;
pub mod reconnect;
pub mod state;
pub mod timer;

pub use candidates::CandidateQueue;
pub use negotiation::{Action, Event, Negotiator, Phase, Step};
pub use reconnect::{Reconnector, RetryDecision};
pub use state::{
    Diagnostics, IceConnectionState, IceGatheringState, LinkState, LinkStatus, SignalingState,
};
pub use timer::{Scheduler, Timer, Timings, VirtualScheduler};
