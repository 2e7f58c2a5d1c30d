//! Protocol version and default timings.
//!
//! These are the defaults; every timing can be overridden through the
//! `[timing]`, `[mailbox]` and `[janitor]` config sections.

use std::time::Duration;

/// Version stamped on every application message.
pub const PROTOCOL_VERSION: u32 = 1;

/// Version of the persisted session record layout.
pub const SESSION_RECORD_VERSION: u32 = 1;

/// Reconnect attempts made before giving up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Fixed delay between a failure and the next connection attempt.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// How often the mailbox is polled for envelopes.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Bound on a single ICE gathering phase.
pub const ICE_GATHERING_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on the channel opening once negotiation has started.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a peer waits for the host to announce it is ready.
pub const HOST_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a peer waits for an offer after the host is ready before
/// asking the host to renegotiate.
pub const OFFER_WAIT: Duration = Duration::from_secs(3);

/// Interval of the host liveness refresh.
pub const HOST_PING_INTERVAL: Duration = Duration::from_secs(5);

/// Age after which an unconsumed envelope is swept.
///
/// Doubled while the session has at least one connected peer.
pub const MESSAGE_EXPIRY: Duration = Duration::from_secs(30);

/// Inactivity after which an empty session may be deleted by the janitor.
pub const SESSION_EXPIRY: Duration = Duration::from_secs(60 * 60);

/// Period of the mailbox janitor.
pub const JANITOR_INTERVAL: Duration = Duration::from_secs(60);
