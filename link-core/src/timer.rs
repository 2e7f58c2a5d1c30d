//! Timer model.
//!
//! Every timeout the engine relies on is a named [`Timer`]. The state machine
//! only emits `Schedule`/`Cancel` actions; whoever interprets them provides a
//! [`Scheduler`]. Tests use [`VirtualScheduler`] so time is fully controlled.

use link_types::constants::{
    CONNECTION_TIMEOUT, HOST_PING_INTERVAL, HOST_READY_TIMEOUT, ICE_GATHERING_TIMEOUT,
    MAX_RECONNECT_ATTEMPTS, OFFER_WAIT, POLL_INTERVAL, RECONNECT_DELAY,
};
use std::collections::HashMap;
use std::time::Duration;

/// Named timeouts. At most one instance of each is armed at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Timer {
    /// Local candidate discovery took too long.
    IceGathering,
    /// The channel did not open in time.
    ConnectionEstablish,
    /// Peer: the host never announced readiness.
    HostReady,
    /// Peer: host is ready but no offer arrived.
    OfferWait,
    /// Backoff before the next connect attempt.
    Reconnect,
    /// Host: refresh the liveness record.
    HostPing,
}

/// Timing parameters for one engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    /// Mailbox poll period.
    pub poll_interval: Duration,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Reconnects allowed before giving up.
    pub max_reconnect_attempts: u32,
    /// ICE gathering timeout.
    pub ice_gathering_timeout: Duration,
    /// Connection establishment timeout.
    pub connection_timeout: Duration,
    /// How long a peer waits for the host's ready signal.
    pub host_ready_timeout: Duration,
    /// How long a peer waits for an offer once the host is ready.
    pub offer_wait: Duration,
    /// Host liveness refresh period.
    pub host_ping_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            reconnect_delay: RECONNECT_DELAY,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            ice_gathering_timeout: ICE_GATHERING_TIMEOUT,
            connection_timeout: CONNECTION_TIMEOUT,
            host_ready_timeout: HOST_READY_TIMEOUT,
            offer_wait: OFFER_WAIT,
            host_ping_interval: HOST_PING_INTERVAL,
        }
    }
}

/// Arms and cancels named timers.
///
/// Arming a timer that is already armed replaces its deadline.
pub trait Scheduler {
    /// Arm `timer` to fire after `delay`.
    fn schedule(&mut self, timer: Timer, delay: Duration);

    /// Disarm `timer`. No-op if it is not armed.
    fn cancel(&mut self, timer: Timer);

    /// Disarm every timer.
    fn cancel_all(&mut self);

    /// Whether `timer` is currently armed.
    fn is_armed(&self, timer: Timer) -> bool;
}

/// Scheduler driven by explicit calls to [`VirtualScheduler::advance`].
#[derive(Debug, Default)]
pub struct VirtualScheduler {
    now: Duration,
    deadlines: HashMap<Timer, Duration>,
}

impl VirtualScheduler {
    /// Create a scheduler at virtual time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Earliest pending deadline, if any.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.deadlines.values().min().copied()
    }

    /// Move time forward by `by`, returning expired timers in deadline order.
    ///
    /// Expired timers are disarmed before being returned.
    pub fn advance(&mut self, by: Duration) -> Vec<Timer> {
        self.now += by;
        let now = self.now;
        let mut fired: Vec<(Duration, Timer)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(timer, deadline)| (*deadline, *timer))
            .collect();
        fired.sort();
        for (_, timer) in &fired {
            self.deadlines.remove(timer);
        }
        fired.into_iter().map(|(_, timer)| timer).collect()
    }

    /// Jump to the next deadline and fire the single earliest timer.
    pub fn advance_to_next(&mut self) -> Option<Timer> {
        let (timer, deadline) = self
            .deadlines
            .iter()
            .map(|(t, d)| (*t, *d))
            .min_by_key(|(t, d)| (*d, *t))?;
        self.now = self.now.max(deadline);
        self.deadlines.remove(&timer);
        Some(timer)
    }
}

impl Scheduler for VirtualScheduler {
    fn schedule(&mut self, timer: Timer, delay: Duration) {
        self.deadlines.insert(timer, self.now + delay);
    }

    fn cancel(&mut self, timer: Timer) {
        self.deadlines.remove(&timer);
    }

    fn cancel_all(&mut self) {
        self.deadlines.clear();
    }

    fn is_armed(&self, timer: Timer) -> bool {
        self.deadlines.contains_key(&timer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timings_match_constants() {
        let t = Timings::default();
        assert_eq!(t.max_reconnect_attempts, 3);
        assert_eq!(t.reconnect_delay, Duration::from_secs(2));
        assert_eq!(t.ice_gathering_timeout, Duration::from_secs(10));
        assert_eq!(t.connection_timeout, Duration::from_secs(30));
    }

    #[test]
    fn fires_in_deadline_order() {
        let mut s = VirtualScheduler::new();
        s.schedule(Timer::ConnectionEstablish, Duration::from_secs(30));
        s.schedule(Timer::IceGathering, Duration::from_secs(10));
        s.schedule(Timer::HostPing, Duration::from_secs(5));

        assert!(s.advance(Duration::from_secs(4)).is_empty());
        assert_eq!(
            s.advance(Duration::from_secs(26)),
            vec![Timer::HostPing, Timer::IceGathering, Timer::ConnectionEstablish]
        );
        assert_eq!(s.next_deadline(), None);
    }

    #[test]
    fn rearm_replaces_deadline() {
        let mut s = VirtualScheduler::new();
        s.schedule(Timer::OfferWait, Duration::from_secs(3));
        s.advance(Duration::from_secs(2));
        s.schedule(Timer::OfferWait, Duration::from_secs(3));

        assert!(s.advance(Duration::from_secs(2)).is_empty());
        assert_eq!(s.advance(Duration::from_secs(1)), vec![Timer::OfferWait]);
    }

    #[test]
    fn cancel_disarms() {
        let mut s = VirtualScheduler::new();
        s.schedule(Timer::Reconnect, Duration::from_secs(2));
        s.schedule(Timer::HostReady, Duration::from_secs(30));
        s.cancel(Timer::Reconnect);
        assert!(!s.is_armed(Timer::Reconnect));
        assert!(s.is_armed(Timer::HostReady));

        s.cancel_all();
        assert!(s.advance(Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn advance_to_next_moves_clock() {
        let mut s = VirtualScheduler::new();
        s.schedule(Timer::Reconnect, Duration::from_secs(2));
        assert_eq!(s.advance_to_next(), Some(Timer::Reconnect));
        assert_eq!(s.now(), Duration::from_secs(2));
        assert_eq!(s.advance_to_next(), None);
    }
}
