//! Tokio-backed timer scheduler.

use link_core::{Scheduler, Timer};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Deadlines on the tokio clock.
///
/// The engine sleeps until [`TokioScheduler::next`] and then pops the due
/// timers with [`TokioScheduler::pop_due`]. Because the deadlines use
/// `tokio::time::Instant`, paused-time tests drive them deterministically.
#[derive(Debug, Default)]
pub struct TokioScheduler {
    deadlines: HashMap<Timer, Instant>,
}

impl TokioScheduler {
    /// Create a scheduler with nothing armed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Earliest armed timer and its deadline.
    pub fn next(&self) -> Option<(Timer, Instant)> {
        self.deadlines
            .iter()
            .map(|(timer, deadline)| (*timer, *deadline))
            .min_by_key(|(timer, deadline)| (*deadline, *timer))
    }

    /// Disarm and return the earliest timer due at `now`.
    ///
    /// Callers pop one timer at a time so that handling one can still
    /// cancel the others.
    pub fn pop_due(&mut self, now: Instant) -> Option<Timer> {
        let (timer, deadline) = self.next()?;
        if deadline > now {
            return None;
        }
        self.deadlines.remove(&timer);
        Some(timer)
    }

    /// Number of armed timers.
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    /// Whether nothing is armed.
    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, timer: Timer, delay: Duration) {
        self.deadlines.insert(timer, Instant::now() + delay);
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
