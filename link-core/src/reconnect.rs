//! Bounded fixed-delay reconnection.
//!
//! A failure either earns another attempt after a fixed delay or, once the
//! budget is spent, a final give-up. A successful open resets the budget.

use std::time::Duration;

/// Outcome of reporting a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after `delay`. `attempt` is 1-based.
    Retry {
        /// Attempt number being scheduled.
        attempt: u32,
        /// Delay before the attempt starts.
        delay: Duration,
    },
    /// Stop retrying.
    GiveUp {
        /// Attempts that were made before giving up.
        attempts: u32,
    },
}

/// Reconnect budget tracker.
#[derive(Debug, Clone)]
pub struct Reconnector {
    attempts: u32,
    max_attempts: u32,
    delay: Duration,
}

impl Reconnector {
    /// Allow `max_attempts` reconnects spaced by `delay`.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            delay,
        }
    }

    /// Record a failure. Non-retryable failures give up immediately.
    pub fn on_failure(&mut self, retryable: bool) -> RetryDecision {
        if retryable && self.attempts < self.max_attempts {
            self.attempts += 1;
            RetryDecision::Retry {
                attempt: self.attempts,
                delay: self.delay,
            }
        } else {
            RetryDecision::GiveUp {
                attempts: self.attempts,
            }
        }
    }

    /// Restore the full budget.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Attempts made since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Configured budget.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconnector() -> Reconnector {
        Reconnector::new(3, Duration::from_secs(2))
    }

    #[test]
    fn retries_until_budget_spent() {
        let mut r = reconnector();
        for attempt in 1..=3 {
            assert_eq!(
                r.on_failure(true),
                RetryDecision::Retry {
                    attempt,
                    delay: Duration::from_secs(2)
                }
            );
        }
        assert_eq!(r.on_failure(true), RetryDecision::GiveUp { attempts: 3 });
        assert_eq!(r.on_failure(true), RetryDecision::GiveUp { attempts: 3 });
    }

    #[test]
    fn non_retryable_gives_up_at_once() {
        let mut r = reconnector();
        assert_eq!(r.on_failure(false), RetryDecision::GiveUp { attempts: 0 });
        assert_eq!(r.attempts(), 0);
    }

    #[test]
    fn reset_restores_budget() {
        let mut r = reconnector();
        r.on_failure(true);
        r.on_failure(true);
        r.reset();
        assert_eq!(r.attempts(), 0);
        assert!(matches!(
            r.on_failure(true),
            RetryDecision::Retry { attempt: 1, .. }
        ));
    }

    #[test]
    fn zero_budget_never_retries() {
        let mut r = Reconnector::new(0, Duration::from_secs(2));
        assert_eq!(r.on_failure(true), RetryDecision::GiveUp { attempts: 0 });
    }
}
