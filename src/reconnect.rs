//! Bounded reconnection policy.
//!
//! [`ReconnectPolicy`] is pure bookkeeping: it never sleeps or touches the
//! network. The connection driver reports each failure and acts on the
//! returned [`RetryDecision`].

use std::time::Duration;

/// Default ceiling on consecutive automatic reconnect attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay before the first automatic attempt.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Default upper bound for the backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(5000);

/// What to do after a failed connection attempt or a remote close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then try again. `attempt` counts from 1.
    Retry {
        attempt: u32,
        max: u32,
        delay: Duration,
    },
    /// The ceiling is exhausted; stay down until a fresh start.
    GiveUp { attempts: u32 },
}

impl RetryDecision {
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry { .. })
    }
}

/// Attempt counter with a fixed ceiling and a capped exponential delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    attempt: u32,
    max: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

impl ReconnectPolicy {
    /// `max_delay` below `base_delay` is raised to `base_delay`.
    pub fn new(max: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            attempt: 0,
            max,
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Consecutive failures since the last success.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max
    }

    /// `true` once the ceiling has been passed.
    pub fn is_exhausted(&self) -> bool {
        self.attempt > self.max
    }

    /// Record a failure and decide whether another automatic attempt is allowed.
    ///
    /// The first `max` failures yield [`RetryDecision::Retry`]; the next one
    /// yields [`RetryDecision::GiveUp`]. The counter saturates after that.
    pub fn record_failure(&mut self) -> RetryDecision {
        if !self.is_exhausted() {
            self.attempt += 1;
        }
        if self.attempt <= self.max {
            RetryDecision::Retry {
                attempt: self.attempt,
                max: self.max,
                delay: self.delay_for(self.attempt),
            }
        } else {
            RetryDecision::GiveUp {
                attempts: self.max,
            }
        }
    }

    /// Record a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Delay before automatic attempt `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at the configured maximum. Non-decreasing in `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn retries_up_to_ceiling_then_gives_up() {
        let mut policy = ReconnectPolicy::default();
        let mut retries = 0;
        for expected in 1..=DEFAULT_MAX_ATTEMPTS {
            match policy.record_failure() {
                RetryDecision::Retry { attempt, max, .. } => {
                    assert_eq!(attempt, expected);
                    assert_eq!(max, DEFAULT_MAX_ATTEMPTS);
                    retries += 1;
                }
                other => panic!("expected retry, got {other:?}"),
            }
        }
        assert_eq!(retries, 5);
        assert_eq!(
            policy.record_failure(),
            RetryDecision::GiveUp { attempts: 5 }
        );
        assert!(policy.is_exhausted());
    }

    #[test]
    fn stays_exhausted_until_reset() {
        let mut policy = ReconnectPolicy::new(2, Duration::from_millis(1), Duration::from_millis(1));
        for _ in 0..10 {
            policy.record_failure();
        }
        assert!(!policy.record_failure().is_retry());
        assert_eq!(policy.attempt(), 3);

        policy.reset();
        assert_eq!(policy.attempt(), 0);
        assert!(policy.record_failure().is_retry());
    }

    #[test]
    fn success_resets_attempt_count() {
        let mut policy = ReconnectPolicy::default();
        policy.record_failure();
        policy.record_failure();
        policy.reset();
        assert_eq!(
            policy.record_failure(),
            RetryDecision::Retry {
                attempt: 1,
                max: 5,
                delay: DEFAULT_BASE_DELAY
            }
        );
    }

    #[test]
    fn delay_is_non_decreasing_and_capped() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<Duration> = (1..=40).map(|n| policy.delay_for(n)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(delays[0], Duration::from_millis(1000));
        assert_eq!(delays[1], Duration::from_millis(2000));
        assert_eq!(delays[2], Duration::from_millis(4000));
        assert_eq!(*delays.last().unwrap(), DEFAULT_MAX_DELAY);
    }

    #[test]
    fn zero_ceiling_gives_up_immediately() {
        let mut policy = ReconnectPolicy::new(0, Duration::ZERO, Duration::ZERO);
        assert_eq!(policy.record_failure(), RetryDecision::GiveUp { attempts: 0 });
    }
}
