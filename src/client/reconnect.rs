//! Reconnect backoff policy
//!
//! Delays grow linearly with the number of consecutive failed attempts and
//! are capped: `min(failures * step, max_delay)`. The first retry after a
//! drop from an established connection waits one step.

use std::time::Duration;

/// Reconnection configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Schedule reconnects after unexpected disconnects
    pub enabled: bool,
    /// Added to the delay for every consecutive failed attempt
    pub step: Duration,
    /// Ceiling for the delay
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            step: Duration::from_millis(1000),
            max_delay: Duration::from_millis(60_000),
        }
    }
}

impl ReconnectConfig {
    /// Delay before the attempt following `failures` consecutive failures
    pub fn delay_for(&self, failures: u32) -> Duration {
        self.step.saturating_mul(failures).min(self.max_delay)
    }
}

/// Why the state machine decided for or against a reconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectionDecision {
    Proceed { attempt: u32, delay: Duration },
    AbortStopping,
    AbortRejected,
    AbortDisabled,
}

/// Counts consecutive failed attempts and produces the next delay
#[derive(Debug, Clone, Default)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    failures: u32,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    /// Consecutive connection attempts that ended before a successful CONNACK
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// Called on a successful CONNACK
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// A connection attempt ended without reaching CONNACK success
    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    /// Decide what happens after a connection ends
    pub fn next(&self, stopping: bool, rejected: bool) -> ReconnectionDecision {
        if stopping {
            return ReconnectionDecision::AbortStopping;
        }
        if rejected {
            return ReconnectionDecision::AbortRejected;
        }
        if !self.config.enabled {
            return ReconnectionDecision::AbortDisabled;
        }

        ReconnectionDecision::Proceed {
            attempt: self.failures.saturating_add(1),
            delay: self.config.delay_for(self.failures.max(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_backoff_with_cap() {
        let config = ReconnectConfig::default();
        assert_eq!(config.delay_for(0), Duration::ZERO);
        assert_eq!(config.delay_for(1), Duration::from_millis(1000));
        assert_eq!(config.delay_for(3), Duration::from_millis(3000));
        assert_eq!(config.delay_for(60), Duration::from_millis(60_000));
        assert_eq!(config.delay_for(61), Duration::from_millis(60_000));
        assert_eq!(config.delay_for(u32::MAX), Duration::from_millis(60_000));
    }

    #[test]
    fn test_first_retry_after_drop_waits_one_step() {
        let policy = ReconnectPolicy::default();
        assert_eq!(
            policy.next(false, false),
            ReconnectionDecision::Proceed {
                attempt: 1,
                delay: Duration::from_millis(1000)
            }
        );
    }

    #[test]
    fn test_three_failures_give_three_seconds() {
        let mut policy = ReconnectPolicy::default();
        for _ in 0..3 {
            policy.record_failure();
        }
        assert_eq!(
            policy.next(false, false),
            ReconnectionDecision::Proceed {
                attempt: 4,
                delay: Duration::from_millis(3000)
            }
        );
    }

    #[test]
    fn test_cap_after_sixty_one_failures() {
        let mut policy = ReconnectPolicy::default();
        for _ in 0..61 {
            policy.record_failure();
        }
        assert_eq!(
            policy.next(false, false),
            ReconnectionDecision::Proceed {
                attempt: 62,
                delay: Duration::from_millis(60_000)
            }
        );
    }

    #[test]
    fn test_reset_on_success() {
        let mut policy = ReconnectPolicy::default();
        policy.record_failure();
        policy.record_failure();
        policy.reset();
        assert_eq!(policy.failures(), 0);
        assert_eq!(
            policy.next(false, false),
            ReconnectionDecision::Proceed {
                attempt: 1,
                delay: Duration::from_millis(1000)
            }
        );
    }

    #[test]
    fn test_abort_reasons() {
        let policy = ReconnectPolicy::new(ReconnectConfig {
            enabled: false,
            ..ReconnectConfig::default()
        });
        assert_eq!(policy.next(true, false), ReconnectionDecision::AbortStopping);
        assert_eq!(policy.next(false, true), ReconnectionDecision::AbortRejected);
        assert_eq!(policy.next(false, false), ReconnectionDecision::AbortDisabled);
    }
}
