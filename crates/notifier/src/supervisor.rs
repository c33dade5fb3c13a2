//! Reconnection supervisor — capped exponential backoff with an attempt bound.
//!
//! Attempt `n` (1-indexed) waits `min(base * 2^n, 30s)`. The counter only
//! tracks consecutive failures: it resets whenever the feed reports
//! `Subscribed`. Once `max_attempts` is exceeded the supervisor gives up.

use std::time::Duration;

/// Upper bound on a single backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_backoff: Duration,
    pub max_attempts: u32,
    pub max_backoff: Duration,
}

impl ReconnectPolicy {
    pub fn new(base_backoff: Duration, max_attempts: u32) -> Self {
        Self {
            base_backoff,
            max_attempts,
            max_backoff: MAX_BACKOFF,
        }
    }

    /// Delay before reconnect attempt `attempt`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let base_ms = self.base_backoff.as_millis() as u64;
        let delay = Duration::from_millis(base_ms.saturating_mul(factor));
        delay.min(self.max_backoff)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), 10)
    }
}

/// Consecutive-failure counter driven by the listener.
#[derive(Debug)]
pub struct ReconnectSupervisor {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl ReconnectSupervisor {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Register a disconnect and return the delay before the next attempt.
    ///
    /// Returns `None` once the retry budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(self.policy.backoff_for(self.attempts))
    }

    /// Called on every successful subscription.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }
}
