//! Reconnect bookkeeping: a bounded counter with linear backoff.

use std::time::Duration;

use crate::config::RetryConfig;

/// Ceiling and backoff step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub step: Duration,
}

impl RetryPolicy {
    /// Delay before reconnect attempt `attempt` (0-based): `step × (attempt + 1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt.saturating_add(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            step: Duration::from_millis(config.backoff_step_ms),
        }
    }
}

/// Retry counter owned by the session manager.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    count: u32,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, count: 0 }
    }

    /// Claim the next attempt.
    ///
    /// Returns `(attempt, delay)` with `attempt` 1-based, or `None` once the
    /// ceiling is reached.  The counter never exceeds `max_retries`.
    pub fn schedule_next(&mut self) -> Option<(u32, Duration)> {
        if self.count >= self.policy.max_retries {
            return None;
        }
        let delay = self.policy.delay_for(self.count);
        self.count += 1;
        Some((self.count, delay))
    }

    /// Successful open or a fresh user connect.
    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }
}
