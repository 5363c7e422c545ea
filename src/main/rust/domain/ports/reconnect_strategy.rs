use std::time::Duration;

use crate::domain::value_objects::BackoffPolicy;

/// Decides how long to wait before the next connection attempt
pub trait ReconnectStrategy: Send {
    /// Delay before the next attempt; advances internal state
    fn next_delay(&mut self) -> Duration;

    /// Called after a successful connect
    fn reset(&mut self);
}

/// Exponential growth from the policy's initial delay up to its cap
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Retries handed out since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl ReconnectStrategy for ExponentialBackoff {
    fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Same delay every time
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

impl ReconnectStrategy for FixedDelay {
    fn next_delay(&mut self) -> Duration {
        self.0
    }

    fn reset(&mut self) {}
}
