use std::time::Duration;

use crate::domain::errors::{DomainError, Result};

/// Exponential backoff parameters for bridge reconnection.
///
/// Delays grow from `initial_delay` by `multiplier` per attempt and are
/// capped at `max_delay`, which is never below `initial_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl BackoffPolicy {
    pub fn new(initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Result<Self> {
        if !multiplier.is_finite() || multiplier <= 1.0 {
            return Err(DomainError::InvalidBackoffMultiplier);
        }

        Ok(Self {
            initial_delay,
            max_delay: max_delay.max(initial_delay),
            multiplier,
        })
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Delay before retry number `attempt` (0 is the first retry)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        Duration::try_from_secs_f64(self.initial_delay.as_secs_f64() * factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}
