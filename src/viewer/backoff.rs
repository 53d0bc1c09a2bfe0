use crate::config::ViewerConfig;
use std::time::Duration;

/// Exponential reconnect schedule with a capped exponent and a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_exponent: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            max: Duration::from_millis(15000),
            max_exponent: 6,
        }
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &ViewerConfig) -> Self {
        Self {
            base: Duration::from_millis(config.backoff_base_ms),
            max: Duration::from_millis(config.backoff_max_ms),
            max_exponent: config.backoff_max_exponent,
        }
    }

    /// Delay before reconnect number `attempt` (1 for the first retry).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(self.max_exponent).min(31);
        let delay_ms = (self.base.as_millis() as u64).saturating_mul(2_u64.pow(exponent));
        let delay = Duration::from_millis(delay_ms);

        if delay > self.max {
            self.max
        } else {
            delay
        }
    }
}

/// Consecutive failure counter feeding a `ReconnectPolicy`.
///
/// The count is bumped before the delay is computed, so the first retry
/// already waits `base * 2`. A successful open resets it.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        self.policy.delay_for(self.attempt)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
