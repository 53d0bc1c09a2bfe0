use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Drops messages that arrive too soon after the last relayed one.
///
/// Each relay owns its own gate; nothing is shared between instances.
#[derive(Debug)]
pub struct RateGate {
    min_interval: Option<Duration>,
    last_relayed: Mutex<Option<Instant>>,
}

impl RateGate {
    /// `None` disables coalescing: every message is admitted.
    pub fn new(min_interval: Option<Duration>) -> Self {
        Self {
            min_interval,
            last_relayed: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.min_interval.is_some()
    }

    pub fn admit(&self, now: Instant) -> bool {
        let Some(min_interval) = self.min_interval else {
            return true;
        };

        let mut last = self.last_relayed.lock();
        match *last {
            Some(previous) if now.saturating_duration_since(previous) < min_interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}
