use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Rolling mean of the gaps between consecutive inbound frames.
#[derive(Debug, Clone)]
pub struct LatencyTracker {
    window: usize,
    samples: VecDeque<Duration>,
    last_arrival: Option<Instant>,
}

impl LatencyTracker {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
            last_arrival: None,
        }
    }

    /// Record an arrival and return the updated mean, if there is one yet.
    pub fn record(&mut self, now: Instant) -> Option<Duration> {
        if let Some(previous) = self.last_arrival.replace(now) {
            if self.samples.len() == self.window {
                self.samples.pop_front();
            }
            self.samples.push_back(now.saturating_duration_since(previous));
        }
        self.mean()
    }

    pub fn mean(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: Duration = self.samples.iter().sum();
        Some(total / self.samples.len() as u32)
    }

    pub fn samples(&self) -> usize {
        self.samples.len()
    }

    /// Forget everything; used when a new connection opens.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.last_arrival = None;
    }
}
