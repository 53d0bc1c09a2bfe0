use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Relay counters, shared by every peer task of one relay instance.
#[derive(Debug)]
pub struct RelayStats {
    started: Instant,
    started_at: DateTime<Utc>,
    connections_accepted: AtomicU64,
    connections_closed: AtomicU64,
    messages_received: AtomicU64,
    messages_relayed: AtomicU64,
    messages_coalesced: AtomicU64,
    sends_dropped: AtomicU64,
    peers_pruned: AtomicU64,
    auth_rejections: AtomicU64,
}

/// Point-in-time copy of `RelayStats`, as served on `/health`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayStatsSnapshot {
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub connections_accepted: u64,
    pub connections_closed: u64,
    pub messages_received: u64,
    pub messages_relayed: u64,
    pub messages_coalesced: u64,
    pub sends_dropped: u64,
    pub peers_pruned: u64,
    pub auth_rejections: u64,
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
            connections_accepted: AtomicU64::new(0),
            connections_closed: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_relayed: AtomicU64::new(0),
            messages_coalesced: AtomicU64::new(0),
            sends_dropped: AtomicU64::new(0),
            peers_pruned: AtomicU64::new(0),
            auth_rejections: AtomicU64::new(0),
        }
    }

    pub fn record_connection(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Counted once a peer's reader and writer have both finished.
    pub fn record_disconnection(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced(&self) {
        self.messages_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_broadcast(&self, delivered: usize, dropped: usize) {
        self.messages_relayed
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.sends_dropped.fetch_add(dropped as u64, Ordering::Relaxed);
    }

    pub fn record_pruned(&self, count: usize) {
        self.peers_pruned.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_auth_rejection(&self) {
        self.auth_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            started_at: self.started_at,
            uptime_seconds: self.started.elapsed().as_secs(),
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_relayed: self.messages_relayed.load(Ordering::Relaxed),
            messages_coalesced: self.messages_coalesced.load(Ordering::Relaxed),
            sends_dropped: self.sends_dropped.load(Ordering::Relaxed),
            peers_pruned: self.peers_pruned.load(Ordering::Relaxed),
            auth_rejections: self.auth_rejections.load(Ordering::Relaxed),
        }
    }
}
