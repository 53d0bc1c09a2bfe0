use super::registry::{Outbound, PeerId, PeerRegistry};
use super::stats::RelayStats;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub pinged: usize,
    pub pruned: Vec<PeerId>,
}

/// One liveness pass over the registry.
///
/// A peer that has not answered since the previous pass is terminated;
/// every other peer has its flag cleared and is pinged again.
pub fn sweep(registry: &PeerRegistry) -> SweepReport {
    let mut report = SweepReport::default();

    for peer in registry.snapshot() {
        if !peer.take_alive() {
            if registry.terminate(peer.id()) {
                debug!("Peer {} missed its heartbeat, terminating", peer.id());
                report.pruned.push(peer.id());
            }
            continue;
        }

        // A full queue already means the peer is behind; the next pass
        // decides its fate.
        let _ = peer.try_send(Outbound::Ping);
        report.pinged += 1;
    }

    report
}

/// Run `sweep` every `period` until `shutdown` fires.
pub fn spawn_heartbeat(
    registry: Arc<PeerRegistry>,
    stats: Arc<RelayStats>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let report = sweep(&registry);
                    if !report.pruned.is_empty() {
                        info!("Pruned {} unresponsive peer(s)", report.pruned.len());
                        stats.record_pruned(report.pruned.len());
                    }
                }
            }
        }

        debug!("Heartbeat task stopped");
    })
}
