mod coalesce;
mod handlers;
mod heartbeat;
mod registry;
mod server;
mod stats;

pub use coalesce::RateGate;
pub use heartbeat::{spawn_heartbeat, sweep, SweepReport};
pub use registry::{BroadcastOutcome, Outbound, PeerHandle, PeerId, PeerRegistry};
pub use server::{RelayServer, RelayServerBuilder};
pub use stats::{RelayStats, RelayStatsSnapshot};
