mod backoff;
mod connection;
mod latency;
mod transport;
#[cfg(test)]
mod tests;

pub use backoff::{Backoff, ReconnectPolicy};
pub use connection::{ConnectionManager, ConnectionStatus};
pub use latency::LatencyTracker;
pub use transport::{
    build_endpoint_url, redact_key, Connector, FrameSource, InboundMessage, WsConnector,
};
