use crate::{
    config::RelayConfig,
    error::{RelayError, Result, WebradarError},
};
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::coalesce::RateGate;
use super::handlers::{health_handler, relay_handler};
use super::heartbeat::spawn_heartbeat;
use super::registry::{Outbound, PeerId, PeerRegistry};
use super::stats::RelayStats;

/// Shared state for the Axum server
#[derive(Clone)]
pub struct RelayState {
    pub(crate) registry: Arc<PeerRegistry>,
    pub(crate) stats: Arc<RelayStats>,
    pub(crate) gate: Arc<RateGate>,
    pub(crate) key: Arc<str>,
    pub(crate) echo_to_sender: bool,
}

impl RelayState {
    pub(crate) fn requires_key(&self) -> bool {
        !self.key.is_empty()
    }

    /// Fan one inbound message out to the other peers.
    pub(crate) fn relay(&self, from: PeerId, message: Outbound) {
        self.stats.record_received();

        if !self.gate.admit(tokio::time::Instant::now()) {
            self.stats.record_coalesced();
            return;
        }

        let outcome = self
            .registry
            .broadcast(Some(from), &message, self.echo_to_sender);
        self.stats.record_broadcast(outcome.delivered, outcome.dropped);
    }
}

/// Websocket broadcast relay: every message a peer sends is forwarded
/// unchanged to the other connected peers.
pub struct RelayServer {
    pub(crate) config: RelayConfig,
    state: RelayState,
    shutdown: CancellationToken,
}

impl RelayServer {
    /// Create a new relay server
    pub fn new(config: RelayConfig, shutdown: CancellationToken) -> Self {
        let state = RelayState {
            registry: Arc::new(PeerRegistry::new(config.peer_queue_capacity)),
            stats: Arc::new(RelayStats::new()),
            gate: Arc::new(RateGate::new(config.coalesce_interval())),
            key: Arc::from(config.key.as_str()),
            echo_to_sender: config.echo_to_sender,
        };

        Self {
            config,
            state,
            shutdown,
        }
    }

    pub fn registry(&self) -> Arc<PeerRegistry> {
        Arc::clone(&self.state.registry)
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.state.stats)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.config.path, get(relay_handler))
            .route("/health", get(health_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.bind_address();

        TcpListener::bind(&addr).await.map_err(|e| {
            WebradarError::Relay(RelayError::BindFailed {
                address: addr.clone(),
                source: e,
            })
        })
    }

    /// Bind and serve until the shutdown token fires
    pub async fn start(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until the shutdown token fires
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener
            .local_addr()
            .map_err(|e| RelayError::StartupFailed {
                details: format!("Listener has no local address: {}", e),
            })?;

        info!(
            "Relay listening on ws://{}{} (key {})",
            local_addr,
            self.config.path,
            if self.state.requires_key() {
                "required"
            } else {
                "not required"
            }
        );

        let heartbeat = spawn_heartbeat(
            self.registry(),
            self.stats(),
            self.config.heartbeat_interval(),
            self.shutdown.clone(),
        );

        let registry = self.registry();
        let shutdown = self.shutdown.clone();
        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                let closed = registry.close_all();
                info!("Relay shutting down, closing {} peer(s)", closed);
            })
            .await
            .map_err(|e| RelayError::Server {
                details: format!("Server error: {}", e),
            });

        self.shutdown.cancel();
        let _ = heartbeat.await;

        result?;
        info!("Relay stopped");
        Ok(())
    }
}

/// Relay server builder for configuration
pub struct RelayServerBuilder {
    config: Option<RelayConfig>,
    shutdown: Option<CancellationToken>,
}

impl RelayServerBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            shutdown: None,
        }
    }

    /// Set the relay configuration
    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Token that stops the server when cancelled
    pub fn shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    pub fn build(self) -> Result<RelayServer> {
        let config = self.config.ok_or_else(|| {
            WebradarError::Relay(RelayError::StartupFailed {
                details: "Relay configuration is required".to_string(),
            })
        })?;

        if !config.path.starts_with('/') {
            return Err(WebradarError::Relay(RelayError::StartupFailed {
                details: format!("Relay path must start with '/' (got '{}')", config.path),
            }));
        }

        Ok(RelayServer::new(config, self.shutdown.unwrap_or_default()))
    }
}

impl Default for RelayServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
