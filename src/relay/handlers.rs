use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use super::registry::Outbound;
use super::server::RelayState;

/// Upper bound on the close handshake with a peer being torn down.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Default, Deserialize)]
pub struct ConnectQuery {
    key: Option<String>,
}

impl Outbound {
    fn into_message(self) -> Message {
        match self {
            Outbound::Text(text) => Message::Text(text),
            Outbound::Binary(bytes) => Message::Binary(bytes),
            Outbound::Ping => Message::Ping(Vec::new()),
        }
    }
}

/// Handler for the relay websocket endpoint
///
/// The key is checked before the upgrade, so an unauthorized peer never
/// joins the registry.
pub async fn relay_handler(
    State(state): State<RelayState>,
    Query(query): Query<ConnectQuery>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    if state.requires_key() && query.key.as_deref() != Some(&*state.key) {
        state.stats.record_auth_rejection();
        warn!("Rejected relay connection with missing or invalid key");
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    let Some(ws) = ws else {
        return (StatusCode::UPGRADE_REQUIRED, "Websocket upgrade required").into_response();
    };

    ws.on_upgrade(move |socket| handle_peer(socket, state))
}

async fn handle_peer(socket: WebSocket, state: RelayState) {
    let (peer, mut outbound) = state.registry.register();
    let id = peer.id();
    state.stats.record_connection();
    info!("Peer {} connected ({} open)", id, state.registry.len());

    let (mut sink, mut stream) = socket.split();
    let cancel = peer.cancel_token().clone();

    let writer_cancel = cancel.clone();
    let writer = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                _ = writer_cancel.cancelled() => break,
                next = outbound.recv() => match next {
                    Some(message) => message,
                    None => break,
                },
            };

            // A peer that stopped reading can stall the send indefinitely.
            tokio::select! {
                _ = writer_cancel.cancelled() => break,
                sent = sink.send(message.into_message()) => {
                    if let Err(e) = sent {
                        debug!("Send to peer {} failed: {}", id, e);
                        writer_cancel.cancel();
                        break;
                    }
                }
            }
        }

        if timeout(CLOSE_TIMEOUT, sink.close()).await.is_err() {
            debug!("Peer {} did not take the close frame, dropping the socket", id);
        }
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    peer.mark_alive();
                    state.relay(id, Outbound::Text(text));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    peer.mark_alive();
                    state.relay(id, Outbound::Binary(bytes));
                }
                Some(Ok(Message::Pong(_))) => {
                    trace!("Pong from peer {}", id);
                    peer.mark_alive();
                }
                // Answered by the websocket layer itself
                Some(Ok(Message::Ping(_))) => peer.mark_alive(),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!("Peer {} errored: {}", id, e);
                    break;
                }
            },
        }
    }

    state.registry.remove(id);
    cancel.cancel();
    let _ = writer.await;
    state.stats.record_disconnection();
    info!("Peer {} disconnected ({} open)", id, state.registry.len());
}

/// Handler for health check endpoint
pub async fn health_handler(State(state): State<RelayState>) -> impl IntoResponse {
    let stats = state.stats.snapshot();

    let health_info = serde_json::json!({
        "status": "healthy",
        "peers": state.registry.len(),
        "started_at": stats.started_at,
        "uptime_seconds": stats.uptime_seconds,
        "connections_accepted": stats.connections_accepted,
        "connections_closed": stats.connections_closed,
        "messages_received": stats.messages_received,
        "messages_relayed": stats.messages_relayed,
        "messages_coalesced": stats.messages_coalesced,
        "sends_dropped": stats.sends_dropped,
        "peers_pruned": stats.peers_pruned,
        "auth_rejections": stats.auth_rejections,
        "key_required": state.requires_key(),
    });

    (StatusCode::OK, axum::Json(health_info))
}
