use crate::error::TransportError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

/// One data message from the relay, framing preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl InboundMessage {
    pub fn payload(&self) -> &[u8] {
        match self {
            InboundMessage::Text(text) => text.as_bytes(),
            InboundMessage::Binary(bytes) => bytes,
        }
    }
}

/// An open duplex connection, read side.
#[async_trait]
pub trait FrameSource: Send {
    /// Next data message. `Ok(None)` means the peer closed cleanly.
    async fn next_message(&mut self) -> Result<Option<InboundMessage>, TransportError>;

    /// Close the connection; errors are ignored.
    async fn close(&mut self);
}

/// Opens connections to the relay.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Box<dyn FrameSource>, TransportError>;
}

/// Build the connect URL, appending the shared secret as a `key` query
/// parameter when one is configured.
pub fn build_endpoint_url(endpoint: &str, key: &str) -> Result<String, TransportError> {
    let mut url = Url::parse(endpoint).map_err(|e| TransportError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        details: e.to_string(),
    })?;

    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(TransportError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            details: format!("unsupported scheme '{}'", url.scheme()),
        });
    }

    if !key.is_empty() {
        url.query_pairs_mut().append_pair("key", key);
    }

    Ok(url.into())
}

/// `Connector` backed by tokio-tungstenite.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn FrameSource>, TransportError> {
        match tokio_tungstenite::connect_async(url).await {
            Ok((stream, response)) => {
                debug!("Websocket handshake completed with status {}", response.status());
                Ok(Box::new(WsSource { stream }))
            }
            Err(tungstenite::Error::Http(response)) => Err(TransportError::Rejected {
                status: response.status().as_u16(),
            }),
            Err(e) => Err(TransportError::ConnectFailed {
                endpoint: redact_key(url),
                details: e.to_string(),
            }),
        }
    }
}

struct WsSource {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next_message(&mut self) -> Result<Option<InboundMessage>, TransportError> {
        loop {
            let Some(message) = self.stream.next().await else {
                return Ok(None);
            };

            match message {
                Ok(Message::Text(text)) => return Ok(Some(InboundMessage::Text(text))),
                Ok(Message::Binary(bytes)) => return Ok(Some(InboundMessage::Binary(bytes))),
                Ok(Message::Close(frame)) => {
                    debug!("Relay closed the connection: {:?}", frame);
                    return Ok(None);
                }
                // Pongs to relay pings are queued by tungstenite itself
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {
                    trace!("Control frame received");
                }
                Err(tungstenite::Error::ConnectionClosed) => return Ok(None),
                Err(e) => {
                    return Err(TransportError::Io {
                        details: e.to_string(),
                    })
                }
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
        let _ = self.stream.flush().await;
    }
}

/// URL suitable for logs and status lines: the `key` parameter is masked.
pub fn redact_key(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };

    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| {
            let value = if k == "key" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), value)
        })
        .collect();

    if pairs.is_empty() {
        return parsed.into();
    }

    parsed.query_pairs_mut().clear().extend_pairs(pairs);
    parsed.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_endpoint_url() {
        assert_eq!(
            build_endpoint_url("ws://localhost:22006/cs2_webradar", "").unwrap(),
            "ws://localhost:22006/cs2_webradar"
        );
        assert_eq!(
            build_endpoint_url("ws://localhost:22006/cs2_webradar", "s3cr3t").unwrap(),
            "ws://localhost:22006/cs2_webradar?key=s3cr3t"
        );
    }

    #[test]
    fn test_key_is_percent_encoded() {
        let url = build_endpoint_url("ws://10.0.0.2:22006/cs2_webradar", "a b&c=d").unwrap();
        assert_eq!(url, "ws://10.0.0.2:22006/cs2_webradar?key=a+b%26c%3Dd");

        let parsed = Url::parse(&url).unwrap();
        let key = parsed.query_pairs().find(|(k, _)| k == "key").unwrap().1;
        assert_eq!(key, "a b&c=d");
    }

    #[test]
    fn test_invalid_endpoints() {
        assert!(matches!(
            build_endpoint_url("not a url", ""),
            Err(TransportError::InvalidEndpoint { .. })
        ));
        assert!(matches!(
            build_endpoint_url("http://localhost:22006/cs2_webradar", ""),
            Err(TransportError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn test_redact_key() {
        assert_eq!(
            redact_key("ws://localhost:22006/cs2_webradar?key=s3cr3t"),
            "ws://localhost:22006/cs2_webradar?key=***"
        );
        assert_eq!(
            redact_key("ws://localhost:22006/cs2_webradar"),
            "ws://localhost:22006/cs2_webradar"
        );
    }

    #[test]
    fn test_inbound_payload() {
        assert_eq!(InboundMessage::Text("{}".into()).payload(), b"{}");
        assert_eq!(InboundMessage::Binary(vec![1, 2]).payload(), &[1, 2]);
    }
}
