use super::*;
use crate::config::{ViewerConfig, WebradarConfig};
use crate::error::TransportError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};

const FRAME: &str = r#"{"m_players": [{"m_idx": 1, "m_team": 2}], "m_local_team": 2, "m_map": "de_mirage"}"#;

enum Outcome {
    Fail,
    Hang,
    Open(MockSource),
}

struct MockSource {
    rx: mpsc::UnboundedReceiver<Option<InboundMessage>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl FrameSource for MockSource {
    async fn next_message(&mut self) -> Result<Option<InboundMessage>, TransportError> {
        Ok(self.rx.recv().await.flatten())
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Scripted connector; once the script runs out every attempt fails.
struct MockConnector {
    outcomes: Mutex<VecDeque<Outcome>>,
    attempts: Mutex<Vec<Instant>>,
}

impl MockConnector {
    fn scripted(outcomes: Vec<Outcome>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            attempts: Mutex::new(Vec::new()),
        })
    }

    fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }

    /// Milliseconds between consecutive connection attempts.
    fn gaps(&self) -> Vec<u64> {
        let attempts = self.attempts.lock();
        attempts
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).as_millis() as u64)
            .collect()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn FrameSource>, TransportError> {
        self.attempts.lock().push(Instant::now());
        let outcome = self.outcomes.lock().pop_front().unwrap_or(Outcome::Fail);

        match outcome {
            Outcome::Fail => Err(TransportError::ConnectFailed {
                endpoint: url.to_string(),
                details: "connection refused".to_string(),
            }),
            Outcome::Hang => std::future::pending().await,
            Outcome::Open(source) => Ok(Box::new(source)),
        }
    }
}

fn open_connection() -> (
    Outcome,
    mpsc::UnboundedSender<Option<InboundMessage>>,
    Arc<AtomicBool>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    let source = MockSource {
        rx,
        closed: Arc::clone(&closed),
    };
    (Outcome::Open(source), tx, closed)
}

fn viewer_config() -> ViewerConfig {
    WebradarConfig::default().viewer
}

fn text(payload: &str) -> Option<InboundMessage> {
    Some(InboundMessage::Text(payload.to_string()))
}

fn assert_gaps(actual: &[u64], expected: &[u64]) {
    assert!(actual.len() >= expected.len(), "only {:?}", actual);
    for (gap, want) in actual.iter().zip(expected) {
        assert!(
            *gap >= *want && *gap <= *want + 5,
            "gaps {:?}, expected {:?}",
            actual,
            expected
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_backoff_schedule() {
    let connector = MockConnector::scripted(Vec::new());
    let manager = ConnectionManager::new(&viewer_config(), connector.clone()).unwrap();
    manager.start().await.unwrap();

    sleep(Duration::from_millis(100)).await;
    assert_eq!(
        manager.status(),
        ConnectionStatus::Closed {
            reconnect_in: Duration::from_millis(2000),
            attempt: 1,
        }
    );
    assert_eq!(manager.status().message(), "Disconnected. Reconnecting in 2s...");

    sleep(Duration::from_secs(60)).await;
    assert_gaps(&connector.gaps(), &[2000, 4000, 8000, 15000, 15000]);

    manager.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_is_a_failed_attempt() {
    let connector = MockConnector::scripted(vec![Outcome::Hang]);
    let manager = ConnectionManager::new(&viewer_config(), connector.clone()).unwrap();
    manager.start().await.unwrap();

    sleep(Duration::from_millis(100)).await;
    assert!(matches!(manager.status(), ConnectionStatus::Connecting { attempt: 0, .. }));
    assert_eq!(
        manager.status().message(),
        "Connecting to ws://localhost:22006/cs2_webradar ..."
    );

    sleep(Duration::from_secs(8)).await;
    // 5s attempt timeout, then the first 2s backoff.
    assert_gaps(&connector.gaps(), &[7000]);

    manager.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_successful_open_resets_backoff() {
    let (open, tx, _closed) = open_connection();
    // Peer closes straight away.
    tx.send(None).unwrap();
    let connector = MockConnector::scripted(vec![Outcome::Fail, Outcome::Fail, open]);
    let manager = ConnectionManager::new(&viewer_config(), connector.clone()).unwrap();
    manager.start().await.unwrap();

    sleep(Duration::from_secs(20)).await;
    assert_gaps(&connector.gaps(), &[2000, 4000, 2000, 4000]);
    assert_eq!(manager.connections_opened(), 1);

    manager.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_malformed_message_keeps_connection_open() {
    let (open, tx, closed) = open_connection();
    let connector = MockConnector::scripted(vec![open]);
    let manager = ConnectionManager::new(&viewer_config(), connector.clone()).unwrap();
    let mut frames = manager.subscribe_frames();
    manager.start().await.unwrap();

    tx.send(text("{not json")).unwrap();
    tx.send(text(r#"{"m_players": [{"m_idx": 1}, {"m_idx": 1}]}"#)).unwrap();
    tx.send(text(FRAME)).unwrap();

    timeout(Duration::from_secs(1), frames.changed())
        .await
        .unwrap()
        .unwrap();

    let frame = manager.latest_frame().unwrap();
    assert_eq!(frame.map, "de_mirage");
    assert_eq!(frame.players.len(), 1);
    assert_eq!(manager.decode_failures(), 2);
    assert_eq!(manager.frames_decoded(), 1);
    assert!(manager.status().is_connected());
    assert_eq!(
        manager.status().message(),
        "Connected! Waiting for data from usermode"
    );
    assert_eq!(connector.attempt_count(), 1);

    manager.stop().await.unwrap();
    assert!(closed.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_binary_frames_are_decoded() {
    let (open, tx, _closed) = open_connection();
    let connector = MockConnector::scripted(vec![open]);
    let manager = ConnectionManager::new(&viewer_config(), connector).unwrap();
    let mut frames = manager.subscribe_frames();
    manager.start().await.unwrap();

    tx.send(Some(InboundMessage::Binary(FRAME.as_bytes().to_vec())))
        .unwrap();
    timeout(Duration::from_secs(1), frames.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(manager.latest_frame().unwrap().players[0].id, 1);

    manager.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_latency_tracks_inter_arrival_time() {
    let (open, tx, _closed) = open_connection();
    let connector = MockConnector::scripted(vec![open]);
    let manager = ConnectionManager::new(&viewer_config(), connector).unwrap();
    let mut latency = manager.subscribe_latency();
    manager.start().await.unwrap();

    tx.send(text(FRAME)).unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(manager.latency(), None);
    latency.borrow_and_update();

    tx.send(text(FRAME)).unwrap();
    timeout(Duration::from_secs(1), latency.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(manager.latency(), Some(Duration::from_millis(100)));

    manager.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_latency_restarts_after_reconnect() {
    let (first, first_tx, _) = open_connection();
    let (second, second_tx, _) = open_connection();
    let connector = MockConnector::scripted(vec![first, second]);
    let manager = ConnectionManager::new(&viewer_config(), connector.clone()).unwrap();
    let mut latency = manager.subscribe_latency();
    manager.start().await.unwrap();

    first_tx.send(text(FRAME)).unwrap();
    sleep(Duration::from_millis(100)).await;
    first_tx.send(text(FRAME)).unwrap();
    timeout(Duration::from_secs(1), latency.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(manager.latency(), Some(Duration::from_millis(100)));

    // Relay drops us; the second connection opens after the 2s backoff.
    first_tx.send(None).unwrap();
    sleep(Duration::from_millis(2100)).await;
    assert_eq!(connector.attempt_count(), 2);
    assert!(manager.status().is_connected());
    assert_eq!(manager.latency(), None);

    second_tx.send(text(FRAME)).unwrap();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(manager.latency(), None);

    latency.borrow_and_update();
    sleep(Duration::from_millis(40)).await;
    second_tx.send(text(FRAME)).unwrap();
    timeout(Duration::from_secs(1), latency.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(manager.latency(), Some(Duration::from_millis(50)));

    manager.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_last_error_records_why_the_connection_ended() {
    let (open, tx, _closed) = open_connection();
    let connector = MockConnector::scripted(vec![open]);
    let manager = ConnectionManager::new(&viewer_config(), connector).unwrap();
    manager.start().await.unwrap();

    sleep(Duration::from_millis(10)).await;
    assert!(manager.status().is_connected());
    assert!(manager.last_error().is_none());

    tx.send(None).unwrap();
    sleep(Duration::from_millis(10)).await;
    assert!(matches!(
        manager.last_error(),
        Some(TransportError::Closed { .. })
    ));

    // The scripted connector refuses every later attempt.
    sleep(Duration::from_millis(2100)).await;
    assert!(matches!(
        manager.last_error(),
        Some(TransportError::ConnectFailed { .. })
    ));

    manager.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_waiting_to_reconnect() {
    let connector = MockConnector::scripted(Vec::new());
    let manager = ConnectionManager::new(&viewer_config(), connector.clone()).unwrap();
    manager.start().await.unwrap();

    sleep(Duration::from_millis(100)).await;
    assert_eq!(manager.scheduled_timers(), 1);

    manager.stop().await.unwrap();
    assert_eq!(manager.scheduled_timers(), 0);
    assert_eq!(manager.status(), ConnectionStatus::Stopped);

    let attempts = connector.attempt_count();
    sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.attempt_count(), attempts);
}

#[tokio::test(start_paused = true)]
async fn test_stop_mid_connect() {
    let connector = MockConnector::scripted(vec![Outcome::Hang]);
    let manager = ConnectionManager::new(&viewer_config(), connector.clone()).unwrap();
    manager.start().await.unwrap();

    sleep(Duration::from_millis(100)).await;
    assert_eq!(manager.scheduled_timers(), 1);

    manager.stop().await.unwrap();
    assert_eq!(manager.scheduled_timers(), 0);

    sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.attempt_count(), 1);
    assert_eq!(manager.status(), ConnectionStatus::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_connected() {
    let (open, _tx, closed) = open_connection();
    let connector = MockConnector::scripted(vec![open]);
    let manager = ConnectionManager::new(&viewer_config(), connector.clone()).unwrap();
    manager.start().await.unwrap();

    sleep(Duration::from_millis(100)).await;
    assert!(manager.status().is_connected());
    assert_eq!(manager.scheduled_timers(), 0);

    manager.stop().await.unwrap();
    assert!(closed.load(Ordering::SeqCst));
    assert_eq!(manager.scheduled_timers(), 0);

    sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_and_stop_are_idempotent() {
    let connector = MockConnector::scripted(Vec::new());
    let manager = ConnectionManager::new(&viewer_config(), connector.clone()).unwrap();

    // Stop before start is fine and final.
    manager.stop().await.unwrap();
    manager.stop().await.unwrap();
    manager.start().await.unwrap();
    sleep(Duration::from_secs(10)).await;
    assert_eq!(connector.attempt_count(), 0);
    assert!(manager.is_stopped());

    let connector = MockConnector::scripted(Vec::new());
    let manager = ConnectionManager::new(&viewer_config(), connector.clone()).unwrap();
    manager.start().await.unwrap();
    manager.start().await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(connector.attempt_count(), 1);

    manager.stop().await.unwrap();
    manager.stop().await.unwrap();
    assert_eq!(manager.scheduled_timers(), 0);
}

#[test]
fn test_invalid_endpoint_is_rejected() {
    let config = ViewerConfig {
        endpoint: "localhost:22006".to_string(),
        ..viewer_config()
    };
    let result = ConnectionManager::new(&config, MockConnector::scripted(Vec::new()));
    assert!(result.is_err());
}

#[test]
fn test_status_messages() {
    let status = ConnectionStatus::Closed {
        reconnect_in: Duration::from_millis(15000),
        attempt: 4,
    };
    assert_eq!(status.to_string(), "Disconnected. Reconnecting in 15s...");
    assert_eq!(ConnectionStatus::Stopped.message(), "Stopped");
    assert!(!ConnectionStatus::Idle.is_connected());
}
