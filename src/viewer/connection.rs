use super::backoff::{Backoff, ReconnectPolicy};
use super::latency::LatencyTracker;
use super::transport::{build_endpoint_url, redact_key, Connector, FrameSource, InboundMessage};
use crate::config::ViewerConfig;
use crate::error::{Result, TransportError};
use crate::telemetry::TelemetryFrame;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Connection lifecycle as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Idle,
    Connecting { url: String, attempt: u32 },
    Connected,
    Closed { reconnect_in: Duration, attempt: u32 },
    Stopped,
}

impl ConnectionStatus {
    pub fn message(&self) -> String {
        match self {
            ConnectionStatus::Idle => "Idle".to_string(),
            ConnectionStatus::Connecting { url, .. } => format!("Connecting to {} ...", url),
            ConnectionStatus::Connected => "Connected! Waiting for data from usermode".to_string(),
            ConnectionStatus::Closed { reconnect_in, .. } => format!(
                "Disconnected. Reconnecting in {}s...",
                reconnect_in.as_secs_f64().ceil() as u64
            ),
            ConnectionStatus::Stopped => "Stopped".to_string(),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Counters for decoded and discarded inbound messages.
#[derive(Debug, Default)]
struct ConnectionCounters {
    frames_decoded: AtomicU64,
    decode_failures: AtomicU64,
    connections_opened: AtomicU64,
}

/// Everything the driver task needs, shared with the manager.
struct Shared {
    connector: Arc<dyn Connector>,
    url: String,
    display_url: String,
    connect_timeout: Duration,
    policy: ReconnectPolicy,
    latency_window: usize,
    shutdown: CancellationToken,
    pending_timers: AtomicUsize,
    counters: ConnectionCounters,
    status_tx: watch::Sender<ConnectionStatus>,
    frame_tx: watch::Sender<Option<Arc<TelemetryFrame>>>,
    latency_tx: watch::Sender<Option<Duration>>,
    last_error: parking_lot::Mutex<Option<TransportError>>,
}

/// Counts a timer as pending for as long as it is alive.
struct TimerGuard<'a>(&'a AtomicUsize);

impl<'a> TimerGuard<'a> {
    fn arm(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

enum SessionEnd {
    Stopped,
    Lost(TransportError),
}

/// Keeps a connection to the relay open, decoding every inbound message
/// into a `TelemetryFrame` and reconnecting with backoff when it drops.
///
/// Status, latest frame and latency are published through `watch`
/// channels; consumers always see a whole frame, never a partial update.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    stopped: AtomicBool,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(config: &ViewerConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        let url = build_endpoint_url(&config.endpoint, &config.key)?;
        let display_url = redact_key(&url);

        let (status_tx, _) = watch::channel(ConnectionStatus::Idle);
        let (frame_tx, _) = watch::channel(None);
        let (latency_tx, _) = watch::channel(None);

        Ok(Self {
            shared: Arc::new(Shared {
                connector,
                url,
                display_url,
                connect_timeout: config.connect_timeout(),
                policy: ReconnectPolicy::from_config(config),
                latency_window: config.latency_window,
                shutdown: CancellationToken::new(),
                pending_timers: AtomicUsize::new(0),
                counters: ConnectionCounters::default(),
                status_tx,
                frame_tx,
                latency_tx,
                last_error: parking_lot::Mutex::new(None),
            }),
            stopped: AtomicBool::new(false),
            driver: Mutex::new(None),
        })
    }

    /// Begin connecting. Calling it again while running, or after `stop`,
    /// does nothing.
    pub async fn start(&self) -> Result<()> {
        let mut driver = self.driver.lock().await;

        if self.stopped.load(Ordering::SeqCst) {
            warn!("Connection manager already stopped; ignoring start");
            return Ok(());
        }
        if driver.is_some() {
            debug!("Connection manager is already running");
            return Ok(());
        }

        info!("Starting connection manager for {}", self.shared.display_url);
        let shared = Arc::clone(&self.shared);
        *driver = Some(tokio::spawn(async move {
            shared.run().await;
        }));

        Ok(())
    }

    /// Tear down: cancel every pending timer, close the open connection and
    /// wait for the driver to finish. Safe to call from any state, any
    /// number of times.
    pub async fn stop(&self) -> Result<()> {
        let mut driver = self.driver.lock().await;

        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!("Stopping connection manager");
        self.shared.shutdown.cancel();

        if let Some(task) = driver.take() {
            if let Err(e) = task.await {
                warn!("Connection driver ended abnormally: {}", e);
            }
        }

        self.shared.status_tx.send_replace(ConnectionStatus::Stopped);
        info!("Connection manager stopped");
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status_tx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status_tx.subscribe()
    }

    pub fn latest_frame(&self) -> Option<Arc<TelemetryFrame>> {
        self.shared.frame_tx.borrow().clone()
    }

    pub fn subscribe_frames(&self) -> watch::Receiver<Option<Arc<TelemetryFrame>>> {
        self.shared.frame_tx.subscribe()
    }

    /// Mean inter-arrival time of recent frames on the current connection.
    pub fn latency(&self) -> Option<Duration> {
        *self.shared.latency_tx.borrow()
    }

    pub fn subscribe_latency(&self) -> watch::Receiver<Option<Duration>> {
        self.shared.latency_tx.subscribe()
    }

    /// Why the most recent connection attempt failed or the most recent
    /// connection ended.
    pub fn last_error(&self) -> Option<TransportError> {
        self.shared.last_error.lock().clone()
    }

    /// Attempt-timeout and reconnect timers currently armed.
    pub fn scheduled_timers(&self) -> usize {
        self.shared.pending_timers.load(Ordering::SeqCst)
    }

    pub fn frames_decoded(&self) -> u64 {
        self.shared.counters.frames_decoded.load(Ordering::Relaxed)
    }

    pub fn decode_failures(&self) -> u64 {
        self.shared.counters.decode_failures.load(Ordering::Relaxed)
    }

    pub fn connections_opened(&self) -> u64 {
        self.shared.counters.connections_opened.load(Ordering::Relaxed)
    }
}

impl Shared {
    async fn run(&self) {
        let mut backoff = Backoff::new(self.policy);
        let mut latency = LatencyTracker::new(self.latency_window);

        while !self.shutdown.is_cancelled() {
            self.set_status(ConnectionStatus::Connecting {
                url: self.display_url.clone(),
                attempt: backoff.attempt(),
            });
            info!("Connecting to {} ...", self.display_url);

            let attempt = {
                let _timer = TimerGuard::arm(&self.pending_timers);
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => break,
                    result = timeout(self.connect_timeout, self.connector.connect(&self.url)) => result,
                }
            };

            match attempt {
                Ok(Ok(source)) => {
                    backoff.reset();
                    self.counters.connections_opened.fetch_add(1, Ordering::Relaxed);
                    match self.run_session(source, &mut latency).await {
                        SessionEnd::Stopped => break,
                        SessionEnd::Lost(e) => {
                            info!("Connection lost: {}", e);
                            self.record_error(e);
                        }
                    }
                }
                Ok(Err(e)) => {
                    warn!("Connection attempt failed: {}", e);
                    self.record_error(e);
                }
                Err(_) => {
                    let e = TransportError::ConnectTimeout {
                        timeout: self.connect_timeout,
                    };
                    warn!("{}", e);
                    self.record_error(e);
                }
            }

            let delay = backoff.next_delay();
            let status = ConnectionStatus::Closed {
                reconnect_in: delay,
                attempt: backoff.attempt(),
            };
            info!("{}", status.message());
            self.set_status(status);

            let _timer = TimerGuard::arm(&self.pending_timers);
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        debug!("Connection driver exiting");
    }

    async fn run_session(
        &self,
        mut source: Box<dyn FrameSource>,
        latency: &mut LatencyTracker,
    ) -> SessionEnd {
        info!("Connected to {}", self.display_url);
        self.set_status(ConnectionStatus::Connected);

        // The gap across a reconnect is not latency.
        latency.reset();
        self.latency_tx.send_if_modified(|latency| latency.take().is_some());

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    source.close().await;
                    return SessionEnd::Stopped;
                }
                message = source.next_message() => match message {
                    Ok(Some(message)) => self.handle_message(message, latency),
                    Ok(None) => {
                        return SessionEnd::Lost(TransportError::Closed {
                            reason: "closed by relay".to_string(),
                        });
                    }
                    Err(e) => return SessionEnd::Lost(e),
                },
            }
        }
    }

    fn handle_message(&self, message: InboundMessage, latency: &mut LatencyTracker) {
        match TelemetryFrame::decode(message.payload()) {
            Ok(frame) => {
                self.counters.frames_decoded.fetch_add(1, Ordering::Relaxed);
                if let Some(mean) = latency.record(Instant::now()) {
                    self.latency_tx.send_replace(Some(mean));
                }
                self.frame_tx.send_replace(Some(Arc::new(frame)));
            }
            Err(e) => {
                self.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Discarding inbound message: {}", e);
            }
        }
    }

    fn record_error(&self, error: TransportError) {
        *self.last_error.lock() = Some(error);
    }

    fn set_status(&self, status: ConnectionStatus) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.status_tx.send_replace(status);
    }
}
