use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

pub type PeerId = Uuid;

/// Message queued for delivery to one peer. Data keeps its original framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Binary(Vec<u8>),
    Ping,
}

/// Registry entry for one open peer connection.
#[derive(Debug)]
pub struct PeerHandle {
    id: PeerId,
    sender: mpsc::Sender<Outbound>,
    alive: AtomicBool,
    cancel: CancellationToken,
    connected_at: DateTime<Utc>,
}

impl PeerHandle {
    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Cancelled when the peer must be torn down.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Read and clear the liveness flag.
    pub(crate) fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    pub(crate) fn try_send(&self, message: Outbound) -> Result<(), TrySendError<Outbound>> {
        self.sender.try_send(message)
    }
}

/// Result of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    pub dropped: usize,
}

/// Currently open peers of one relay instance.
///
/// Fan-out works on a snapshot taken under the read lock, so peers may be
/// added or removed while a broadcast or a heartbeat sweep is running.
#[derive(Debug)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<PeerId, Arc<PeerHandle>>>,
    queue_capacity: usize,
}

impl PeerRegistry {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Add a peer; the receiver feeds that peer's writer task.
    pub fn register(&self) -> (Arc<PeerHandle>, mpsc::Receiver<Outbound>) {
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        let handle = Arc::new(PeerHandle {
            id: Uuid::new_v4(),
            sender,
            alive: AtomicBool::new(true),
            cancel: CancellationToken::new(),
            connected_at: Utc::now(),
        });

        self.peers.write().insert(handle.id, Arc::clone(&handle));
        debug!("Registered peer {}", handle.id);
        (handle, receiver)
    }

    pub fn remove(&self, id: PeerId) -> Option<Arc<PeerHandle>> {
        let removed = self.peers.write().remove(&id);
        if removed.is_some() {
            debug!("Removed peer {}", id);
        }
        removed
    }

    /// Remove a peer and tell its tasks to stop.
    pub fn terminate(&self, id: PeerId) -> bool {
        match self.remove(id) {
            Some(peer) => {
                peer.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Terminate every peer; used on shutdown.
    pub fn close_all(&self) -> usize {
        let peers: Vec<Arc<PeerHandle>> = self.peers.write().drain().map(|(_, p)| p).collect();
        for peer in &peers {
            peer.cancel.cancel();
        }
        peers.len()
    }

    pub fn get(&self, id: PeerId) -> Option<Arc<PeerHandle>> {
        self.peers.read().get(&id).cloned()
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.peers.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    pub fn snapshot(&self) -> Vec<Arc<PeerHandle>> {
        self.peers.read().values().cloned().collect()
    }

    /// Queue `message` for every registered peer except `from`, unless
    /// `echo` is set. Never waits: a peer whose queue is full or closed
    /// simply misses this message.
    pub fn broadcast(&self, from: Option<PeerId>, message: &Outbound, echo: bool) -> BroadcastOutcome {
        let mut outcome = BroadcastOutcome::default();

        for peer in self.snapshot() {
            if !echo && Some(peer.id) == from {
                continue;
            }

            match peer.try_send(message.clone()) {
                Ok(()) => outcome.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    trace!("Queue full for peer {}, dropping message", peer.id);
                    outcome.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    trace!("Peer {} is closing, dropping message", peer.id);
                    outcome.dropped += 1;
                }
            }
        }

        outcome
    }
}
