//! Registry of live peers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Identifier of one client connection.
pub type PeerId = String;

#[derive(Debug)]
struct PeerEntry {
    cancel: CancellationToken,
    detached: bool,
}

/// Shared map of peer ids to their shutdown handles.
///
/// Each entry is inserted and removed by its own peer task; the server only
/// reads it for health reporting and cancels every entry on shutdown.
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<Mutex<HashMap<PeerId, PeerEntry>>>,
}

/// Point-in-time peer counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PeerCounts {
    /// Peers with a live connection.
    pub connected: usize,
    /// Peers finishing a turn after their connection closed.
    pub detached: usize,
}

impl PeerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new peer.
    pub async fn register(&self, id: &str, cancel: CancellationToken) {
        self.peers.lock().await.insert(
            id.to_owned(),
            PeerEntry {
                cancel,
                detached: false,
            },
        );
    }

    /// Flag a peer as detached.
    pub async fn mark_detached(&self, id: &str) {
        if let Some(entry) = self.peers.lock().await.get_mut(id) {
            entry.detached = true;
        }
    }

    /// Forget a peer.
    pub async fn remove(&self, id: &str) {
        self.peers.lock().await.remove(id);
    }

    /// Whether `id` is registered and detached; `None` when unknown.
    pub async fn is_detached(&self, id: &str) -> Option<bool> {
        self.peers.lock().await.get(id).map(|entry| entry.detached)
    }

    /// Count connected and detached peers.
    pub async fn counts(&self) -> PeerCounts {
        let peers = self.peers.lock().await;
        let detached = peers.values().filter(|entry| entry.detached).count();
        PeerCounts {
            connected: peers.len() - detached,
            detached,
        }
    }

    /// Cancel every peer; each destroys its agent and deregisters itself.
    pub async fn shutdown_all(&self) {
        for entry in self.peers.lock().await.values() {
            entry.cancel.cancel();
        }
    }
}
