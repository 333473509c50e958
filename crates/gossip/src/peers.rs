use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use toolforge_core::PeerRecord;
use tracing::{debug, info};

/// Known peer instances. Entries are refreshed on any contact and dropped
/// once a peer stays silent past the configured window.
pub struct PeerBook {
    peers: RwLock<HashMap<String, PeerRecord>>,
}

impl PeerBook {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn add(&self, peer_id: &str, address: &str) {
        let mut peers = self.peers.write().await;
        peers.insert(
            peer_id.to_string(),
            PeerRecord {
                peer_id: peer_id.to_string(),
                address: address.to_string(),
                last_seen_at: chrono::Utc::now().timestamp(),
            },
        );
        debug!("Peer added: {} ({})", peer_id, address);
    }

    /// Record contact from a peer. Unknown peers get an entry without an
    /// address; known ones get their last-seen refreshed.
    pub async fn observe(&self, peer_id: &str) {
        let mut peers = self.peers.write().await;
        let now = chrono::Utc::now().timestamp();
        peers
            .entry(peer_id.to_string())
            .and_modify(|p| p.last_seen_at = now)
            .or_insert_with(|| PeerRecord {
                peer_id: peer_id.to_string(),
                address: String::new(),
                last_seen_at: now,
            });
    }

    /// Addresses we can push announcements to.
    pub async fn addresses(&self) -> Vec<String> {
        self.peers
            .read()
            .await
            .values()
            .filter(|p| !p.address.is_empty())
            .map(|p| p.address.clone())
            .collect()
    }

    pub async fn list(&self) -> Vec<PeerRecord> {
        let mut peers: Vec<PeerRecord> = self.peers.read().await.values().cloned().collect();
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        peers
    }

    pub async fn evict_stale(&self, silence_window: Duration) {
        let cutoff = chrono::Utc::now().timestamp() - silence_window.as_secs() as i64;
        let mut peers = self.peers.write().await;
        let before = peers.len();
        peers.retain(|_, p| p.last_seen_at >= cutoff);
        let evicted = before - peers.len();
        if evicted > 0 {
            info!("Evicted {} silent peer(s)", evicted);
        }
    }
}

impl Default for PeerBook {
    fn default() -> Self {
        Self::new()
    }
}
