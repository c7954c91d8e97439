use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use pkg_state::leader::{ElectionConfig, ElectionEngine, ElectionHandle};
use pkg_state::medium::SharedStore;
use pkg_types::peer::{PeerStatus, ReopenResponse};

struct HostedPeer {
    handle: ElectionHandle,
    opened_at: DateTime<Utc>,
}

impl HostedPeer {
    fn status(&self, instance: &str) -> PeerStatus {
        PeerStatus {
            instance: instance.to_string(),
            peer_id: self.handle.peer_id().to_string(),
            primary: self.handle.is_primary(),
            opened_at: self.opened_at,
        }
    }
}

/// Peers running inside the host process, one per simulated tab.
#[derive(Clone)]
pub struct PeerRegistry {
    shared: SharedStore,
    config: ElectionConfig,
    peers: Arc<Mutex<HashMap<String, HostedPeer>>>,
}

impl PeerRegistry {
    pub fn new(shared: SharedStore, config: ElectionConfig) -> Self {
        Self {
            shared,
            config,
            peers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Open a new tab: attach to the medium, resolve an identity and mount.
    pub async fn open(&self) -> PeerStatus {
        let simple = Uuid::new_v4().simple().to_string();
        let instance = format!("tab-{}", &simple[..8]);
        let medium = Arc::new(self.shared.attach(instance.clone()));
        let handle = ElectionEngine::new(medium, self.config).await.start().await;

        let peer = HostedPeer {
            handle,
            opened_at: Utc::now(),
        };
        let status = peer.status(&instance);
        info!(
            "Opened {} as peer {} (primary={})",
            instance, status.peer_id, status.primary
        );
        self.peers.lock().await.insert(instance, peer);
        status
    }

    /// All hosted peers, oldest first.
    pub async fn list(&self) -> Vec<PeerStatus> {
        let peers = self.peers.lock().await;
        let mut list: Vec<PeerStatus> = peers
            .iter()
            .map(|(instance, peer)| peer.status(instance))
            .collect();
        list.sort_by(|a, b| a.opened_at.cmp(&b.opened_at));
        list
    }

    pub async fn len(&self) -> usize {
        self.peers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Close a tab gracefully. Returns `false` if no such tab exists.
    pub async fn close(&self, instance: &str) -> anyhow::Result<bool> {
        let Some(peer) = self.peers.lock().await.remove(instance) else {
            return Ok(false);
        };
        peer.handle.stop().await?;
        info!("Closed {}", instance);
        Ok(true)
    }

    /// Kill a tab without cleanup, as if its process crashed.
    pub async fn kill(&self, instance: &str) -> bool {
        let Some(peer) = self.peers.lock().await.remove(instance) else {
            return false;
        };
        peer.handle.abort();
        info!("Killed {}", instance);
        true
    }

    /// "Continue in new tab": hand this tab's identity to a fresh tab, then
    /// close the old one.
    pub async fn reopen(&self, instance: &str) -> anyhow::Result<Option<ReopenResponse>> {
        let Some(peer) = self.peers.lock().await.remove(instance) else {
            return Ok(None);
        };
        let peer_id = peer.handle.peer_id().to_string();
        peer.handle.request_handoff(&peer_id).await?;
        peer.handle.stop().await?;

        let opened = self.open().await;
        info!(
            "Reopened {} as {} (peer {})",
            instance, opened.instance, opened.peer_id
        );
        Ok(Some(ReopenResponse {
            closed: instance.to_string(),
            opened,
        }))
    }

    /// Close every tab gracefully (host shutdown).
    pub async fn close_all(&self) {
        let peers: Vec<(String, HostedPeer)> = self.peers.lock().await.drain().collect();
        for (instance, peer) in peers {
            if let Err(e) = peer.handle.stop().await {
                warn!("Failed to close {}: {}", instance, e);
            }
        }
    }
}
