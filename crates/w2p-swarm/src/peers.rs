//! Registry of known peers

use tokio::sync::RwLock;
use w2p_core::{Endpoint, PeerSet};

/// The set of peers a node gossips with
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: RwLock<PeerSet>,
}

impl PeerRegistry {
    pub fn new(initial: PeerSet) -> Self {
        Self {
            peers: RwLock::new(initial),
        }
    }

    /// Add a peer, returning false if it was already known
    pub async fn add(&self, peer: Endpoint) -> bool {
        self.peers.write().await.add(peer)
    }

    /// Remove a peer, returning false if it was not known
    pub async fn remove(&self, peer: &Endpoint) -> bool {
        self.peers.write().await.remove(peer)
    }

    pub async fn contains(&self, peer: &Endpoint) -> bool {
        self.peers.read().await.contains(peer)
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Copy of the current peers
    pub async fn snapshot(&self) -> Vec<Endpoint> {
        self.peers.read().await.to_vec()
    }
}
