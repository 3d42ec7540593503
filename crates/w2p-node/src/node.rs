//! The node: listen loop, gossip and peer maintenance
//!
//! A node owns one long-lived UDP socket. A single listener task reads it,
//! learns routes from every datagram, relays traffic meant for other nodes
//! and hands the rest to spawned handlers. Two background loops push the
//! website directory to every peer and re-attempt unfinished downloads.

use crate::config::{DataLayout, NodeConfig};
use crate::downloader::{self, RetrievalOutcome};
use crate::heartbeat::Liveness;
use crate::seeder;
use crate::storage::MetadataStore;
use anyhow::{bail, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use w2p_core::{transport, Directory, Endpoint, Error, Message, PeerSet, Payload};
use w2p_swarm::{MergeReport, PeerRegistry, RoutingTable, WebsiteMap};

pub struct Node {
    config: NodeConfig,
    addr: Endpoint,
    socket: UdpSocket,
    layout: DataLayout,
    store: MetadataStore,
    peers: PeerRegistry,
    websites: WebsiteMap,
    routes: RoutingTable,
    liveness: Liveness,
    /// Websites with a retrieval running
    in_flight: Mutex<HashSet<String>>,
    /// Websites waiting for another retrieval attempt
    pending: Mutex<HashSet<String>>,
}

impl Node {
    /// Bind the listen socket and prepare the data directory
    pub async fn bind(config: NodeConfig) -> Result<Arc<Self>> {
        let requested: Endpoint = config.addr.parse()?;
        if requested.ip().is_unspecified() {
            bail!("Node address must be a concrete IP, got {}", requested);
        }

        let layout = config.layout();
        layout.create_dirs()?;

        let socket = UdpSocket::bind(requested.addr()).await?;
        let addr = Endpoint::new(socket.local_addr()?);

        let mut initial = PeerSet::parse(&config.peers)?;
        initial.remove(&addr);

        tracing::info!("Node {} listening on {}", config.name, addr);

        Ok(Arc::new(Self {
            store: MetadataStore::new(layout.clone()),
            liveness: Liveness::new(&config.liveness),
            peers: PeerRegistry::new(initial),
            websites: WebsiteMap::new(),
            routes: RoutingTable::new(),
            in_flight: Mutex::new(HashSet::new()),
            pending: Mutex::new(HashSet::new()),
            config,
            addr,
            socket,
            layout,
        }))
    }

    pub fn addr(&self) -> Endpoint {
        self.addr
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    pub fn websites(&self) -> &WebsiteMap {
        &self.websites
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    /// Load stored metadata and start the background tasks
    pub async fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        self.sync_store().await;

        vec![
            tokio::spawn(self.clone().listen()),
            tokio::spawn(self.clone().anti_entropy()),
            tokio::spawn(self.clone().retry_loop()),
        ]
    }

    /// Send a message toward its destination through the routing table
    pub async fn send(&self, message: &Message) -> w2p_core::Result<()> {
        let next_hop = self.routes.next_hop(&message.destination).await;
        transport::send_message(&self.socket, message, &next_hop).await
    }

    async fn listen(self: Arc<Self>) {
        let mut buf = vec![0u8; self.config.gossip.listen_buffer_size];
        loop {
            let (len, from) = match transport::receive(&self.socket, &mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    tracing::warn!("Receive failed: {}", e);
                    continue;
                }
            };

            let message = match Message::decode(&buf[..len]) {
                Ok(message) => message,
                Err(e) => {
                    tracing::debug!("Dropping malformed datagram from {}: {}", from, e);
                    continue;
                }
            };

            let sender = Endpoint::new(from);
            self.routes.observe(&message.origin, &sender).await;

            if message.destination != self.addr {
                self.forward(message).await;
                continue;
            }

            self.dispatch(message).await;
        }
    }

    async fn forward(&self, message: Message) {
        let Some(relayed) = message.forwarded() else {
            tracing::debug!(
                "Dropping {} from {} to {}: hop limit reached",
                message.kind(),
                message.origin,
                message.destination
            );
            return;
        };
        tracing::debug!("Relaying {} to {}", relayed.kind(), relayed.destination);
        if let Err(e) = self.send(&relayed).await {
            tracing::warn!("Failed to relay to {}: {}", relayed.destination, e);
        }
    }

    async fn dispatch(self: &Arc<Self>, message: Message) {
        match message.payload {
            Payload::Heartbeat => {
                let echo = Message::heartbeat(self.addr, message.origin);
                if let Err(e) = self.send(&echo).await {
                    tracing::debug!("Failed to answer heartbeat from {}: {}", message.origin, e);
                }
            }
            Payload::Metadata(snapshot) => {
                let node = self.clone();
                let origin = message.origin;
                tokio::spawn(async move {
                    node.receive_metadata(origin, snapshot).await;
                });
            }
            Payload::DataRequest(_) => {
                let node = self.clone();
                tokio::spawn(async move {
                    seeder::send_piece(&node, &message).await;
                });
            }
            Payload::DataReply(reply) => {
                tracing::debug!(
                    "Ignoring unsolicited chunk {} of {} from {}",
                    reply.chunk_id,
                    reply.website,
                    message.origin
                );
            }
        }
    }

    async fn receive_metadata(self: &Arc<Self>, origin: Endpoint, snapshot: Directory) {
        tracing::debug!("Metadata from {} ({} websites)", origin, snapshot.len());
        self.merge(&snapshot).await;
        self.check_peer(origin).await;
    }

    /// Merge a directory snapshot and act on what changed
    pub async fn merge(self: &Arc<Self>, snapshot: &Directory) {
        match self.websites.merge(snapshot).await {
            Ok(report) => self.handle_report(report).await,
            Err(Error::KeyMismatch { name }) => {
                tracing::error!("Rejecting snapshot: owner key of {} does not match", name);
            }
            Err(e) => tracing::error!("Merge failed: {}", e),
        }
    }

    async fn handle_report(self: &Arc<Self>, report: MergeReport) {
        for peer in report.discovered {
            if peer == self.addr || self.peers.contains(&peer).await {
                continue;
            }
            let node = self.clone();
            tokio::spawn(async move {
                node.check_peer(peer).await;
            });
        }
        for name in report.fetch {
            self.spawn_retrieval(name);
        }
    }

    /// Fold stored metadata into the directory
    pub async fn sync_store(self: &Arc<Self>) {
        let stored = match self.store.load_all() {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!("Failed to load stored metadata: {}", e);
                return;
            }
        };
        let snapshot: Directory = stored.into_iter().map(|w| (w.name.clone(), w)).collect();
        if !snapshot.is_empty() {
            self.merge(&snapshot).await;
        }
    }

    /// Probe a peer and update every component with the result
    ///
    /// `None` when no probe was sent: the peer is this node, or another check
    /// of the same peer is already running.
    pub async fn check_peer(&self, peer: Endpoint) -> Option<bool> {
        if peer == self.addr || !self.liveness.begin(peer).await {
            return None;
        }

        let next_hop = self.routes.next_hop(&peer).await;
        let alive = self.liveness.probe(self.addr.ip(), &peer, &next_hop).await;
        if alive {
            if self.peers.add(peer).await {
                tracing::info!("Discovered peer {}", peer);
            }
            self.routes.set_direct(&peer).await;
        } else {
            self.evict(&peer).await;
        }

        self.liveness.finish(&peer).await;
        Some(alive)
    }

    async fn evict(&self, peer: &Endpoint) {
        let known = self.peers.remove(peer).await;
        let seeding = self.websites.remove_peer(peer).await;
        self.routes.forget(peer).await;
        if known || seeding > 0 {
            tracing::warn!("Peer {} unreachable, removed from {} seeder lists", peer, seeding);
        }
    }

    /// Push the directory to every known peer and re-check each of them
    pub async fn push_metadata(self: &Arc<Self>) {
        let peers = self.peers.snapshot().await;
        if peers.is_empty() {
            return;
        }

        let snapshot = self.websites.snapshot().await;
        for peer in peers {
            for message in Message::metadata_batches(self.addr, peer, &snapshot) {
                if let Err(e) = self.send(&message).await {
                    tracing::warn!("Failed to send metadata to {}: {}", peer, e);
                }
            }
            let node = self.clone();
            tokio::spawn(async move {
                node.check_peer(peer).await;
            });
        }
    }

    async fn anti_entropy(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.gossip.anti_entropy_interval());
        loop {
            ticker.tick().await;
            self.sync_store().await;
            self.push_metadata().await;
        }
    }

    async fn retry_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.transfer.retry_interval());
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let names: Vec<String> = self.pending.lock().await.drain().collect();
            for name in names {
                tracing::debug!("Retrying retrieval of {}", name);
                self.spawn_retrieval(name);
            }
        }
    }

    fn spawn_retrieval(self: &Arc<Self>, name: String) {
        let node = self.clone();
        tokio::spawn(async move {
            node.retrieve(&name).await;
        });
    }

    /// Run one retrieval of a website, queueing it for retry if it does not complete
    ///
    /// `None` if a retrieval of the same website is already running.
    pub async fn retrieve(self: &Arc<Self>, name: &str) -> Option<RetrievalOutcome> {
        if !self.in_flight.lock().await.insert(name.to_string()) {
            tracing::debug!("Retrieval of {} already running", name);
            self.pending.lock().await.insert(name.to_string());
            return None;
        }

        let result = downloader::retrieve_website(self, name).await;
        self.in_flight.lock().await.remove(name);

        let retry = match &result {
            Ok(RetrievalOutcome::Complete) => false,
            Ok(RetrievalOutcome::Rejected) => {
                tracing::warn!("Discarded {}: signature verification failed", name);
                false
            }
            Ok(RetrievalOutcome::Incomplete { missing }) => {
                tracing::warn!("Retrieval of {} incomplete, {} chunks missing", name, missing.len());
                true
            }
            Ok(RetrievalOutcome::Superseded) => {
                tracing::info!("Retrieval of {} superseded by a newer version", name);
                true
            }
            Err(e) => {
                tracing::error!("Retrieval of {} failed: {}", name, e);
                true
            }
        };

        let mut pending = self.pending.lock().await;
        if retry {
            pending.insert(name.to_string());
        } else {
            pending.remove(name);
        }
        result.ok()
    }

    pub async fn pending(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pending.lock().await.iter().cloned().collect();
        names.sort();
        names
    }
}

/// Run a node until Ctrl+C
pub async fn run(config: NodeConfig) -> Result<()> {
    let node = Node::bind(config).await?;
    let tasks = node.start().await;

    println!("Node {} running on {}. Press Ctrl+C to stop.", node.config().name, node.addr());
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    for task in tasks {
        task.abort();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use w2p_core::Website;

    fn test_config(dir: &TempDir) -> NodeConfig {
        let mut config = NodeConfig::default();
        config.addr = "127.0.0.1:0".to_string();
        config.data_dir = dir.path().to_string_lossy().into_owned();
        config.liveness.heartbeat_timeout_ms = 200;
        config
    }

    #[tokio::test]
    async fn test_bind_resolves_port_and_drops_self() {
        let temp = TempDir::new().unwrap();
        let node = Node::bind(test_config(&temp)).await.unwrap();
        assert_ne!(node.addr().port(), 0);
        assert!(temp.path().join("metadata").is_dir());

        assert_eq!(node.check_peer(node.addr()).await, None);
    }

    #[tokio::test]
    async fn test_unspecified_address_refused() {
        let temp = TempDir::new().unwrap();
        let mut config = test_config(&temp);
        config.addr = "0.0.0.0:0".to_string();
        assert!(Node::bind(config).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_check_evicts_everywhere() {
        let temp = TempDir::new().unwrap();
        let node = Node::bind(test_config(&temp)).await.unwrap();

        let dead = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dead_ep = Endpoint::new(dead.local_addr().unwrap());
        let other: Endpoint = "127.0.0.1:9".parse().unwrap();

        node.peers().add(dead_ep).await;
        let mut website = Website::new("blog", "k", vec![]);
        website.seeders.add(dead_ep);
        website.seeders.add(other);
        node.websites().set(website).await;
        node.routes().set(&other.key(), dead_ep).await;

        assert_eq!(node.check_peer(dead_ep).await, Some(false));
        assert!(!node.peers().contains(&dead_ep).await);
        let seeders = node.websites().get("blog").await.unwrap().seeders;
        assert!(!seeders.contains(&dead_ep));
        assert!(seeders.contains(&other));
        assert!(node.routes().is_empty().await);
    }

    #[tokio::test]
    async fn test_stored_metadata_loaded_on_sync() {
        let temp = TempDir::new().unwrap();
        let node = Node::bind(test_config(&temp)).await.unwrap();

        let mut website = Website::new("blog", "k", vec!["news".to_string()]);
        website.version = 3;
        node.store().save(&website).unwrap();

        node.sync_store().await;
        assert_eq!(node.websites().version("blog").await, Some(3));
        assert_eq!(node.websites().search("news").await, vec!["blog"]);
    }

    #[tokio::test]
    async fn test_push_splits_large_directory() {
        let temp = TempDir::new().unwrap();
        let node = Node::bind(test_config(&temp)).await.unwrap();

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_ep = Endpoint::new(peer.local_addr().unwrap());
        node.peers().add(peer_ep).await;

        let mut names = std::collections::BTreeSet::new();
        for i in 0..4 {
            let mut website = Website::new(format!("site{}", i), "k", vec![]);
            website.chunk_size = 8192;
            website.manifest = (0..600).map(|c| format!("{:064x}", c)).collect();
            names.insert(website.name.clone());
            node.websites().set(website).await;
        }
        let snapshot = node.websites().snapshot().await;
        assert!(Message::metadata(node.addr(), peer_ep, snapshot).encode().is_err());

        node.push_metadata().await;

        let mut seen = std::collections::BTreeSet::new();
        let mut buf = vec![0u8; 65_536];
        while let Ok(Ok((len, _))) = tokio::time::timeout(
            std::time::Duration::from_millis(500),
            transport::receive(&peer, &mut buf),
        )
        .await
        {
            if let Ok(Message {
                payload: Payload::Metadata(part),
                ..
            }) = Message::decode(&buf[..len])
            {
                seen.extend(part.into_keys());
            }
        }
        assert_eq!(seen, names);
    }
}
