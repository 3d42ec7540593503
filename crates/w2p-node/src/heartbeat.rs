//! Liveness probing
//!
//! A probe sends a Heartbeat from its own ephemeral socket and treats any
//! datagram arriving on that socket before the deadline as proof of life.
//! Probes node-wide share a semaphore so a burst of checks cannot exhaust
//! sockets, and only one probe per peer runs at a time.

use crate::config::LivenessConfig;
use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use w2p_core::{EphemeralSocket, Endpoint, Message};

pub struct Liveness {
    gate: Semaphore,
    probing: Mutex<HashSet<Endpoint>>,
    timeout: Duration,
    buffer_size: usize,
}

impl Liveness {
    pub fn new(config: &LivenessConfig) -> Self {
        Self {
            gate: Semaphore::new(config.heartbeat_limit.max(1)),
            probing: Mutex::new(HashSet::new()),
            timeout: config.heartbeat_timeout(),
            buffer_size: config.heartbeat_buffer_size,
        }
    }

    /// Mark `peer` as being probed; false if a probe for it is already running
    pub async fn begin(&self, peer: Endpoint) -> bool {
        self.probing.lock().await.insert(peer)
    }

    pub async fn finish(&self, peer: &Endpoint) {
        self.probing.lock().await.remove(peer);
    }

    pub async fn is_probing(&self, peer: &Endpoint) -> bool {
        self.probing.lock().await.contains(peer)
    }

    /// Probe `peer` through `next_hop`, from a socket bound on `local_ip`
    pub async fn probe(&self, local_ip: IpAddr, peer: &Endpoint, next_hop: &Endpoint) -> bool {
        let Ok(_permit) = self.gate.acquire().await else {
            return false;
        };

        let socket = match EphemeralSocket::bind(local_ip).await {
            Ok(socket) => socket,
            Err(e) => {
                tracing::warn!("Failed to open probe socket: {}", e);
                return false;
            }
        };

        let heartbeat = Message::heartbeat(socket.local_endpoint(), *peer);
        if let Err(e) = socket.send(&heartbeat, next_hop).await {
            tracing::debug!("Heartbeat to {} failed: {}", peer, e);
            return false;
        }

        match socket.receive_timeout(self.buffer_size, self.timeout).await {
            Ok(Some(_)) => true,
            Ok(None) => {
                tracing::debug!("Heartbeat to {} timed out", peer);
                false
            }
            Err(e) => {
                tracing::debug!("Heartbeat to {} failed: {}", peer, e);
                false
            }
        }
    }
}
