//! Next-hop routing table
//!
//! Maps a destination to the peer traffic for it should be handed to. An
//! absent entry means the destination is contacted directly. Entries are
//! never expired; a dead relay is found by the liveness checks instead.

use std::collections::HashMap;
use tokio::sync::RwLock;
use w2p_core::{Endpoint, Result};

#[derive(Debug, Default)]
pub struct RoutingTable {
    routes: RwLock<HashMap<String, Endpoint>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next hop for a destination key, falling back to the destination itself
    pub async fn get(&self, destination: &str) -> Result<Endpoint> {
        if let Some(via) = self.routes.read().await.get(destination) {
            return Ok(*via);
        }
        destination.parse()
    }

    /// Next hop for a destination endpoint
    pub async fn next_hop(&self, destination: &Endpoint) -> Endpoint {
        self.routes
            .read()
            .await
            .get(&destination.key())
            .copied()
            .unwrap_or(*destination)
    }

    /// Route traffic for `destination` through `via`
    pub async fn set(&self, destination: &str, via: Endpoint) {
        let mut routes = self.routes.write().await;
        if via.key() == destination {
            routes.remove(destination);
        } else {
            routes.insert(destination.to_string(), via);
        }
    }

    /// Send to `destination` directly from now on
    pub async fn set_direct(&self, destination: &Endpoint) {
        self.routes.write().await.remove(&destination.key());
    }

    /// Record how a datagram claiming to come from `origin` actually arrived
    pub async fn observe(&self, origin: &Endpoint, sender: &Endpoint) {
        if origin == sender {
            self.set_direct(origin).await;
        } else {
            tracing::debug!("Routing {} via {}", origin, sender);
            self.set(&origin.key(), *sender).await;
        }
    }

    /// Drop the route to `peer` and every route relayed through it
    pub async fn forget(&self, peer: &Endpoint) {
        let mut routes = self.routes.write().await;
        routes.remove(&peer.key());
        routes.retain(|_, via| via != peer);
    }

    pub async fn len(&self) -> usize {
        self.routes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.routes.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(s: &str) -> Endpoint {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_get_falls_back_to_direct() {
        let table = RoutingTable::new();
        assert_eq!(table.get("127.0.0.1:5000").await.unwrap(), ep("127.0.0.1:5000"));
        assert!(table.get("garbage").await.is_err());
    }

    #[tokio::test]
    async fn test_observe_relayed_and_direct() {
        let table = RoutingTable::new();
        let origin = ep("10.0.0.5:4000");
        let relay = ep("10.0.0.9:4000");

        table.observe(&origin, &relay).await;
        assert_eq!(table.next_hop(&origin).await, relay);
        assert_eq!(table.get(&origin.key()).await.unwrap(), relay);

        table.observe(&origin, &origin).await;
        assert_eq!(table.next_hop(&origin).await, origin);
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let table = RoutingTable::new();
        let dest = ep("10.0.0.5:4000");
        table.set(&dest.key(), ep("10.0.0.1:1")).await;
        table.set(&dest.key(), ep("10.0.0.2:2")).await;
        assert_eq!(table.next_hop(&dest).await, ep("10.0.0.2:2"));
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn test_forget_drops_routes_through_peer() {
        let table = RoutingTable::new();
        let relay = ep("10.0.0.9:4000");
        let a = ep("10.0.0.1:4000");
        let b = ep("10.0.0.2:4000");
        let c = ep("10.0.0.3:4000");

        table.set(&a.key(), relay).await;
        table.set(&b.key(), relay).await;
        table.set(&c.key(), a).await;
        table.set(&relay.key(), c).await;

        table.forget(&relay).await;
        assert_eq!(table.next_hop(&a).await, a);
        assert_eq!(table.next_hop(&b).await, b);
        assert_eq!(table.next_hop(&relay).await, relay);
        assert_eq!(table.next_hop(&c).await, a);
    }
}
