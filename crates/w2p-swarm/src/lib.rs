//! W2P Swarm - shared in-memory state of a node
//!
//! Each component guards its own state behind its own lock and only
//! exposes whole operations, so callers never hold two of these locks at
//! once:
//!
//! - [`PeerRegistry`]: peers this node currently believes are alive
//! - [`RoutingTable`]: next hop to use for destinations that are not
//!   directly reachable
//! - [`WebsiteMap`]: every known website and the peers seeding it, with the
//!   anti-entropy merge

pub mod directory;
pub mod peers;
pub mod routing;

pub use directory::{MergeReport, WebsiteMap};
pub use peers::PeerRegistry;
pub use routing::RoutingTable;
