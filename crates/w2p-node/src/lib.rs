//! W2P Node Library
//!
//! Everything a node runs: the UDP listener and gossip loops, liveness
//! checks, chunk serving and website retrieval, plus the local tooling for
//! packaging, signing and publishing websites.

pub mod bundle;
pub mod config;
pub mod downloader;
pub mod heartbeat;
pub mod node;
pub mod publish;
pub mod seeder;
pub mod signing;
pub mod storage;

pub use config::{DataLayout, NodeConfig};
pub use downloader::RetrievalOutcome;
pub use node::Node;
pub use storage::MetadataStore;
