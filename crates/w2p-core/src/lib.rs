//! W2P Core - Shared types, protocols, and utilities
//!
//! This crate provides the building blocks shared by every W2P node:
//! peer endpoints, website metadata, the UDP wire protocol and the
//! chunking rules used to move website archives between peers.

pub mod chunk;
pub mod error;
pub mod message;
pub mod proto;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
pub use message::{DataReply, DataRequest, Message, Payload};
pub use transport::EphemeralSocket;
pub use types::*;

/// Protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Default chunk size: 8 KB, so a chunk reply fits in one datagram
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Largest payload a single UDP datagram can carry
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Default number of relay hops a message may take
pub const DEFAULT_TTL: u32 = 8;
