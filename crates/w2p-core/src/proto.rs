//! Protocol buffer message definitions
//!
//! The schema is declared directly in Rust so no protoc is needed at build
//! time. These types are the raw wire form; `crate::message` converts them
//! to and from the checked domain types.

use prost::Message;

/// Datagram envelope exchanged between nodes
#[derive(Clone, PartialEq, Message)]
pub struct Envelope {
    /// Protocol version
    #[prost(uint32, tag = "1")]
    pub version: u32,
    /// Node that authored the message
    #[prost(message, optional, tag = "2")]
    pub origin: Option<WireEndpoint>,
    /// Node the message is ultimately meant for
    #[prost(message, optional, tag = "3")]
    pub destination: Option<WireEndpoint>,
    /// Remaining relay hops
    #[prost(uint32, tag = "4")]
    pub ttl: u32,
    /// No payload means heartbeat
    #[prost(oneof = "Payload", tags = "10, 20, 21")]
    pub payload: Option<Payload>,
}

/// Payload variants for the envelope
#[derive(Clone, PartialEq, prost::Oneof)]
pub enum Payload {
    #[prost(message, tag = "10")]
    Metadata(WebsiteMap),
    #[prost(message, tag = "20")]
    DataRequest(DataRequest),
    #[prost(message, tag = "21")]
    DataReply(DataReply),
}

#[derive(Clone, PartialEq, Message)]
pub struct WireEndpoint {
    /// Textual IP address
    #[prost(string, tag = "1")]
    pub ip: String,
    #[prost(uint32, tag = "2")]
    pub port: u32,
    /// IPv6 scope id, 0 when absent
    #[prost(uint32, tag = "3")]
    pub zone: u32,
}

// Metadata messages

#[derive(Clone, PartialEq, Message)]
pub struct WebsiteMap {
    #[prost(message, repeated, tag = "1")]
    pub websites: Vec<WireWebsite>,
}

#[derive(Clone, PartialEq, Message)]
pub struct WireWebsite {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub owner_key: String,
    #[prost(uint64, tag = "3")]
    pub version: u64,
    #[prost(string, repeated, tag = "4")]
    pub keywords: Vec<String>,
    #[prost(uint32, tag = "5")]
    pub chunk_size: u32,
    #[prost(string, repeated, tag = "6")]
    pub manifest: Vec<String>,
    #[prost(message, repeated, tag = "7")]
    pub seeders: Vec<WireEndpoint>,
}

// Transfer messages

#[derive(Clone, PartialEq, Message)]
pub struct DataRequest {
    #[prost(string, tag = "1")]
    pub website: String,
    #[prost(string, tag = "2")]
    pub chunk_id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct DataReply {
    #[prost(string, tag = "1")]
    pub website: String,
    #[prost(string, tag = "2")]
    pub chunk_id: String,
    #[prost(bytes, tag = "3")]
    pub data: Vec<u8>,
}

impl Envelope {
    /// Encode the envelope to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    /// Decode an envelope from bytes without any semantic checks
    pub fn from_bytes(buf: &[u8]) -> crate::Result<Self> {
        Ok(Self::decode(buf)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_roundtrip() {
        let original = Envelope {
            version: 1,
            origin: Some(WireEndpoint {
                ip: "127.0.0.1".to_string(),
                port: 4000,
                zone: 0,
            }),
            destination: None,
            ttl: 3,
            payload: Some(Payload::DataRequest(DataRequest {
                website: "site".to_string(),
                chunk_id: "ab".to_string(),
            })),
        };
        let decoded = Envelope::from_bytes(&original.to_bytes()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_garbage_does_not_decode() {
        assert!(Envelope::from_bytes(&[0xff, 0xff, 0xff, 0xff]).is_err());
    }
}
