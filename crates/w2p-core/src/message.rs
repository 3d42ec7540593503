//! Messages exchanged between nodes
//!
//! A message names the node that authored it (`origin`) and the node it is
//! meant for (`destination`), which may differ from the peer a datagram is
//! actually sent to when it travels through a relay.

use crate::proto::{self, Envelope, WireEndpoint, WireWebsite};
use crate::types::{Directory, Endpoint, PeerSet, Website};
use crate::{Error, Result, DEFAULT_TTL, MAX_DATAGRAM_SIZE, PROTOCOL_VERSION};
use prost::Message as _;
use std::net::IpAddr;

/// Growth of the website list's length prefix once it is no longer empty
const METADATA_PREFIX_SLACK: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRequest {
    pub website: String,
    pub chunk_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataReply {
    pub website: String,
    pub chunk_id: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Liveness probe or its echo
    Heartbeat,
    /// Full snapshot of the sender's website directory
    Metadata(Directory),
    DataRequest(DataRequest),
    DataReply(DataReply),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub origin: Endpoint,
    pub destination: Endpoint,
    /// Relay hops left before the message is dropped
    pub ttl: u32,
    pub payload: Payload,
}

impl Message {
    fn new(origin: Endpoint, destination: Endpoint, payload: Payload) -> Self {
        Self {
            origin,
            destination,
            ttl: DEFAULT_TTL,
            payload,
        }
    }

    pub fn heartbeat(origin: Endpoint, destination: Endpoint) -> Self {
        Self::new(origin, destination, Payload::Heartbeat)
    }

    pub fn metadata(origin: Endpoint, destination: Endpoint, snapshot: Directory) -> Self {
        Self::new(origin, destination, Payload::Metadata(snapshot))
    }

    /// Split a snapshot into Metadata messages that each fit one datagram
    ///
    /// Merging is per website, so every part is a valid snapshot by itself.
    /// An empty snapshot still yields one message. A website too large for a
    /// datagram on its own is left out.
    pub fn metadata_batches(origin: Endpoint, destination: Endpoint, snapshot: &Directory) -> Vec<Self> {
        let empty = Self::metadata(origin, destination, Directory::new());
        let budget = MAX_DATAGRAM_SIZE
            .saturating_sub(empty.to_envelope().encoded_len() + METADATA_PREFIX_SLACK);

        let mut batches = Vec::new();
        let mut batch = Directory::new();
        let mut used = 0;
        for (name, website) in snapshot {
            let len = website_to_wire(website).encoded_len();
            let cost = 1 + prost::length_delimiter_len(len) + len;
            if cost > budget {
                tracing::error!(
                    "Website {} needs {} bytes of metadata, more than one datagram holds; not gossiping it",
                    name,
                    cost
                );
                continue;
            }
            if used + cost > budget {
                batches.push(Self::metadata(origin, destination, std::mem::take(&mut batch)));
                used = 0;
            }
            batch.insert(name.clone(), website.clone());
            used += cost;
        }
        if !batch.is_empty() || batches.is_empty() {
            batches.push(Self::metadata(origin, destination, batch));
        }
        batches
    }

    pub fn data_request(
        origin: Endpoint,
        destination: Endpoint,
        website: impl Into<String>,
        chunk_id: impl Into<String>,
    ) -> Self {
        Self::new(
            origin,
            destination,
            Payload::DataRequest(DataRequest {
                website: website.into(),
                chunk_id: chunk_id.into(),
            }),
        )
    }

    /// Build the reply to a data request, addressed back to its origin
    pub fn data_reply(request: &Message, data: Vec<u8>) -> Result<Self> {
        let Payload::DataRequest(req) = &request.payload else {
            return Err(Error::Protocol(format!(
                "cannot reply with data to a {} message",
                request.kind()
            )));
        };
        Ok(Self::new(
            request.destination,
            request.origin,
            Payload::DataReply(DataReply {
                website: req.website.clone(),
                chunk_id: req.chunk_id.clone(),
                data,
            }),
        ))
    }

    pub fn kind(&self) -> &'static str {
        match self.payload {
            Payload::Heartbeat => "heartbeat",
            Payload::Metadata(_) => "metadata",
            Payload::DataRequest(_) => "data request",
            Payload::DataReply(_) => "data reply",
        }
    }

    /// Copy of the message for relaying, or None once the hop budget is spent
    pub fn forwarded(&self) -> Option<Self> {
        let ttl = self.ttl.checked_sub(1)?;
        Some(Self {
            ttl,
            ..self.clone()
        })
    }

    pub fn to_envelope(&self) -> Envelope {
        let payload = match &self.payload {
            Payload::Heartbeat => None,
            Payload::Metadata(snapshot) => Some(proto::Payload::Metadata(proto::WebsiteMap {
                websites: snapshot.values().map(website_to_wire).collect(),
            })),
            Payload::DataRequest(req) => Some(proto::Payload::DataRequest(proto::DataRequest {
                website: req.website.clone(),
                chunk_id: req.chunk_id.clone(),
            })),
            Payload::DataReply(reply) => Some(proto::Payload::DataReply(proto::DataReply {
                website: reply.website.clone(),
                chunk_id: reply.chunk_id.clone(),
                data: reply.data.clone(),
            })),
        };

        Envelope {
            version: PROTOCOL_VERSION as u32,
            origin: Some(endpoint_to_wire(&self.origin)),
            destination: Some(endpoint_to_wire(&self.destination)),
            ttl: self.ttl,
            payload,
        }
    }

    /// Encode for a single datagram
    pub fn encode(&self) -> Result<Vec<u8>> {
        let bytes = self.to_envelope().to_bytes();
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(Error::MessageTooLarge {
                size: bytes.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }
        Ok(bytes)
    }

    /// Decode a datagram, checking version compatibility and addressing
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let envelope = Envelope::from_bytes(buf)?;
        Self::from_envelope(envelope)
    }

    pub fn from_envelope(envelope: Envelope) -> Result<Self> {
        if envelope.version != PROTOCOL_VERSION as u32 {
            return Err(Error::VersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: envelope.version,
            });
        }

        let origin = envelope
            .origin
            .as_ref()
            .ok_or_else(|| Error::Protocol("missing origin".to_string()))
            .and_then(endpoint_from_wire)?;
        let destination = envelope
            .destination
            .as_ref()
            .ok_or_else(|| Error::Protocol("missing destination".to_string()))
            .and_then(endpoint_from_wire)?;

        let payload = match envelope.payload {
            None => Payload::Heartbeat,
            Some(proto::Payload::Metadata(map)) => {
                let mut snapshot = Directory::new();
                for wire in map.websites {
                    let website = website_from_wire(wire)?;
                    snapshot.insert(website.name.clone(), website);
                }
                Payload::Metadata(snapshot)
            }
            Some(proto::Payload::DataRequest(req)) => Payload::DataRequest(DataRequest {
                website: req.website,
                chunk_id: req.chunk_id,
            }),
            Some(proto::Payload::DataReply(reply)) => Payload::DataReply(DataReply {
                website: reply.website,
                chunk_id: reply.chunk_id,
                data: reply.data,
            }),
        };

        Ok(Self {
            origin,
            destination,
            ttl: envelope.ttl,
            payload,
        })
    }
}

fn endpoint_to_wire(endpoint: &Endpoint) -> WireEndpoint {
    WireEndpoint {
        ip: endpoint.ip().to_string(),
        port: endpoint.port() as u32,
        zone: endpoint.zone(),
    }
}

fn endpoint_from_wire(wire: &WireEndpoint) -> Result<Endpoint> {
    let ip: IpAddr = wire
        .ip
        .parse()
        .map_err(|_| Error::InvalidAddress(format!("bad ip {:?}", wire.ip)))?;
    let port = u16::try_from(wire.port)
        .map_err(|_| Error::InvalidAddress(format!("bad port {}", wire.port)))?;
    Ok(Endpoint::from_parts(ip, port, wire.zone))
}

fn website_to_wire(website: &Website) -> WireWebsite {
    WireWebsite {
        name: website.name.clone(),
        owner_key: website.owner_key.clone(),
        version: website.version,
        keywords: website.keywords.clone(),
        chunk_size: website.chunk_size,
        manifest: website.manifest.clone(),
        seeders: website.seeders.iter().map(endpoint_to_wire).collect(),
    }
}

fn website_from_wire(wire: WireWebsite) -> Result<Website> {
    let seeders = wire
        .seeders
        .iter()
        .map(endpoint_from_wire)
        .collect::<Result<PeerSet>>()?;
    Ok(Website {
        name: wire.name,
        owner_key: wire.owner_key,
        version: wire.version,
        keywords: wire.keywords,
        chunk_size: wire.chunk_size,
        manifest: wire.manifest,
        seeders,
    })
}
