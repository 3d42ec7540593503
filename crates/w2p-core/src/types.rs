//! Core data types for W2P

use crate::{Error, Result, CHUNK_SIZE};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr, SocketAddrV6, ToSocketAddrs};
use std::str::FromStr;

/// A snapshot of a website directory, keyed and ordered by website name
pub type Directory = BTreeMap<String, Website>;

/// A UDP endpoint of a peer
///
/// Two endpoints are equal when their normalized `ip:port` forms are equal;
/// the IPv6 zone is carried along but does not take part in comparisons.
#[derive(Clone, Copy)]
pub struct Endpoint(SocketAddr);

impl Endpoint {
    /// Create an endpoint from a socket address
    pub fn new(addr: SocketAddr) -> Self {
        Self(addr)
    }

    /// Build an endpoint from its parts, `zone` being an IPv6 scope id
    pub fn from_parts(ip: IpAddr, port: u16, zone: u32) -> Self {
        match ip {
            IpAddr::V6(v6) => Self(SocketAddr::V6(SocketAddrV6::new(v6, port, 0, zone))),
            IpAddr::V4(_) => Self(SocketAddr::new(ip, port)),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.0
    }

    pub fn ip(&self) -> IpAddr {
        self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    /// IPv6 scope id, 0 when absent
    pub fn zone(&self) -> u32 {
        match self.0 {
            SocketAddr::V6(v6) => v6.scope_id(),
            SocketAddr::V4(_) => 0,
        }
    }

    /// The normalized string form used as a map key
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            SocketAddr::V4(v4) => write!(f, "{}:{}", v4.ip(), v4.port()),
            SocketAddr::V6(v6) => write!(f, "[{}]:{}", v6.ip(), v6.port()),
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Endpoint({})", self)
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.ip() == other.ip() && self.port() == other.port()
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ip().hash(state);
        self.port().hash(state);
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    /// Parse `ip:port` or `host:port`, preferring IPv4 when a host resolves
    /// to several addresses
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidAddress("empty address".to_string()));
        }
        if let Ok(addr) = SocketAddr::from_str(s) {
            return Ok(Self(addr));
        }

        let resolved: Vec<SocketAddr> = s
            .to_socket_addrs()
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", s, e)))?
            .collect();

        resolved
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| resolved.first())
            .map(|a| Self(*a))
            .ok_or_else(|| Error::InvalidAddress(format!("{} did not resolve", s)))
    }
}

impl Serialize for Endpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Endpoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A duplicate-free set of endpoints
///
/// Insertion order is kept so iteration is stable, but equality ignores it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Endpoint>", into = "Vec<Endpoint>")]
pub struct PeerSet {
    peers: Vec<Endpoint>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a comma-separated list such as `10.0.0.1:5000,10.0.0.2:5000`
    pub fn parse(list: &str) -> Result<Self> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Endpoint::from_str)
            .collect()
    }

    /// Add a peer, returning false if it was already present
    pub fn add(&mut self, peer: Endpoint) -> bool {
        if self.contains(&peer) {
            return false;
        }
        self.peers.push(peer);
        true
    }

    /// Remove a peer, returning false if it was not present
    pub fn remove(&mut self, peer: &Endpoint) -> bool {
        let before = self.peers.len();
        self.peers.retain(|p| p != peer);
        self.peers.len() != before
    }

    pub fn contains(&self, peer: &Endpoint) -> bool {
        self.peers.contains(peer)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.peers.iter()
    }

    pub fn to_vec(&self) -> Vec<Endpoint> {
        self.peers.clone()
    }
}

impl PartialEq for PeerSet {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|p| other.contains(p))
    }
}

impl Eq for PeerSet {}

impl FromIterator<Endpoint> for PeerSet {
    fn from_iter<I: IntoIterator<Item = Endpoint>>(iter: I) -> Self {
        let mut set = PeerSet::new();
        for peer in iter {
            set.add(peer);
        }
        set
    }
}

impl From<Vec<Endpoint>> for PeerSet {
    fn from(peers: Vec<Endpoint>) -> Self {
        peers.into_iter().collect()
    }
}

impl From<PeerSet> for Vec<Endpoint> {
    fn from(set: PeerSet) -> Self {
        set.peers
    }
}

impl<'a> IntoIterator for &'a PeerSet {
    type Item = &'a Endpoint;
    type IntoIter = std::slice::Iter<'a, Endpoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.peers.iter()
    }
}

/// Metadata describing a replicated website
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Website {
    /// Unique name, also the directory name of the website on disk
    pub name: String,
    /// Hex-encoded ed25519 key of the owner; never changes for a name
    pub owner_key: String,
    /// Content version, starts at 1 and only ever grows
    pub version: u64,
    /// Search keywords
    pub keywords: Vec<String>,
    /// Size in bytes of every chunk but the last
    pub chunk_size: u32,
    /// Hex SHA-256 of each chunk of the packaged archive, in order
    pub manifest: Vec<String>,
    /// Peers holding a complete copy of the archive
    pub seeders: PeerSet,
}

impl Website {
    /// Create version 1 of a website with no content yet
    pub fn new(name: impl Into<String>, owner_key: impl Into<String>, keywords: Vec<String>) -> Self {
        Self {
            name: name.into(),
            owner_key: owner_key.into(),
            version: 1,
            keywords,
            chunk_size: CHUNK_SIZE as u32,
            manifest: Vec::new(),
            seeders: PeerSet::new(),
        }
    }

    /// Website names double as file names, so they must be a single path component
    pub fn is_valid_name(name: &str) -> bool {
        !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\', '\0'])
    }

    /// Split a comma-separated keyword list
    pub fn parse_keywords(list: &str) -> Vec<String> {
        list.split(',')
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect()
    }

    pub fn chunk_count(&self) -> usize {
        self.manifest.len()
    }

    /// Position of a chunk id within the manifest
    pub fn chunk_index(&self, chunk_id: &str) -> Option<usize> {
        self.manifest.iter().position(|h| h == chunk_id)
    }

    pub fn has_keyword(&self, term: &str) -> bool {
        let term = term.to_lowercase();
        self.keywords.iter().any(|k| k.to_lowercase() == term)
    }

    pub fn bump_version(&mut self) {
        self.version += 1;
    }
}
