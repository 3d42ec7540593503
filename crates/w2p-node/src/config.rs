//! Node configuration and on-disk layout

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use w2p_core::{Website, CHUNK_SIZE};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Human readable node name, only used in logs
    pub name: String,

    /// Address the node listens on; must be a concrete IP
    pub addr: String,

    /// Comma-separated initial peers
    pub peers: String,

    /// Data directory path
    pub data_dir: String,

    pub transfer: TransferConfig,
    pub liveness: LivenessConfig,
    pub gossip: GossipConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Chunk size used when packaging local websites
    pub chunk_size: usize,
    /// How long to wait for a chunk reply in milliseconds
    pub data_request_timeout_ms: u64,
    /// Maximum concurrent chunk requests per website
    pub max_concurrent_requests: usize,
    /// Period between re-attempts of unfinished downloads in milliseconds
    pub retry_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// How long to wait for a heartbeat echo in milliseconds
    pub heartbeat_timeout_ms: u64,
    /// Maximum probes in flight at once
    pub heartbeat_limit: usize,
    /// Receive buffer for heartbeat echoes
    pub heartbeat_buffer_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipConfig {
    /// Period between metadata pushes in milliseconds
    pub anti_entropy_interval_ms: u64,
    /// Receive buffer of the listen socket
    pub listen_buffer_size: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "w2p".to_string(),
            addr: "127.0.0.1:7700".to_string(),
            peers: String::new(),
            data_dir: "~/.w2p".to_string(),
            transfer: TransferConfig::default(),
            liveness: LivenessConfig::default(),
            gossip: GossipConfig::default(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            data_request_timeout_ms: 10_000,
            max_concurrent_requests: 50,
            retry_interval_ms: 30_000,
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 10_000,
            heartbeat_limit: 50,
            heartbeat_buffer_size: 512,
        }
    }
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            anti_entropy_interval_ms: 2_000,
            listen_buffer_size: 65_536,
        }
    }
}

impl TransferConfig {
    pub fn data_request_timeout(&self) -> Duration {
        Duration::from_millis(self.data_request_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

impl LivenessConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

impl GossipConfig {
    pub fn anti_entropy_interval(&self) -> Duration {
        Duration::from_millis(self.anti_entropy_interval_ms)
    }
}

impl NodeConfig {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a file, or defaults if it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Expand ~ in data_dir path
    pub fn data_dir(&self) -> PathBuf {
        expand_path(&self.data_dir)
    }

    pub fn layout(&self) -> DataLayout {
        DataLayout::new(self.data_dir())
    }
}

pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Where a node keeps its files
///
/// ```text
/// <root>/metadata/<name>.json   website metadata
/// <root>/seed/<name>            packaged archive being seeded
/// <root>/partial/<name>         archive being downloaded
/// <root>/website/<name>/        unpacked website files
/// <root>/keys/<name>            owner secret key, hex
/// ```
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn create_dirs(&self) -> Result<()> {
        for dir in [
            self.metadata_dir(),
            self.seed_dir(),
            self.partial_dir(),
            self.website_dir(),
            self.keys_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join("metadata")
    }

    pub fn seed_dir(&self) -> PathBuf {
        self.root.join("seed")
    }

    /// Downloads in progress, kept apart from `seed/` so no name can collide
    pub fn partial_dir(&self) -> PathBuf {
        self.root.join("partial")
    }

    pub fn website_dir(&self) -> PathBuf {
        self.root.join("website")
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.root.join("keys")
    }

    pub fn metadata_path(&self, name: &str) -> Result<PathBuf> {
        checked(name)?;
        Ok(self.metadata_dir().join(format!("{}.json", name)))
    }

    pub fn archive_path(&self, name: &str) -> Result<PathBuf> {
        checked(name)?;
        Ok(self.seed_dir().join(name))
    }

    pub fn part_path(&self, name: &str) -> Result<PathBuf> {
        checked(name)?;
        Ok(self.partial_dir().join(name))
    }

    pub fn website_path(&self, name: &str) -> Result<PathBuf> {
        checked(name)?;
        Ok(self.website_dir().join(name))
    }

    pub fn key_path(&self, name: &str) -> Result<PathBuf> {
        checked(name)?;
        Ok(self.keys_dir().join(name))
    }
}

fn checked(name: &str) -> Result<()> {
    if !Website::is_valid_name(name) {
        bail!("Invalid website name: {:?}", name);
    }
    Ok(())
}
