//! Persistent website metadata
//!
//! One pretty-printed JSON document per website under `metadata/`.

use crate::config::DataLayout;
use anyhow::Result;
use std::path::PathBuf;
use w2p_core::Website;

#[derive(Debug, Clone)]
pub struct MetadataStore {
    layout: DataLayout,
}

impl MetadataStore {
    pub fn new(layout: DataLayout) -> Self {
        Self { layout }
    }

    /// Write a website's metadata, replacing any previous copy
    pub fn save(&self, website: &Website) -> Result<()> {
        let path = self.layout.metadata_path(&website.name)?;
        std::fs::create_dir_all(self.layout.metadata_dir())?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(website)?)?;
        std::fs::rename(&tmp, &path)?;

        tracing::debug!("Saved metadata for {} (version {})", website.name, website.version);
        Ok(())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.layout
            .metadata_path(name)
            .map(|p| p.exists())
            .unwrap_or(false)
    }

    /// Load one website's metadata, `None` if it was never saved
    pub fn load(&self, name: &str) -> Result<Option<Website>> {
        let path = self.layout.metadata_path(name)?;
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// Load every stored website, skipping unreadable documents
    pub fn load_all(&self) -> Result<Vec<Website>> {
        let dir = self.layout.metadata_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut websites = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path: PathBuf = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let loaded = std::fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|json| serde_json::from_str::<Website>(&json).map_err(Into::into));
            match loaded {
                Ok(website) if Website::is_valid_name(&website.name) => websites.push(website),
                Ok(website) => {
                    tracing::warn!("Skipping {}: invalid name {:?}", path.display(), website.name)
                }
                Err(e) => tracing::warn!("Skipping unreadable metadata {}: {}", path.display(), e),
            }
        }

        websites.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(websites)
    }
}
