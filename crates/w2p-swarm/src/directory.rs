//! Website directory and anti-entropy merge
//!
//! Every node holds one [`Website`] per name. Nodes push their whole
//! directory to each other; the receiver folds it in with [`merge_into`]:
//! unknown websites are adopted, known ones move forward only when the
//! remote version is strictly newer, and a name whose owner key differs
//! between the two sides is refused outright.

use std::collections::BTreeSet;
use tokio::sync::RwLock;
use w2p_core::{Directory, Endpoint, Error, Result, Website};

/// What a merge changed and what the node should do about it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Websites that are new or got a newer version, so their content must be fetched
    pub fetch: Vec<String>,
    /// Seeders of newly learned websites, worth checking as peers
    pub discovered: Vec<Endpoint>,
}

impl MergeReport {
    pub fn is_empty(&self) -> bool {
        self.fetch.is_empty() && self.discovered.is_empty()
    }
}

fn is_acceptable(website: &Website) -> bool {
    Website::is_valid_name(&website.name)
        && website.version >= 1
        && (website.manifest.is_empty() || website.chunk_size > 0)
}

/// Merge a remote snapshot into a local directory
///
/// Fails with [`Error::KeyMismatch`] without touching `local` if any name is
/// claimed by two different owner keys.
pub fn merge_into(local: &mut Directory, remote: &Directory) -> Result<MergeReport> {
    for remote_site in remote.values() {
        if let Some(local_site) = local.get(&remote_site.name) {
            if local_site.owner_key != remote_site.owner_key {
                return Err(Error::KeyMismatch {
                    name: remote_site.name.clone(),
                });
            }
        }
    }

    let mut report = MergeReport::default();
    for remote_site in remote.values() {
        if !is_acceptable(remote_site) {
            tracing::warn!("Ignoring malformed website entry {:?}", remote_site.name);
            continue;
        }

        match local.get_mut(&remote_site.name) {
            None => {
                tracing::info!(
                    "Adding website {} (version {})",
                    remote_site.name,
                    remote_site.version
                );
                for seeder in remote_site.seeders.iter() {
                    if !report.discovered.contains(seeder) {
                        report.discovered.push(*seeder);
                    }
                }
                local.insert(remote_site.name.clone(), remote_site.clone());
                report.fetch.push(remote_site.name.clone());
            }
            Some(local_site) if remote_site.version > local_site.version => {
                tracing::info!(
                    "Updating website {} from version {} to {}",
                    local_site.name,
                    local_site.version,
                    remote_site.version
                );
                local_site.version = remote_site.version;
                local_site.keywords = remote_site.keywords.clone();
                local_site.chunk_size = remote_site.chunk_size;
                local_site.manifest = remote_site.manifest.clone();

                for seeder in remote_site.seeders.iter() {
                    local_site.seeders.add(*seeder);
                }
                let stale: Vec<Endpoint> = local_site
                    .seeders
                    .iter()
                    .filter(|p| !remote_site.seeders.contains(p))
                    .copied()
                    .collect();
                for seeder in &stale {
                    local_site.seeders.remove(seeder);
                }

                report.fetch.push(remote_site.name.clone());
            }
            Some(_) => {}
        }
    }

    Ok(report)
}

/// The node's authoritative directory of websites
#[derive(Debug, Default)]
pub struct WebsiteMap {
    websites: RwLock<Directory>,
}

impl WebsiteMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a website
    pub async fn set(&self, website: Website) {
        self.websites
            .write()
            .await
            .insert(website.name.clone(), website);
    }

    pub async fn get(&self, name: &str) -> Option<Website> {
        self.websites.read().await.get(name).cloned()
    }

    pub async fn version(&self, name: &str) -> Option<u64> {
        self.websites.read().await.get(name).map(|w| w.version)
    }

    pub async fn names(&self) -> Vec<String> {
        self.websites.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.websites.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.websites.read().await.is_empty()
    }

    /// Copy of the whole directory, as pushed to peers
    pub async fn snapshot(&self) -> Directory {
        self.websites.read().await.clone()
    }

    /// Add a seeder to one website, returning false if the website is unknown
    /// or the seeder was already listed
    pub async fn add_seeder(&self, name: &str, peer: Endpoint) -> bool {
        match self.websites.write().await.get_mut(name) {
            Some(website) => website.seeders.add(peer),
            None => false,
        }
    }

    /// Remove a peer from every website's seeders, returning how many lists changed
    pub async fn remove_peer(&self, peer: &Endpoint) -> usize {
        let mut websites = self.websites.write().await;
        websites
            .values_mut()
            .map(|w| w.seeders.remove(peer))
            .filter(|removed| *removed)
            .count()
    }

    /// Names of websites having any of the whitespace-separated terms as a keyword
    pub async fn search(&self, query: &str) -> Vec<String> {
        let websites = self.websites.read().await;
        let mut results = BTreeSet::new();
        for term in query.split_whitespace() {
            for website in websites.values().filter(|w| w.has_keyword(term)) {
                results.insert(website.name.clone());
            }
        }
        results.into_iter().collect()
    }

    /// Merge a remote snapshot, see [`merge_into`]
    pub async fn merge(&self, remote: &Directory) -> Result<MergeReport> {
        let mut websites = self.websites.write().await;
        merge_into(&mut websites, remote)
    }
}
