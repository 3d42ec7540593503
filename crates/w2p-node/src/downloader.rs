//! Website downloader
//!
//! Fetches every chunk of a website in parallel from its seeders and writes
//! each verified chunk at its own offset of `partial/<name>`. Only once all
//! chunks landed is the part file promoted to the seeded archive and
//! unpacked.

use crate::bundle;
use crate::node::Node;
use crate::signing;
use anyhow::{anyhow, Result};
use std::collections::BTreeSet;
use std::io::SeekFrom;
use std::sync::Arc;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use w2p_core::{chunk, EphemeralSocket, Endpoint, Message, Payload, Website};

/// How a retrieval ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalOutcome {
    /// Archive complete, unpacked, verified and seeded
    Complete,
    /// Some chunks could not be fetched from any seeder
    Incomplete { missing: Vec<usize> },
    /// The website changed version while downloading; nothing was kept
    Superseded,
    /// The archive matched its manifest but the unpacked files failed signature checks
    Rejected,
}

impl RetrievalOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, RetrievalOutcome::Complete)
    }
}

/// Download (or confirm) the current version of a website
pub async fn retrieve_website(node: &Arc<Node>, name: &str) -> Result<RetrievalOutcome> {
    let website = node
        .websites()
        .get(name)
        .await
        .ok_or_else(|| anyhow!("Unknown website {}", name))?;

    if website.manifest.is_empty() {
        tracing::debug!("{} has no content yet", name);
        return Ok(RetrievalOutcome::Complete);
    }

    let layout = node.layout();
    let archive_path = layout.archive_path(name)?;
    let chunk_size = website.chunk_size as usize;

    if let Ok(existing) = tokio::fs::read(&archive_path).await {
        if chunk::verify_archive(&existing, chunk_size, &website.manifest).is_ok() {
            tracing::debug!("Archive of {} already up to date", name);
            return finish(node, &website, &existing, false).await;
        }
    }

    tracing::info!(
        "Retrieving {} version {} ({} chunks)",
        name,
        website.version,
        website.chunk_count()
    );

    let part_path = layout.part_path(name)?;
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&part_path)
        .await?;
    let file = Arc::new(Mutex::new(file));
    let gate = Arc::new(Semaphore::new(
        node.config().transfer.max_concurrent_requests.max(1),
    ));

    let mut tasks = JoinSet::new();
    for (index, chunk_id) in website.manifest.iter().enumerate() {
        let node = node.clone();
        let file = file.clone();
        let gate = gate.clone();
        let name = name.to_string();
        let chunk_id = chunk_id.clone();
        let offset = index as u64 * chunk_size as u64;

        tasks.spawn(async move {
            let Ok(_permit) = gate.acquire_owned().await else {
                return (index, false);
            };
            let Some(data) = retrieve_piece(&node, &name, &chunk_id).await else {
                return (index, false);
            };

            let mut file = file.lock().await;
            let written: std::io::Result<()> = async {
                file.seek(SeekFrom::Start(offset)).await?;
                file.write_all(&data).await
            }
            .await;
            match written {
                Ok(()) => (index, true),
                Err(e) => {
                    tracing::warn!("Failed to write chunk {} of {}: {}", index, name, e);
                    (index, false)
                }
            }
        });
    }

    let mut done = BTreeSet::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, true)) => {
                done.insert(index);
            }
            Ok((_, false)) => {}
            Err(e) => tracing::warn!("Chunk task for {} failed: {}", name, e),
        }
    }

    {
        let mut file = file.lock().await;
        file.flush().await?;
        file.sync_all().await?;
    }
    drop(file);

    if node.websites().version(name).await != Some(website.version) {
        discard(&part_path).await;
        return Ok(RetrievalOutcome::Superseded);
    }

    let missing: Vec<usize> = (0..website.chunk_count()).filter(|i| !done.contains(i)).collect();
    if !missing.is_empty() {
        discard(&part_path).await;
        return Ok(RetrievalOutcome::Incomplete { missing });
    }

    let archive = tokio::fs::read(&part_path).await?;
    if let Err(e) = chunk::verify_archive(&archive, chunk_size, &website.manifest) {
        discard(&part_path).await;
        return Err(e.into());
    }
    tokio::fs::rename(&part_path, &archive_path).await?;

    finish(node, &website, &archive, true).await
}

async fn discard(path: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

/// Unpack and verify a complete archive, then start seeding it
///
/// A freshly downloaded archive is always unpacked. An archive that was
/// already on disk is only unpacked when the tree no longer packages to it.
async fn finish(
    node: &Arc<Node>,
    website: &Website,
    archive: &[u8],
    fresh: bool,
) -> Result<RetrievalOutcome> {
    let layout = node.layout();
    let name = website.name.as_str();
    let dir = layout.website_path(name)?;

    if fresh || !tree_matches(&dir, archive)? {
        bundle::unbundle(archive, &dir)?;
    }
    if !signing::verify(layout, website)? {
        discard(&layout.archive_path(name)?).await;
        if dir.exists() {
            tokio::fs::remove_dir_all(&dir).await?;
        }
        return Ok(RetrievalOutcome::Rejected);
    }

    if node.websites().version(name).await != Some(website.version) {
        return Ok(RetrievalOutcome::Superseded);
    }

    node.websites().add_seeder(name, node.addr()).await;
    if let Some(current) = node.websites().get(name).await {
        node.store().save(&current)?;
    }

    tracing::info!("Seeding {} version {}", name, website.version);
    Ok(RetrievalOutcome::Complete)
}

fn tree_matches(dir: &std::path::Path, archive: &[u8]) -> Result<bool> {
    if !dir.is_dir() {
        return Ok(false);
    }
    Ok(bundle::bundle(dir)? == archive)
}

/// Fetch one verified chunk, trying each seeder in turn
///
/// A seeder that does not answer is handed to the liveness check in the
/// background; one that answers with wrong bytes is only skipped.
pub async fn retrieve_piece(node: &Arc<Node>, name: &str, chunk_id: &str) -> Option<Vec<u8>> {
    let seeders = node.websites().get(name).await?.seeders.to_vec();

    for seeder in seeders {
        if seeder == node.addr() {
            continue;
        }

        match request_chunk(node, &seeder, name, chunk_id).await {
            Ok(Some(data)) if chunk::verify_chunk(&data, chunk_id) => return Some(data),
            Ok(Some(_)) => {
                tracing::warn!("Chunk {} of {} from {} failed verification", chunk_id, name, seeder);
            }
            Ok(None) => {
                tracing::debug!("Chunk request to {} timed out", seeder);
                let node = node.clone();
                tokio::spawn(async move {
                    node.check_peer(seeder).await;
                });
            }
            Err(e) => {
                tracing::debug!("Chunk request to {} failed: {}", seeder, e);
                let node = node.clone();
                tokio::spawn(async move {
                    node.check_peer(seeder).await;
                });
            }
        }
    }

    tracing::debug!("No seeder of {} delivered chunk {}", name, chunk_id);
    None
}

/// Ask one seeder for a chunk; `Ok(None)` on timeout
async fn request_chunk(node: &Node, seeder: &Endpoint, name: &str, chunk_id: &str) -> Result<Option<Vec<u8>>> {
    let socket = EphemeralSocket::bind(node.addr().ip()).await?;
    let request = Message::data_request(socket.local_endpoint(), *seeder, name, chunk_id);
    let next_hop = node.routes().next_hop(seeder).await;
    socket.send(&request, &next_hop).await?;

    let timeout = node.config().transfer.data_request_timeout();
    let buffer_size = node.config().gossip.listen_buffer_size;
    match socket.receive_message(buffer_size, timeout).await? {
        None => Ok(None),
        Some(Message {
            payload: Payload::DataReply(reply),
            ..
        }) if reply.website == name && reply.chunk_id == chunk_id => Ok(Some(reply.data)),
        Some(other) => Err(anyhow!("Unexpected {} from {}", other.kind(), other.origin)),
    }
}
