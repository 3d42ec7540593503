//! Serving chunks to other peers
//!
//! Chunks are read straight from the stored archive and re-hashed before they
//! go out, so an archive replaced or damaged on disk is never served under
//! the old manifest.

use crate::config::DataLayout;
use crate::node::Node;
use anyhow::Result;
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use w2p_core::{chunk, Message, Payload, Website};

/// Read chunk `chunk_id` of a website's archive
///
/// `Ok(None)` when the id is not in the manifest, the archive is missing or
/// its bytes no longer hash to the id.
pub async fn read_chunk(layout: &DataLayout, website: &Website, chunk_id: &str) -> Result<Option<Vec<u8>>> {
    let Some(index) = website.chunk_index(chunk_id) else {
        return Ok(None);
    };

    let path = layout.archive_path(&website.name)?;
    let mut file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let len = file.metadata().await?.len();
    let range = chunk::chunk_range(index, website.chunk_size as usize, len);
    if range.is_empty() {
        return Ok(None);
    }

    file.seek(SeekFrom::Start(range.start)).await?;
    let mut data = vec![0u8; (range.end - range.start) as usize];
    file.read_exact(&mut data).await?;

    if !chunk::verify_chunk(&data, chunk_id) {
        tracing::warn!("Stored archive of {} no longer matches chunk {}", website.name, index);
        return Ok(None);
    }
    Ok(Some(data))
}

/// Answer a data request with the requested chunk, or stay silent
pub async fn send_piece(node: &Node, request: &Message) {
    let Payload::DataRequest(req) = &request.payload else {
        return;
    };

    let Some(website) = node.websites().get(&req.website).await else {
        tracing::debug!("Request for unknown website {} from {}", req.website, request.origin);
        return;
    };

    let data = match read_chunk(node.layout(), &website, &req.chunk_id).await {
        Ok(Some(data)) => data,
        Ok(None) => {
            tracing::debug!("No chunk {} of {} to serve", req.chunk_id, req.website);
            return;
        }
        Err(e) => {
            tracing::warn!("Failed to read chunk of {}: {}", req.website, e);
            return;
        }
    };

    let sent = match Message::data_reply(request, data) {
        Ok(reply) => node.send(&reply).await,
        Err(e) => Err(e),
    };
    match sent {
        Ok(()) => tracing::debug!("Served chunk {} of {} to {}", req.chunk_id, req.website, request.origin),
        Err(e) => tracing::warn!("Failed to serve {} to {}: {}", req.website, request.origin, e),
    }
}
