//! Archive chunking and verification
//!
//! A packaged archive is cut into consecutive `chunk_size` byte ranges, the
//! last one possibly shorter. Each chunk is identified by the hex SHA-256 of
//! its bytes; the ordered list of those ids is the website's manifest.

use crate::{types::Website, Error, Result};
use sha2::{Digest, Sha256};
use std::ops::Range;

/// Hex SHA-256 of a chunk
pub fn hash_chunk(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Verify a single chunk against its expected id
pub fn verify_chunk(data: &[u8], expected: &str) -> bool {
    hash_chunk(data).eq_ignore_ascii_case(expected)
}

/// Number of chunks an archive of `len` bytes splits into
pub fn chunk_count(len: u64, chunk_size: usize) -> usize {
    if chunk_size == 0 {
        return 0;
    }
    len.div_ceil(chunk_size as u64) as usize
}

/// Byte range of chunk `index`, with the end clamped to the archive length
pub fn chunk_range(index: usize, chunk_size: usize, len: u64) -> Range<u64> {
    let start = (index as u64).saturating_mul(chunk_size as u64).min(len);
    let end = start.saturating_add(chunk_size as u64).min(len);
    start..end
}

/// Compute the manifest of an archive
pub fn manifest(archive: &[u8], chunk_size: usize) -> Result<Vec<String>> {
    if chunk_size == 0 {
        return Err(Error::InvalidData("chunk size must be positive".to_string()));
    }
    Ok(archive.chunks(chunk_size).map(hash_chunk).collect())
}

/// Chunk an archive and record the chunk size and manifest on the website
pub fn gen_pieces(website: &mut Website, archive: &[u8], chunk_size: usize) -> Result<()> {
    let chunk_size_u32 = u32::try_from(chunk_size)
        .map_err(|_| Error::InvalidData(format!("chunk size {} too large", chunk_size)))?;
    website.manifest = manifest(archive, chunk_size)?;
    website.chunk_size = chunk_size_u32;

    tracing::debug!(
        "Chunked {} into {} pieces of {} bytes",
        website.name,
        website.manifest.len(),
        chunk_size
    );
    Ok(())
}

/// Check that a whole archive matches a manifest
pub fn verify_archive(archive: &[u8], chunk_size: usize, expected: &[String]) -> Result<()> {
    let actual = manifest(archive, chunk_size)?;
    if actual.len() != expected.len() {
        return Err(Error::InvalidData(format!(
            "Expected {} chunks, got {}",
            expected.len(),
            actual.len()
        )));
    }
    for (computed, wanted) in actual.iter().zip(expected) {
        if !computed.eq_ignore_ascii_case(wanted) {
            return Err(Error::HashMismatch {
                expected: wanted.clone(),
                actual: computed.clone(),
            });
        }
    }
    Ok(())
}
