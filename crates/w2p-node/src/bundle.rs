//! Website packaging
//!
//! A website directory is packaged as a zstd-compressed bincode list of
//! `(relative path, contents)` entries sorted by path, so the same tree always
//! produces the same archive and therefore the same manifest.

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

const COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, Serialize, Deserialize)]
struct Entry {
    path: String,
    data: Vec<u8>,
}

/// Relative path of every regular file under `dir`, `/`-separated and sorted
pub(crate) fn list_files(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(dir)?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        files.push((parts.join("/"), entry.path().to_path_buf()));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

/// Package every file under `dir`
pub fn bundle(dir: &Path) -> Result<Vec<u8>> {
    if !dir.is_dir() {
        bail!("Not a directory: {}", dir.display());
    }

    let mut entries = Vec::new();
    for (path, full) in list_files(dir)? {
        entries.push(Entry {
            path,
            data: std::fs::read(&full)?,
        });
    }

    let raw = bincode::serialize(&entries)?;
    let archive = zstd::encode_all(&raw[..], COMPRESSION_LEVEL)?;
    tracing::debug!(
        "Bundled {} files from {} ({} bytes)",
        entries.len(),
        dir.display(),
        archive.len()
    );
    Ok(archive)
}

fn safe_relative(path: &str) -> Result<PathBuf> {
    let candidate = Path::new(path);
    if path.is_empty()
        || !candidate
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
    {
        bail!("Refusing to unpack entry {:?}", path);
    }
    Ok(candidate.to_path_buf())
}

/// Unpack an archive into `dir`, replacing whatever was there
pub fn unbundle(archive: &[u8], dir: &Path) -> Result<()> {
    let raw = zstd::decode_all(archive)?;
    let entries: Vec<Entry> = bincode::deserialize(&raw)?;

    let paths = entries
        .iter()
        .map(|e| safe_relative(&e.path))
        .collect::<Result<Vec<_>>>()?;

    let parent = dir
        .parent()
        .ok_or_else(|| anyhow!("No parent directory for {}", dir.display()))?;
    let file_name = dir
        .file_name()
        .ok_or_else(|| anyhow!("Bad target directory {}", dir.display()))?
        .to_string_lossy();
    let staging = parent.join(format!(".{}.unbundle", file_name));

    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }
    std::fs::create_dir_all(&staging)?;
    for (entry, relative) in entries.iter().zip(&paths) {
        let target = staging.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, &entry.data)?;
    }

    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    std::fs::rename(&staging, dir)?;

    tracing::debug!("Unbundled {} files into {}", entries.len(), dir.display());
    Ok(())
}
