//! Website signing and verification
//!
//! Each website has its own ed25519 key pair. The owner keeps the secret key
//! under `keys/<name>`; the hex verifying key travels as the website's
//! `owner_key`. Signing writes `contents.json` at the top of the website
//! directory, listing the SHA-256 of every other file together with a
//! signature over that list.

use crate::bundle::list_files;
use crate::config::DataLayout;
use anyhow::{anyhow, bail, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey, SECRET_KEY_LENGTH};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use w2p_core::Website;

/// Name of the signed listing inside a website directory
pub const CONTENTS_FILE: &str = "contents.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contents {
    /// Relative path to hex SHA-256
    pub files: BTreeMap<String, String>,
    /// Hex ed25519 signature over the listing
    pub signature: String,
}

/// Generate and store a fresh key for a website
pub fn generate_key(layout: &DataLayout, name: &str) -> Result<SigningKey> {
    let mut csprng = rand::rngs::OsRng;
    let key = SigningKey::generate(&mut csprng);

    let path = layout.key_path(name)?;
    std::fs::create_dir_all(layout.keys_dir())?;
    std::fs::write(&path, hex::encode(key.to_bytes()))?;

    tracing::info!("Generated key for {}", name);
    Ok(key)
}

pub fn load_key(layout: &DataLayout, name: &str) -> Result<SigningKey> {
    let path = layout.key_path(name)?;
    let text = std::fs::read_to_string(&path)
        .map_err(|e| anyhow!("Cannot read key for {}: {}", name, e))?;
    let bytes: [u8; SECRET_KEY_LENGTH] = hex::decode(text.trim())?
        .try_into()
        .map_err(|_| anyhow!("Key file for {} has the wrong length", name))?;
    Ok(SigningKey::from_bytes(&bytes))
}

/// Whether this node holds the secret key of a website
pub fn owned(layout: &DataLayout, name: &str) -> bool {
    layout.key_path(name).map(|p| p.is_file()).unwrap_or(false)
}

/// Hex verifying key, as published in `Website::owner_key`
pub fn owner_key(key: &SigningKey) -> String {
    hex::encode(key.verifying_key().to_bytes())
}

fn hash_tree(dir: &Path) -> Result<BTreeMap<String, String>> {
    let mut files = BTreeMap::new();
    for (relative, full) in list_files(dir)? {
        if relative == CONTENTS_FILE {
            continue;
        }
        let data = std::fs::read(&full)?;
        files.insert(relative, hex::encode(Sha256::digest(&data)));
    }
    Ok(files)
}

/// Bytes covered by the signature: one `path:hash` line per file
fn signed_bytes(files: &BTreeMap<String, String>) -> Vec<u8> {
    let mut out = Vec::new();
    for (path, hash) in files {
        out.extend_from_slice(path.as_bytes());
        out.push(b':');
        out.extend_from_slice(hash.as_bytes());
        out.push(b'\n');
    }
    out
}

/// Sign the website directory of `name` with its stored key
pub fn sign(layout: &DataLayout, name: &str) -> Result<Contents> {
    let key = load_key(layout, name)?;
    let dir = layout.website_path(name)?;
    if !dir.is_dir() {
        bail!("Website directory {} does not exist", dir.display());
    }

    let files = hash_tree(&dir)?;
    let signature = key.sign(&signed_bytes(&files));
    let contents = Contents {
        files,
        signature: hex::encode(signature.to_bytes()),
    };

    std::fs::write(dir.join(CONTENTS_FILE), serde_json::to_string_pretty(&contents)?)?;
    tracing::debug!("Signed {} ({} files)", name, contents.files.len());
    Ok(contents)
}

/// Check that the unpacked website matches its signed listing and owner key
///
/// Returns `Ok(false)` for any integrity failure; `Err` only for local I/O.
pub fn verify(layout: &DataLayout, website: &Website) -> Result<bool> {
    let dir = layout.website_path(&website.name)?;
    let contents_path = dir.join(CONTENTS_FILE);
    if !contents_path.is_file() {
        tracing::warn!("{} has no {}", website.name, CONTENTS_FILE);
        return Ok(false);
    }

    let contents: Contents = match serde_json::from_str(&std::fs::read_to_string(&contents_path)?) {
        Ok(contents) => contents,
        Err(e) => {
            tracing::warn!("Malformed {} in {}: {}", CONTENTS_FILE, website.name, e);
            return Ok(false);
        }
    };

    let actual = hash_tree(&dir)?;
    if actual != contents.files {
        tracing::warn!("Files of {} do not match the signed listing", website.name);
        return Ok(false);
    }

    let Some(key) = parse_verifying_key(&website.owner_key) else {
        tracing::warn!("Bad owner key for {}", website.name);
        return Ok(false);
    };
    let Some(signature) = hex::decode(&contents.signature)
        .ok()
        .and_then(|bytes| Signature::from_slice(&bytes).ok())
    else {
        tracing::warn!("Bad signature encoding for {}", website.name);
        return Ok(false);
    };

    Ok(key.verify(&signed_bytes(&contents.files), &signature).is_ok())
}

fn parse_verifying_key(hex_key: &str) -> Option<VerifyingKey> {
    let bytes: [u8; 32] = hex::decode(hex_key).ok()?.try_into().ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}
