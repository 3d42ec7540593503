//! Authoring and updating local websites

use crate::bundle;
use crate::config::DataLayout;
use crate::signing;
use crate::storage::MetadataStore;
use anyhow::{bail, Result};
use w2p_core::{chunk, Endpoint, PeerSet, Website};

/// Sign, package and chunk `website/<name>/`, writing the archive to `seed/<name>`
fn package(layout: &DataLayout, website: &mut Website, chunk_size: usize) -> Result<()> {
    layout.create_dirs()?;
    signing::sign(layout, &website.name)?;
    let archive = bundle::bundle(&layout.website_path(&website.name)?)?;
    chunk::gen_pieces(website, &archive, chunk_size)?;

    let archive_path = layout.archive_path(&website.name)?;
    let tmp = layout.part_path(&website.name)?;
    std::fs::write(&tmp, &archive)?;
    std::fs::rename(&tmp, &archive_path)?;
    Ok(())
}

/// Publish a new website from the files in `website/<name>/`
pub fn author_website(
    layout: &DataLayout,
    addr: Endpoint,
    name: &str,
    keywords: Vec<String>,
    chunk_size: usize,
) -> Result<Website> {
    let dir = layout.website_path(name)?;
    if !dir.is_dir() {
        bail!("Website directory {} does not exist", dir.display());
    }
    let store = MetadataStore::new(layout.clone());
    if store.exists(name) {
        bail!("Website {} already exists, use update instead", name);
    }

    let key = signing::generate_key(layout, name)?;
    let mut website = Website::new(name, signing::owner_key(&key), keywords);
    package(layout, &mut website, chunk_size)?;
    website.seeders.add(addr);

    store.save(&website)?;
    tracing::info!("Published {} ({} chunks)", name, website.chunk_count());
    Ok(website)
}

/// Publish a new version of a website this node owns
///
/// Seeders reset to this node alone, since every other seeder still holds
/// the previous archive. `keywords` of `None` keeps the current ones.
pub fn update_website(
    layout: &DataLayout,
    addr: Endpoint,
    name: &str,
    keywords: Option<Vec<String>>,
    chunk_size: usize,
) -> Result<Website> {
    let store = MetadataStore::new(layout.clone());
    let Some(mut website) = store.load(name)? else {
        bail!("Website {} is unknown, import it first", name);
    };
    if !signing::owned(layout, name) {
        bail!("Website {} is not owned by this node", name);
    }
    let key = signing::load_key(layout, name)?;
    if signing::owner_key(&key) != website.owner_key {
        bail!("Stored key for {} does not match its owner key", name);
    }

    package(layout, &mut website, chunk_size)?;
    if let Some(keywords) = keywords {
        website.keywords = keywords;
    }
    website.bump_version();
    website.seeders = PeerSet::from(vec![addr]);

    store.save(&website)?;
    tracing::info!("Updated {} to version {}", name, website.version);
    Ok(website)
}
