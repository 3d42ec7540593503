//! w2p - peer-to-peer website replication node

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::Path;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use w2p_core::{Endpoint, Website};
use w2p_node::config::{expand_path, NodeConfig};
use w2p_node::{publish, signing, MetadataStore};
use w2p_swarm::WebsiteMap;

#[derive(Parser)]
#[command(name = "w2p")]
#[command(about = "Publish and replicate websites over a peer-to-peer network", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "~/.w2p/config.toml")]
    config: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration and data directories
    Init,

    /// Start the node
    Run {
        /// Node name (overrides config)
        #[arg(long)]
        name: Option<String>,

        /// Listen address, ip:port (overrides config)
        #[arg(long)]
        addr: Option<String>,

        /// Comma-separated peer addresses (overrides config)
        #[arg(long)]
        peers: Option<String>,
    },

    /// Publish a new website from <data_dir>/website/<name>/
    Import {
        #[arg(required = true)]
        name: String,

        /// Comma-separated keywords
        #[arg(short, long, default_value = "")]
        keywords: String,
    },

    /// Publish a new version of an owned website
    Update {
        #[arg(required = true)]
        name: String,

        /// Comma-separated keywords (keeps the current ones if omitted)
        #[arg(short, long)]
        keywords: Option<String>,
    },

    /// List stored websites
    List,

    /// Search stored websites by keyword
    Search {
        #[arg(required = true)]
        terms: Vec<String>,
    },

    /// Check the signature of an unpacked website
    Verify {
        #[arg(required = true)]
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config_path = expand_path(&cli.config);
    let mut config = NodeConfig::load_or_default(&config_path)?;

    match cli.command {
        Commands::Init => init_config(&config_path)?,
        Commands::Run { name, addr, peers } => {
            if let Some(name) = name {
                config.name = name;
            }
            if let Some(addr) = addr {
                config.addr = addr;
            }
            if let Some(peers) = peers {
                config.peers = peers;
            }
            w2p_node::node::run(config).await?;
        }
        Commands::Import { name, keywords } => {
            let addr: Endpoint = config.addr.parse()?;
            let website = publish::author_website(
                &config.layout(),
                addr,
                &name,
                Website::parse_keywords(&keywords),
                config.transfer.chunk_size,
            )?;
            println!("Published: {}", website.name);
            print_website(&website);
        }
        Commands::Update { name, keywords } => {
            let addr: Endpoint = config.addr.parse()?;
            let website = publish::update_website(
                &config.layout(),
                addr,
                &name,
                keywords.as_deref().map(Website::parse_keywords),
                config.transfer.chunk_size,
            )?;
            println!("Updated: {}", website.name);
            print_website(&website);
        }
        Commands::List => list_websites(&config)?,
        Commands::Search { terms } => search_websites(&config, &terms.join(" ")).await?,
        Commands::Verify { name } => verify_website(&config, &name)?,
    }

    Ok(())
}

fn print_website(website: &Website) {
    println!("  Version:  {}", website.version);
    println!("  Keywords: {}", website.keywords.join(", "));
    println!("  Chunks:   {} of {} bytes", website.chunk_count(), website.chunk_size);
    println!("  Seeders:  {}", website.seeders.len());
    println!("  Owner:    {}", website.owner_key);
}

fn init_config(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("Config already exists at: {}", config_path.display());
        return Ok(());
    }

    let config = NodeConfig::default();
    config.save(config_path)?;
    config.layout().create_dirs()?;

    println!("Initialized W2P at: {}", config.data_dir().display());
    println!("Config written to: {}", config_path.display());
    Ok(())
}

fn list_websites(config: &NodeConfig) -> Result<()> {
    let layout = config.layout();
    let websites = MetadataStore::new(layout.clone()).load_all()?;
    if websites.is_empty() {
        println!("No websites stored.");
        return Ok(());
    }

    for website in websites {
        let owned = if signing::owned(&layout, &website.name) {
            " (owned)"
        } else {
            ""
        };
        println!("{} v{}{}", website.name, website.version, owned);
        print_website(&website);
    }
    Ok(())
}

async fn search_websites(config: &NodeConfig, query: &str) -> Result<()> {
    let map = WebsiteMap::new();
    for website in MetadataStore::new(config.layout()).load_all()? {
        map.set(website).await;
    }

    let results = map.search(query).await;
    if results.is_empty() {
        println!("No websites match '{}'", query);
    } else {
        println!("Found {} websites for '{}':", results.len(), query);
        for name in results {
            println!("  - {}", name);
        }
    }
    Ok(())
}

fn verify_website(config: &NodeConfig, name: &str) -> Result<()> {
    let layout = config.layout();
    let website = MetadataStore::new(layout.clone())
        .load(name)?
        .ok_or_else(|| anyhow!("Website {} is unknown", name))?;

    if signing::verify(&layout, &website)? {
        println!("{}: signature OK", name);
        Ok(())
    } else {
        anyhow::bail!("{}: verification FAILED", name)
    }
}
