//! Pinforge - Main entry point
//!
//! Builds (or validates) the descriptor cache and writes the pin and DMA
//! tables of every configured device.

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use pinforge_core::{
    generate, CacheOptions, DescriptorCache, FileCacheStore, FsDescriptorSource, OutputLayout,
};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "pinforge")]
#[command(about = "Generate pin and DMA tables from device descriptors")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "pinforge.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Ignore the cache file and reparse all descriptors
    #[arg(long)]
    rebuild: bool,

    /// Part number prefix to generate (repeatable, overrides the configured list)
    #[arg(short, long = "device")]
    devices: Vec<String>,

    /// Print every known part number and exit
    #[arg(long)]
    list: bool,
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_level(&args.log_level))
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Pinforge v{}", env!("CARGO_PKG_VERSION"));

    let config = config::load_config(&args.config)?;

    let source = FsDescriptorSource::new(&config.descriptors.root).with_context(|| {
        format!(
            "Descriptor root {} is not available",
            config.descriptors.root.display()
        )
    })?;
    let project_root = std::env::current_dir()
        .and_then(|dir| dir.canonicalize())
        .context("Failed to resolve project root")?;

    let options = CacheOptions {
        roots: vec![project_root, source.root().to_path_buf()],
        families: config.descriptors.families.clone(),
        force_rebuild: args.rebuild,
    };
    let mut store = FileCacheStore::new(config.cache.path.clone());
    let mut cache = DescriptorCache::build(&source, &mut store, &options).with_context(|| {
        format!("Failed to build descriptor cache {}", store.path().display())
    })?;

    info!(
        cache = %store.path().display(),
        rebuilt = cache.was_rebuilt(),
        devices = cache.identifiers().count(),
        "Descriptor cache ready"
    );

    if args.list {
        for id in cache.identifiers() {
            println!("{id}");
        }
        return Ok(());
    }

    let devices = if args.devices.is_empty() {
        config.output.devices
    } else {
        args.devices
    };
    let layout = OutputLayout {
        pins_root: config.output.pins_dir,
        targets_root: config.output.targets_dir,
    };

    let summaries =
        generate(&mut cache, &devices, &layout).context("Failed to generate device tables")?;
    info!(devices = summaries.len(), "Generation complete");

    Ok(())
}
