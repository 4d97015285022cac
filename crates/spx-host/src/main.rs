#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use spx_cache::{CacheManager, EngineHashes, HttpFetcher};
use spx_host::HostConfig;
use spx_storage::FsStore;

#[derive(Debug, Parser)]
#[command(name = "spx-host", version, about = "Engine asset tooling for the web host")]
struct Cli {
    /// Log filter (tracing-subscriber EnvFilter syntax). Overrides the config file's logLevel.
    ///
    /// Environment variable: `SPX_LOG`.
    #[arg(long, env = "SPX_LOG", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the known-good hash manifest for a set of engine assets.
    Hash {
        /// Asset files; each is keyed by its file name.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Write the manifest here instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Download the engine binary into an on-disk cache unless a valid copy is already there.
    Prefetch {
        /// Host configuration JSON.
        ///
        /// Environment variable: `SPX_CONFIG`.
        #[arg(long, env = "SPX_CONFIG")]
        config: PathBuf,

        /// Hash manifest produced by `spx-host hash`.
        ///
        /// Environment variable: `SPX_HASHES`.
        #[arg(long, env = "SPX_HASHES")]
        hashes: PathBuf,

        /// Directory backing the persistent store.
        ///
        /// Environment variable: `SPX_CACHE_DIR`.
        #[arg(long, env = "SPX_CACHE_DIR")]
        cache_dir: PathBuf,
    },
}

fn init_tracing(filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(filter)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn hash(files: Vec<PathBuf>, output: Option<PathBuf>) -> anyhow::Result<()> {
    let mut manifest = EngineHashes::new();
    for path in &files {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .with_context(|| format!("{} has no usable file name", path.display()))?;
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        tracing::debug!(asset = name, bytes = data.len(), "hashed");
        manifest.insert_data(name, &data);
    }
    let json = manifest.to_json_pretty()?;
    match output {
        Some(path) => tokio::fs::write(&path, json + "\n")
            .await
            .with_context(|| format!("writing {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}

async fn prefetch(config: HostConfig, hashes: PathBuf, cache_dir: PathBuf) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(&hashes)
        .await
        .with_context(|| format!("reading {}", hashes.display()))?;
    let hashes = EngineHashes::from_json(&raw).context("parsing hash manifest")?;

    let cache = CacheManager::new(
        Arc::new(FsStore::new(cache_dir)),
        Arc::new(HttpFetcher::new()),
        config.cache_layout(),
        config.asset_options(),
    );
    let wasm = cache.check_engine_cache(&hashes).await?;
    tracing::info!(asset = %config.engine_asset, bytes = wasm.len(), "engine cache ready");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Hash { files, output } => {
            init_tracing(cli.log_level.as_deref().unwrap_or("info"));
            hash(files, output).await
        }
        Command::Prefetch {
            config,
            hashes,
            cache_dir,
        } => {
            let raw = tokio::fs::read_to_string(&config)
                .await
                .with_context(|| format!("reading {}", config.display()))?;
            let mut config = HostConfig::from_json(&raw)?;
            // Prefetching without the cache would download and discard.
            config.use_asset_cache = true;
            init_tracing(cli.log_level.as_deref().unwrap_or(&config.log_level));
            prefetch(config, hashes, cache_dir).await
        }
    }
}
