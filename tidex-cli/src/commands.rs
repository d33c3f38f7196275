//! CLI command implementations

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Subcommand;
use tidex_core::config::{CacheConfig, TidexConfig};
use tidex_core::{
    CacheStore, ChallengeSolverPool, DiskCache, DocumentFetcher, InfoHash, MemoryCache,
    TidexError, TrackerListProvider, TrackerScrapeAggregator,
};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Fetch a page, passing anti-bot challenges when a solver is configured
    Fetch {
        /// Page URL
        url: String,
        /// Referer sent with the direct request
        #[arg(long)]
        referer: Option<String>,
    },
    /// Drop the cached copy of a page
    Expire {
        /// Page URL
        url: String,
    },
    /// Show seeders and leechers for a torrent
    Peers {
        /// Info hash as 40 hex or 32 base32 characters
        info_hash: String,
        /// Extra tracker to query, usually from the magnet link
        #[arg(long = "tracker")]
        trackers: Vec<String>,
    },
    /// Print the public tracker list in use
    Trackers,
}

/// Handle the CLI command
///
/// # Errors
/// Returns the failing subsystem's error with context for the user
pub async fn handle_command(
    command: Commands,
    cache_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut config = TidexConfig::from_env();
    if cache_dir.is_some() {
        config.cache.directory = cache_dir;
    }

    // Expiring from a throwaway memory cache would do nothing
    let cache = if matches!(command, Commands::Expire { .. }) {
        open_disk_cache(&config.cache)?
    } else {
        open_cache(&config.cache)
    };

    let result = match command {
        Commands::Fetch { url, referer } => {
            fetch_page(&config, Arc::clone(&cache), &url, referer.as_deref()).await
        }
        Commands::Expire { url } => expire_page(&config, Arc::clone(&cache), &url).await,
        Commands::Peers {
            info_hash,
            trackers,
        } => show_peers(&config, Arc::clone(&cache), &info_hash, &trackers).await,
        Commands::Trackers => list_trackers(&config, Arc::clone(&cache)).await,
    };

    if let Err(e) = cache.flush().await {
        tracing::warn!(error = %e, "Failed to flush cache");
    }
    result
}

/// Directory holding the persistent cache.
fn cache_directory(config: &CacheConfig) -> PathBuf {
    config
        .directory
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("tidex"))
}

fn open_disk_cache(config: &CacheConfig) -> anyhow::Result<Arc<dyn CacheStore>> {
    let path = cache_directory(config).join("cache");
    let cache = DiskCache::open(&path, config.default_ttl)
        .with_context(|| format!("failed to open cache at {}", path.display()))?;
    Ok(Arc::new(cache))
}

/// Opens the persistent cache, or an in-memory one when it is unavailable.
fn open_cache(config: &CacheConfig) -> Arc<dyn CacheStore> {
    match open_disk_cache(config) {
        Ok(cache) => cache,
        Err(e) => {
            tracing::warn!(
                error = %format!("{e:#}"),
                "Persistent cache unavailable, caching in memory for this run"
            );
            Arc::new(MemoryCache::from_config(config))
        }
    }
}

/// Fetch a page and write its body to stdout
async fn fetch_page(
    config: &TidexConfig,
    cache: Arc<dyn CacheStore>,
    url: &str,
    referer: Option<&str>,
) -> anyhow::Result<()> {
    let pool = ChallengeSolverPool::connect(&config.solver)
        .await
        .context("failed to set up challenge solver")?;
    let fetcher = DocumentFetcher::new(config.fetch.clone(), cache, Arc::new(pool))
        .context("failed to set up fetcher")?;

    let body = fetcher.fetch(url, referer).await.map_err(user_facing)?;

    std::io::stdout()
        .lock()
        .write_all(&body)
        .context("failed to write page to stdout")?;
    Ok(())
}

async fn expire_page(
    config: &TidexConfig,
    cache: Arc<dyn CacheStore>,
    url: &str,
) -> anyhow::Result<()> {
    let fetcher = DocumentFetcher::without_solver(config.fetch.clone(), cache)
        .context("failed to set up fetcher")?;
    fetcher
        .expire(url)
        .await
        .with_context(|| format!("could not expire {url}"))?;

    println!("Expired cached page: {url}");
    Ok(())
}

/// Scrape trackers for one torrent
async fn show_peers(
    config: &TidexConfig,
    cache: Arc<dyn CacheStore>,
    info_hash: &str,
    trackers: &[String],
) -> anyhow::Result<()> {
    let info_hash: InfoHash = info_hash.parse().map_err(user_facing)?;
    let aggregator =
        TrackerScrapeAggregator::new(&config.tracker, &config.fetch.user_agent, cache)
            .context("failed to set up tracker clients")?;

    let count = aggregator
        .peer_counts(&info_hash, trackers)
        .await
        .map_err(user_facing)?;

    println!("Info Hash: {}", count.info_hash);
    println!("Seeders:   {}", count.seeders);
    println!("Leechers:  {}", count.leechers);
    Ok(())
}

async fn list_trackers(config: &TidexConfig, cache: Arc<dyn CacheStore>) -> anyhow::Result<()> {
    let provider = TrackerListProvider::new(&config.tracker, cache)
        .context("failed to set up tracker list client")?;

    for tracker in provider.trackers().await {
        println!("{tracker}");
    }
    Ok(())
}

/// Wraps a library error with its user-facing message.
fn user_facing(error: impl Into<TidexError>) -> anyhow::Error {
    let error = error.into();
    let message = error.user_message();
    anyhow::Error::new(error).context(message)
}
