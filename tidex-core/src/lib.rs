//! Tidex Core - Resilient acquisition layer for torrent listing aggregation
//!
//! This crate provides the two halves of acquisition that the per-site
//! scrapers depend on: a document fetcher that survives anti-bot challenge
//! pages (cache first, direct HTTP, then a headless-browser solver pool), and
//! a tracker scrape aggregator that races public BitTorrent trackers for the
//! swarm health of a single info hash.

pub mod cache;
pub mod config;
pub mod fetch;
pub mod solver;
pub mod torrent;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use cache::{CacheError, CacheStore, DiskCache, MemoryCache};
pub use config::TidexConfig;
pub use fetch::{DocumentFetcher, FetchError, PageInspector};
pub use solver::{ChallengeSolver, ChallengeSolverPool, SolverError, SolverSolution};
pub use torrent::tracker::{
    PeerCount, ScrapeError, TrackerError, TrackerListProvider, TrackerScrapeAggregator,
};
pub use torrent::{InfoHash, InfoHashError};

/// Errors that can bubble up from any Tidex subsystem.
///
/// High-level error type wrapping the per-component failures.
#[derive(Debug, thiserror::Error)]
pub enum TidexError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Solver error: {0}")]
    Solver(#[from] SolverError),

    #[error("Scrape error: {0}")]
    Scrape(#[from] ScrapeError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Invalid info hash: {0}")]
    InfoHash(#[from] InfoHashError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TidexError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            TidexError::Fetch(e) => match e {
                FetchError::ChallengeDetected { url } => {
                    format!("Page at {url} is protected by an anti-bot challenge")
                }
                FetchError::InvalidContent { url } => format!("Page at {url} is not HTML"),
                FetchError::TransientNetwork { url, .. } => {
                    format!("Could not reach {url}, try again later")
                }
                _ => "Page could not be fetched".to_string(),
            },
            TidexError::Solver(_) => "Challenge solver failed".to_string(),
            TidexError::Scrape(ScrapeError::NoPeersFound { info_hash, .. }) => {
                format!("No tracker reported peers for {info_hash}")
            }
            TidexError::Tracker(e) => format!("Tracker failure: {e}"),
            TidexError::Cache(_) => "Cache error occurred".to_string(),
            TidexError::InfoHash(e) => format!("Invalid info hash: {e}"),
            TidexError::Configuration { .. } => "Configuration error occurred".to_string(),
            TidexError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            TidexError::Configuration { .. }
                | TidexError::InfoHash(_)
                | TidexError::Fetch(FetchError::InvalidUrl { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, TidexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_for_challenge() {
        let error = TidexError::from(FetchError::ChallengeDetected {
            url: "https://example.com/".to_string(),
        });
        assert_eq!(
            error.user_message(),
            "Page at https://example.com/ is protected by an anti-bot challenge"
        );
        assert!(!error.is_user_error());
    }

    #[test]
    fn test_info_hash_errors_are_user_errors() {
        let error = TidexError::from(InfoHashError::InvalidLength { length: 3 });
        assert!(error.is_user_error());
    }

    #[test]
    fn test_no_peers_message_includes_hash() {
        let info_hash = InfoHash::new([0xab; 20]);
        let error = TidexError::from(ScrapeError::NoPeersFound {
            info_hash,
            attempted: 4,
        });
        assert!(error.user_message().contains(&info_hash.to_string()));
    }
}
