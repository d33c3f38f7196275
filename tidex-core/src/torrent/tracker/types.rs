//! Core types for tracker scrape communication

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::client::HttpTrackerClient;
use super::udp::UdpTrackerClient;
use crate::torrent::InfoHash;

/// Swarm statistics for a single torrent from a scrape reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScrapeStats {
    /// Number of seeders (peers with complete file)
    pub complete: u32,
    /// Total number of completed downloads
    pub downloaded: u32,
    /// Number of leechers (peers downloading)
    pub incomplete: u32,
}

/// Failure of one scrape attempt against one tracker.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Unsupported tracker scheme: {url}")]
    UnsupportedScheme { url: String },

    #[error("Invalid tracker URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Tracker connection failed: {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Tracker {url} timed out")]
    Timeout { url: String },

    #[error("Tracker {url} returned server error {status}")]
    ServerError { url: String, status: u16 },

    #[error("Tracker protocol error: {message}")]
    Protocol { message: String },

    #[error("Tracker {url} does not track {info_hash}")]
    NotTracked { url: String, info_hash: InfoHash },
}

/// Scrape interface shared by HTTP and UDP trackers.
///
/// Implementations handle protocol-specific details while reporting
/// failures through the common `TrackerError` taxonomy.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    /// Retrieves swarm statistics for `info_hash` without announcing.
    ///
    /// # Errors
    ///
    /// - `TrackerError::ConnectionFailed` - If the tracker cannot be reached
    /// - `TrackerError::Timeout` - If the tracker did not answer in time
    /// - `TrackerError::Protocol` - If the reply is malformed or an error
    /// - `TrackerError::NotTracked` - If the reply lacks the requested torrent
    async fn scrape(&self, info_hash: &InfoHash) -> Result<ScrapeStats, TrackerError>;

    /// Returns tracker URL for debugging and logging purposes.
    fn tracker_url(&self) -> &str;
}

/// Builds a scrape client for a tracker URL.
pub trait TrackerClientFactory: Send + Sync {
    /// # Errors
    ///
    /// - `TrackerError::UnsupportedScheme` - If the URL is not udp, http or https
    /// - `TrackerError::InvalidUrl` - If the URL cannot be parsed
    fn client_for(&self, tracker_url: &str) -> Result<Arc<dyn TrackerClient>, TrackerError>;
}

/// Real network clients chosen by URL scheme.
///
/// HTTP trackers share one connection pool.
#[derive(Clone)]
pub struct NetworkTrackerClients {
    http: reqwest::Client,
    timeout: Duration,
}

impl NetworkTrackerClients {
    /// # Errors
    ///
    /// - `TrackerError::ConnectionFailed` - If the HTTP client cannot be constructed
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, TrackerError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()
            .map_err(|e| TrackerError::ConnectionFailed {
                url: String::new(),
                reason: format!("HTTP client setup failed: {e}"),
            })?;

        Ok(Self { http, timeout })
    }
}

impl TrackerClientFactory for NetworkTrackerClients {
    fn client_for(&self, tracker_url: &str) -> Result<Arc<dyn TrackerClient>, TrackerError> {
        let parsed = url::Url::parse(tracker_url).map_err(|e| TrackerError::InvalidUrl {
            url: tracker_url.to_string(),
            reason: e.to_string(),
        })?;

        match parsed.scheme() {
            "http" | "https" => Ok(Arc::new(HttpTrackerClient::new(
                tracker_url.to_string(),
                self.http.clone(),
            ))),
            "udp" => Ok(Arc::new(UdpTrackerClient::new(
                tracker_url.to_string(),
                self.timeout,
            )?)),
            _ => Err(TrackerError::UnsupportedScheme {
                url: tracker_url.to_string(),
            }),
        }
    }
}
