//! Public tracker list with mirror failover and a static fallback

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use super::types::TrackerError;
use crate::cache::{CacheStore, TRACKER_LIST_KEY};
use crate::config::TrackerConfig;

const ACCEPTED_SCHEMES: [&str; 3] = ["http://", "https://", "udp://"];

/// Resolves the list of public trackers to scrape.
///
/// The list comes from the cache, then the first responsive mirror, then the
/// static list from configuration. `trackers` never fails.
pub struct TrackerListProvider {
    cache: Arc<dyn CacheStore>,
    client: reqwest::Client,
    mirrors: Vec<String>,
    static_trackers: Vec<String>,
    list_ttl: Duration,
}

impl TrackerListProvider {
    /// # Errors
    ///
    /// - `TrackerError::ConnectionFailed` - If the HTTP client cannot be constructed
    pub fn new(config: &TrackerConfig, cache: Arc<dyn CacheStore>) -> Result<Self, TrackerError> {
        let client = reqwest::Client::builder()
            .timeout(config.list_fetch_timeout)
            .build()
            .map_err(|e| TrackerError::ConnectionFailed {
                url: String::new(),
                reason: format!("HTTP client setup failed: {e}"),
            })?;

        Ok(Self {
            cache,
            client,
            mirrors: config.list_mirrors.clone(),
            static_trackers: config.static_trackers.clone(),
            list_ttl: config.list_ttl,
        })
    }

    /// Fallback list used when no mirror answers.
    pub fn static_trackers(&self) -> &[String] {
        &self.static_trackers
    }

    /// Returns the cached list, a freshly downloaded one, or the static list.
    pub async fn trackers(&self) -> Vec<String> {
        if let Some(cached) = self.cached_list().await {
            tracing::debug!(count = cached.len(), "Tracker list served from cache");
            return cached;
        }

        match self.download().await {
            Some(trackers) => trackers,
            None => {
                tracing::warn!(
                    count = self.static_trackers.len(),
                    "All tracker list mirrors failed, falling back to static trackers"
                );
                self.static_trackers.clone()
            }
        }
    }

    async fn cached_list(&self) -> Option<Vec<String>> {
        let bytes = match self.cache.get(TRACKER_LIST_KEY).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "Tracker list cache read failed");
                return None;
            }
        };

        match serde_json::from_slice::<Vec<String>>(&bytes) {
            Ok(trackers) if !trackers.is_empty() => Some(trackers),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unreadable cached tracker list");
                None
            }
        }
    }

    async fn download(&self) -> Option<Vec<String>> {
        for mirror in &self.mirrors {
            let trackers = match self.fetch_mirror(mirror).await {
                Ok(trackers) => trackers,
                Err(reason) => {
                    tracing::warn!(url = %mirror, %reason, "Tracker list mirror failed, trying next");
                    continue;
                }
            };

            self.store(mirror, &trackers).await;
            return Some(trackers);
        }
        None
    }

    async fn fetch_mirror(&self, mirror: &str) -> Result<Vec<String>, String> {
        let response = self
            .client
            .get(mirror)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(format!("HTTP {status}"));
        }

        let body = response.text().await.map_err(|e| e.to_string())?;
        let trackers = parse_tracker_list(&body);
        if trackers.is_empty() {
            return Err("no valid trackers in response".to_string());
        }
        Ok(trackers)
    }

    async fn store(&self, mirror: &str, trackers: &[String]) {
        let encoded = match serde_json::to_vec(trackers) {
            Ok(encoded) => Bytes::from(encoded),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode tracker list");
                return;
            }
        };

        match self
            .cache
            .set_with_expiration(TRACKER_LIST_KEY, encoded, self.list_ttl)
            .await
        {
            Ok(()) => tracing::info!(count = trackers.len(), url = %mirror, "Cached dynamic trackers"),
            Err(e) => tracing::error!(error = %e, "Failed to cache dynamic trackers"),
        }
    }
}

/// Extracts tracker URLs from a newline separated list.
///
/// Blank lines and lines without an http, https or udp scheme are skipped.
pub fn parse_tracker_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| ACCEPTED_SCHEMES.iter().any(|scheme| line.starts_with(scheme)))
        .map(str::to_string)
        .collect()
}
