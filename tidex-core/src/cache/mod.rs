//! Key/value cache shared by the fetcher, tracker list and peer counts
//!
//! The store is advisory. Readers treat any `CacheError` as a miss and fall
//! back to the network; only explicit deletions report failures to callers.

pub mod disk;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::torrent::InfoHash;

pub use disk::DiskCache;
pub use memory::{CacheStatistics, MemoryCache};

/// Namespace prefix for validated pages.
pub const SHORT_LIVED_PREFIX: &str = "shortLivedCache:";

/// Key holding the downloaded public tracker list.
pub const TRACKER_LIST_KEY: &str = "dynamic_trackers_list";

/// Namespace prefix for cached swarm peer counts.
pub const PEER_COUNT_PREFIX: &str = "peers:";

/// Errors reported by cache backends.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cached value under {key} is unreadable: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Key/value store with expiring entries.
///
/// Implementations must be safe for concurrent use by many callers. `get`
/// returns `Ok(None)` for missing and expired keys alike.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// - `CacheError::Unavailable` - If the backend cannot be reached
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    /// Stores `value` with the store's default expiration.
    ///
    /// # Errors
    ///
    /// - `CacheError::Unavailable` - If the backend cannot be reached
    async fn set(&self, key: &str, value: Bytes) -> Result<(), CacheError>;

    /// Stores `value` expiring after `ttl`.
    ///
    /// # Errors
    ///
    /// - `CacheError::Unavailable` - If the backend cannot be reached
    async fn set_with_expiration(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Removes `key`. Deleting a missing key succeeds.
    ///
    /// # Errors
    ///
    /// - `CacheError::Unavailable` - If the backend cannot be reached
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Makes earlier writes durable. Stores without durability do nothing.
    ///
    /// # Errors
    ///
    /// - `CacheError::Unavailable` - If the backend cannot persist the writes
    async fn flush(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Canonical form of a page URL used for cache keys.
///
/// Scheme and host are lowercased, default ports and fragments dropped.
/// Strings that do not parse as URLs are used verbatim.
pub fn normalize_url(raw: &str) -> String {
    match url::Url::parse(raw.trim()) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => raw.to_string(),
    }
}

/// Cache key of a validated page.
pub fn short_lived_key(url: &str) -> String {
    format!("{SHORT_LIVED_PREFIX}{}", normalize_url(url))
}

/// Cache key of the peer counts for one torrent.
pub fn peer_count_key(info_hash: &InfoHash) -> String {
    format!("{PEER_COUNT_PREFIX}{}", info_hash.to_hex())
}
