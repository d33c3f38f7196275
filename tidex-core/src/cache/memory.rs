//! In-process LRU cache with per-entry expiration
//!
//! Bounded by entry count and by the total size of keys and values. Expired
//! entries are dropped lazily when read, and least recently used entries are
//! evicted while either bound is exceeded.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;

use super::{CacheError, CacheStore};
use crate::config::CacheConfig;

const FALLBACK_CAPACITY: NonZeroUsize = NonZeroUsize::new(1024).unwrap();

/// Byte budget used when none is configured.
pub const DEFAULT_MAX_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Bytes,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    fn size(&self, key: &str) -> usize {
        key.len() + self.value.len()
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStatistics {
    pub entries: usize,
    pub capacity: usize,
    pub bytes: usize,
    pub max_bytes: usize,
    pub hit_count: u64,
    pub miss_count: u64,
    pub eviction_count: u64,
    pub hit_rate: f64,
}

impl CacheStatistics {
    /// Calculate hit rate as a fraction of lookups
    pub fn calculate_hit_rate(hit_count: u64, miss_count: u64) -> f64 {
        if hit_count + miss_count == 0 {
            0.0
        } else {
            (hit_count as f64) / ((hit_count + miss_count) as f64)
        }
    }
}

struct CacheState {
    entries: LruCache<String, CacheEntry>,
    default_ttl: Duration,
    total_bytes: usize,
    max_bytes: usize,
    hit_count: u64,
    miss_count: u64,
    eviction_count: u64,
}

impl CacheState {
    fn remove(&mut self, key: &str) {
        if let Some(entry) = self.entries.pop(key) {
            self.total_bytes = self.total_bytes.saturating_sub(entry.size(key));
        }
    }

    fn evict_over_budget(&mut self) {
        while self.total_bytes > self.max_bytes {
            let Some((key, entry)) = self.entries.pop_lru() else {
                break;
            };
            self.total_bytes = self.total_bytes.saturating_sub(entry.size(&key));
            self.eviction_count += 1;
            tracing::trace!(key = %key, "Evicted cache entry over byte budget");
        }
    }
}

/// `CacheStore` kept in process memory.
pub struct MemoryCache {
    state: Mutex<CacheState>,
}

impl MemoryCache {
    /// Creates a cache holding at most `max_entries` values within the
    /// default byte budget.
    ///
    /// A capacity of zero falls back to 1024 entries.
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(FALLBACK_CAPACITY);

        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                default_ttl,
                total_bytes: 0,
                max_bytes: DEFAULT_MAX_BYTES,
                hit_count: 0,
                miss_count: 0,
                eviction_count: 0,
            }),
        }
    }

    /// Caps the combined size of stored keys and values.
    ///
    /// A budget of zero keeps the default.
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        if max_bytes > 0 {
            self.state.get_mut().max_bytes = max_bytes;
        }
        self
    }

    /// Creates a cache from the cache section of the configuration.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_entries, config.default_ttl).with_max_bytes(config.max_bytes)
    }

    /// Changes the expiration used by subsequent plain `set` calls.
    pub fn set_default_expiration(&self, ttl: Duration) {
        self.state.lock().default_ttl = ttl;
    }

    /// Get cache statistics
    pub fn statistics(&self) -> CacheStatistics {
        let state = self.state.lock();

        CacheStatistics {
            entries: state.entries.len(),
            capacity: state.entries.cap().get(),
            bytes: state.total_bytes,
            max_bytes: state.max_bytes,
            hit_count: state.hit_count,
            miss_count: state.miss_count,
            eviction_count: state.eviction_count,
            hit_rate: CacheStatistics::calculate_hit_rate(state.hit_count, state.miss_count),
        }
    }

    /// Removes every entry. Statistics are kept.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.total_bytes = 0;
        tracing::debug!("Cleared all cache entries");
    }

    fn insert(&self, key: &str, value: Bytes, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };

        let size = entry.size(key);

        let mut state = self.state.lock();
        if size > state.max_bytes {
            state.remove(key);
            tracing::debug!(key, size, "Value larger than cache byte budget, not cached");
            return;
        }

        if let Some((replaced_key, replaced)) = state.entries.push(key.to_string(), entry) {
            state.total_bytes = state
                .total_bytes
                .saturating_sub(replaced.size(&replaced_key));
            if replaced_key != key {
                state.eviction_count += 1;
                tracing::trace!(key = %replaced_key, "Evicted least recently used cache entry");
            }
        }
        state.total_bytes += size;
        state.evict_over_budget();
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let now = Instant::now();
        let mut state = self.state.lock();

        let lookup = match state.entries.get(key) {
            Some(entry) if entry.is_expired(now) => None,
            Some(entry) => Some(Some(entry.value.clone())),
            None => Some(None),
        };

        match lookup {
            Some(Some(value)) => {
                state.hit_count += 1;
                Ok(Some(value))
            }
            Some(None) => {
                state.miss_count += 1;
                Ok(None)
            }
            None => {
                state.remove(key);
                state.miss_count += 1;
                tracing::trace!(key, "Dropped expired cache entry");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), CacheError> {
        let ttl = self.state.lock().default_ttl;
        self.insert(key, value, ttl);
        Ok(())
    }

    async fn set_with_expiration(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.insert(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.state.lock().remove(key);
        Ok(())
    }
}
