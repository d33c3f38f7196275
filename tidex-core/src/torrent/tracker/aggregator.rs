//! Races many trackers for the swarm health of one torrent

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::timeout;

use super::list::TrackerListProvider;
use super::types::{NetworkTrackerClients, ScrapeStats, TrackerClientFactory, TrackerError};
use crate::cache::{CacheStore, peer_count_key};
use crate::config::TrackerConfig;
use crate::torrent::InfoHash;

/// Seeder and leecher counts reported for one torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCount {
    pub info_hash: InfoHash,
    pub seeders: u32,
    pub leechers: u32,
}

/// Failure of a whole peer count lookup.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("No peers found for {info_hash} after {attempted} tracker attempts")]
    NoPeersFound { info_hash: InfoHash, attempted: usize },
}

/// Cached record layout, shared with other consumers of the cache.
#[derive(Debug, Serialize, Deserialize)]
struct CachedPeers {
    seed: u32,
    leech: u32,
}

/// Looks up peer counts by scraping every known tracker at once.
///
/// The first tracker to answer wins. Its numbers are cached and every
/// attempt still in flight is aborted.
pub struct TrackerScrapeAggregator {
    cache: Arc<dyn CacheStore>,
    trackers: TrackerListProvider,
    clients: Arc<dyn TrackerClientFactory>,
    scrape_timeout: Duration,
    peer_ttl: Duration,
}

impl TrackerScrapeAggregator {
    /// Creates an aggregator scraping real HTTP and UDP trackers.
    ///
    /// # Errors
    ///
    /// - `TrackerError::ConnectionFailed` - If an HTTP client cannot be constructed
    pub fn new(
        config: &TrackerConfig,
        user_agent: &str,
        cache: Arc<dyn CacheStore>,
    ) -> Result<Self, TrackerError> {
        let trackers = TrackerListProvider::new(config, Arc::clone(&cache))?;
        let clients = Arc::new(NetworkTrackerClients::new(config.scrape_timeout, user_agent)?);

        Ok(Self::with_clients(config, cache, trackers, clients))
    }

    /// Creates an aggregator using `clients` to reach trackers.
    pub fn with_clients(
        config: &TrackerConfig,
        cache: Arc<dyn CacheStore>,
        trackers: TrackerListProvider,
        clients: Arc<dyn TrackerClientFactory>,
    ) -> Self {
        Self {
            cache,
            trackers,
            clients,
            scrape_timeout: config.scrape_timeout,
            peer_ttl: config.peer_ttl,
        }
    }

    /// Provider of the public tracker list merged into every lookup.
    pub fn tracker_list(&self) -> &TrackerListProvider {
        &self.trackers
    }

    /// Returns peer counts for `info_hash`.
    ///
    /// `embedded_trackers` (usually from the magnet link) are tried alongside
    /// the public list, each distinct URL once.
    ///
    /// # Errors
    ///
    /// - `ScrapeError::NoPeersFound` - If no tracker answered in time
    pub async fn peer_counts(
        &self,
        info_hash: &InfoHash,
        embedded_trackers: &[String],
    ) -> Result<PeerCount, ScrapeError> {
        if let Some(cached) = self.cached_count(info_hash).await {
            tracing::debug!(info_hash = %info_hash, "Peer count served from cache");
            return Ok(cached);
        }

        let public = self.trackers.trackers().await;
        let endpoints =
            dedup_preserving_order(embedded_trackers.iter().chain(public.iter()).cloned());

        let attempted = endpoints.len();
        let Some((tracker, stats)) = self.race(info_hash, endpoints).await else {
            tracing::debug!(info_hash = %info_hash, attempted, "No peers found");
            return Err(ScrapeError::NoPeersFound {
                info_hash: *info_hash,
                attempted,
            });
        };

        let count = PeerCount {
            info_hash: *info_hash,
            seeders: stats.complete,
            leechers: stats.incomplete,
        };
        tracing::debug!(
            info_hash = %info_hash,
            tracker = %tracker,
            seeders = count.seeders,
            leechers = count.leechers,
            "Peer count served from tracker"
        );

        self.store(&count).await;
        Ok(count)
    }

    /// Returns `(leechers, seeders)` for `info_hash`.
    ///
    /// # Errors
    ///
    /// - `ScrapeError::NoPeersFound` - If no tracker answered in time
    pub async fn leechers_and_seeders(
        &self,
        info_hash: &InfoHash,
        embedded_trackers: &[String],
    ) -> Result<(u32, u32), ScrapeError> {
        let count = self.peer_counts(info_hash, embedded_trackers).await?;
        Ok((count.leechers, count.seeders))
    }

    /// Scrapes every endpoint concurrently, returning the first success.
    async fn race(
        &self,
        info_hash: &InfoHash,
        endpoints: Vec<String>,
    ) -> Option<(String, ScrapeStats)> {
        let mut attempts = JoinSet::new();

        for endpoint in endpoints {
            let client = match self.clients.client_for(&endpoint) {
                Ok(client) => client,
                Err(e) => {
                    tracing::trace!(tracker = %endpoint, error = %e, "Skipping tracker");
                    continue;
                }
            };

            let info_hash = *info_hash;
            let limit = self.scrape_timeout;
            attempts.spawn(async move {
                let stats = timeout(limit, client.scrape(&info_hash))
                    .await
                    .map_err(|_| TrackerError::Timeout {
                        url: endpoint.clone(),
                    })??;
                Ok::<_, TrackerError>((endpoint, stats))
            });
        }

        while let Some(joined) = attempts.join_next().await {
            match joined {
                // Dropping `attempts` aborts every loser still in flight
                Ok(Ok(winner)) => return Some(winner),
                Ok(Err(e)) => tracing::trace!(info_hash = %info_hash, error = %e, "Tracker attempt failed"),
                Err(e) => tracing::debug!(info_hash = %info_hash, error = %e, "Tracker attempt panicked"),
            }
        }

        None
    }

    async fn cached_count(&self, info_hash: &InfoHash) -> Option<PeerCount> {
        let key = peer_count_key(info_hash);
        let bytes = match self.cache.get(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(info_hash = %info_hash, error = %e, "Peer count cache read failed");
                return None;
            }
        };

        let cached: CachedPeers = serde_json::from_slice(&bytes)
            .inspect_err(|e| {
                tracing::debug!(info_hash = %info_hash, error = %e, "Ignoring unreadable peer count");
            })
            .ok()?;

        Some(PeerCount {
            info_hash: *info_hash,
            seeders: cached.seed,
            leechers: cached.leech,
        })
    }

    async fn store(&self, count: &PeerCount) {
        let record = CachedPeers {
            seed: count.seeders,
            leech: count.leechers,
        };
        let encoded = match serde_json::to_vec(&record) {
            Ok(encoded) => Bytes::from(encoded),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode peer count");
                return;
            }
        };

        if let Err(e) = self
            .cache
            .set_with_expiration(&peer_count_key(&count.info_hash), encoded, self.peer_ttl)
            .await
        {
            tracing::warn!(info_hash = %count.info_hash, error = %e, "Failed to cache peer count");
        }
    }
}

/// Drops repeated and blank tracker URLs, keeping first-seen order.
pub fn dedup_preserving_order<I>(trackers: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    trackers
        .into_iter()
        .map(|tracker| tracker.trim().to_string())
        .filter(|tracker| !tracker.is_empty() && seen.insert(tracker.clone()))
        .collect()
}

#[cfg(test)]
mod aggregator_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use proptest::prelude::*;

    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::TidexConfig;
    use crate::torrent::tracker::types::TrackerClient;

    struct FixedClient {
        url: String,
        reply: Option<ScrapeStats>,
    }

    #[async_trait]
    impl TrackerClient for FixedClient {
        async fn scrape(&self, _info_hash: &InfoHash) -> Result<ScrapeStats, TrackerError> {
            self.reply.ok_or_else(|| TrackerError::ConnectionFailed {
                url: self.url.clone(),
                reason: "refused".to_string(),
            })
        }

        fn tracker_url(&self) -> &str {
            &self.url
        }
    }

    /// Trackers whose URL contains "good" answer; everything else refuses.
    #[derive(Default)]
    struct CountingFactory {
        built: AtomicUsize,
    }

    impl TrackerClientFactory for CountingFactory {
        fn client_for(
            &self,
            tracker_url: &str,
        ) -> Result<Arc<dyn TrackerClient>, TrackerError> {
            self.built.fetch_add(1, Ordering::SeqCst);
            let reply = tracker_url.contains("good").then_some(ScrapeStats {
                complete: 8,
                downloaded: 0,
                incomplete: 3,
            });
            Ok(Arc::new(FixedClient {
                url: tracker_url.to_string(),
                reply,
            }))
        }
    }

    fn aggregator(
        static_trackers: &[&str],
        cache: Arc<MemoryCache>,
        factory: Arc<CountingFactory>,
    ) -> TrackerScrapeAggregator {
        let mut config = TidexConfig::for_testing().tracker;
        config.static_trackers = static_trackers.iter().map(|t| t.to_string()).collect();
        let list = TrackerListProvider::new(&config, cache.clone()).unwrap();
        TrackerScrapeAggregator::with_clients(&config, cache, list, factory)
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let merged = dedup_preserving_order(
            ["udp://a:1", "http://b/announce", "udp://a:1", " ", "http://b/announce "]
                .map(String::from),
        );
        assert_eq!(merged, vec!["udp://a:1", "http://b/announce"]);
    }

    #[tokio::test]
    async fn test_success_is_cached_in_shared_format() {
        let cache = Arc::new(MemoryCache::default());
        let factory = Arc::new(CountingFactory::default());
        let aggregator = aggregator(&["udp://good.test:1/announce"], cache.clone(), factory.clone());
        let info_hash = InfoHash::new([0x21; 20]);

        let (leechers, seeders) = aggregator
            .leechers_and_seeders(&info_hash, &[])
            .await
            .unwrap();

        assert_eq!((leechers, seeders), (3, 8));
        let raw = cache.get(&peer_count_key(&info_hash)).await.unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(json, serde_json::json!({"seed": 8, "leech": 3}));

        aggregator.peer_counts(&info_hash, &[]).await.unwrap();
        assert_eq!(factory.built.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unbuildable_endpoints_count_as_failures() {
        let cache = Arc::new(MemoryCache::default());
        let mut config = TidexConfig::for_testing().tracker;
        config.static_trackers = vec!["wss://tracker.test/announce".to_string()];
        let list = TrackerListProvider::new(&config, cache.clone()).unwrap();
        let clients = Arc::new(NetworkTrackerClients::new(config.scrape_timeout, "tidex/test").unwrap());
        let aggregator = TrackerScrapeAggregator::with_clients(&config, cache.clone(), list, clients);
        let info_hash = InfoHash::new([0x22; 20]);

        let result = aggregator.peer_counts(&info_hash, &[]).await;

        assert!(matches!(
            result,
            Err(ScrapeError::NoPeersFound { attempted: 1, .. })
        ));
        assert!(cache.get(&peer_count_key(&info_hash)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_cached_count_is_refetched() {
        let cache = Arc::new(MemoryCache::default());
        let info_hash = InfoHash::new([0x23; 20]);
        cache
            .set(&peer_count_key(&info_hash), Bytes::from_static(b"{\"seed\":"))
            .await
            .unwrap();
        let factory = Arc::new(CountingFactory::default());
        let aggregator = aggregator(&["http://good.test/announce"], cache, factory.clone());

        let count = aggregator.peer_counts(&info_hash, &[]).await.unwrap();

        assert_eq!(count.seeders, 8);
        assert_eq!(factory.built.load(Ordering::SeqCst), 1);
    }

    proptest! {
        #[test]
        fn prop_dedup_has_unique_entries_in_input_order(
            trackers in proptest::collection::vec("[a-c]{1,2}", 0..20)
        ) {
            let merged = dedup_preserving_order(trackers.clone());

            let unique: HashSet<_> = merged.iter().collect();
            prop_assert_eq!(unique.len(), merged.len());

            let first_seen: Vec<String> = trackers
                .iter()
                .enumerate()
                .filter(|(i, t)| !trackers[..*i].contains(t))
                .map(|(_, t)| t.clone())
                .collect();
            prop_assert_eq!(merged, first_seen);
        }
    }
}
