//! Page retrieval that survives anti-bot challenges
//!
//! A fetch consults the short-lived cache, then tries a direct request with
//! browser headers, then falls back to the challenge solver. Only pages that
//! look like genuine HTML are cached or returned.

pub mod headers;
pub mod inspect;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, COOKIE, USER_AGENT};
use url::Url;

pub use inspect::PageInspector;

use crate::cache::{CacheError, CacheStore, short_lived_key};
use crate::config::FetchConfig;
use crate::solver::{ChallengeSolver, ChallengeSolverPool, SolverError, SolverSolution};

/// Errors surfaced by `DocumentFetcher::fetch` once every fallback is spent.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Network failure fetching {url}: {reason}")]
    TransientNetwork { url: String, reason: String },

    #[error("Response for {url} is a challenge")]
    ChallengeDetected { url: String },

    #[error("Response for {url} is not a valid HTML document")]
    InvalidContent { url: String },

    #[error("Challenge solver failed: {0}")]
    Solver(#[from] SolverError),

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("HTTP client setup failed: {reason}")]
    ClientSetup { reason: String },
}

impl FetchError {
    /// True when retrying the whole fetch later may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            FetchError::TransientNetwork { .. } => true,
            FetchError::Solver(e) => e.is_recoverable(),
            _ => false,
        }
    }
}

/// Result of a direct request.
enum DirectOutcome {
    Page(Bytes),
    Rejected(Bytes),
    Failed(String),
}

/// Cache-first page fetcher with solver fallback.
pub struct DocumentFetcher {
    cache: Arc<dyn CacheStore>,
    solver: Arc<dyn ChallengeSolver>,
    client: reqwest::Client,
    inspector: PageInspector,
    config: FetchConfig,
}

impl DocumentFetcher {
    /// Creates a fetcher using the given cache and solver.
    ///
    /// # Errors
    ///
    /// - `FetchError::ClientSetup` - If the HTTP client cannot be constructed
    pub fn new(
        config: FetchConfig,
        cache: Arc<dyn CacheStore>,
        solver: Arc<dyn ChallengeSolver>,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(config.idle_timeout)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| FetchError::ClientSetup {
                reason: e.to_string(),
            })?;

        Ok(Self {
            cache,
            solver,
            client,
            inspector: PageInspector::new(),
            config,
        })
    }

    /// Creates a fetcher whose solver fallback is disabled.
    ///
    /// # Errors
    ///
    /// - `FetchError::ClientSetup` - If an HTTP client cannot be constructed
    pub fn without_solver(
        config: FetchConfig,
        cache: Arc<dyn CacheStore>,
    ) -> Result<Self, FetchError> {
        let solver = ChallengeSolverPool::disabled().map_err(|e| FetchError::ClientSetup {
            reason: e.to_string(),
        })?;
        Self::new(config, cache, Arc::new(solver))
    }

    /// Changes how long validated pages stay in the short-lived cache.
    pub fn set_short_lived_expiration(&mut self, ttl: Duration) {
        self.config.short_lived_ttl = ttl;
    }

    pub fn inspector(&self) -> &PageInspector {
        &self.inspector
    }

    /// Retrieves the page at `url`.
    ///
    /// A cached page is returned without touching the network. Otherwise the
    /// page is requested directly and, if that fails or yields a challenge or
    /// non-HTML body, through the challenge solver. The final page is cached
    /// only when it passes validation.
    ///
    /// # Errors
    ///
    /// - `FetchError::InvalidUrl` - If `url` or `referer` cannot be used in a request
    /// - `FetchError::Solver` - If the solver fallback failed
    /// - `FetchError::TransientNetwork` - If no request produced a body
    /// - `FetchError::ChallengeDetected` - If the final body is still a challenge
    /// - `FetchError::InvalidContent` - If the final body is not HTML
    pub async fn fetch(&self, url: &str, referer: Option<&str>) -> Result<Bytes, FetchError> {
        let key = short_lived_key(url);

        match self.cache.get(&key).await {
            Ok(Some(body)) => {
                tracing::debug!(url, "Returning from short-lived cache");
                return Ok(body);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(url, error = %e, "Short-lived cache read failed"),
        }

        let target = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let mut transport_failure = None;
        let mut rejected = Bytes::new();
        let body = match self.fetch_direct(&target, referer).await? {
            DirectOutcome::Page(body) => {
                tracing::debug!(url, "Request served from plain client");
                body
            }
            DirectOutcome::Rejected(body) => {
                tracing::debug!(
                    url,
                    challenge = self.inspector.has_challenge(&body),
                    "Direct response unusable, trying challenge solver"
                );
                rejected = body;
                self.fetch_via_solver(&target).await?
            }
            DirectOutcome::Failed(reason) => {
                tracing::debug!(url, reason = %reason, "Direct request failed, trying challenge solver");
                transport_failure = Some(reason);
                self.fetch_via_solver(&target).await?
            }
        };

        if !self.inspector.is_acceptable(&body) {
            // An empty solver answer says nothing; classify the direct page instead
            let evidence = if body.is_empty() { &rejected } else { &body };
            return Err(self.rejection(url, evidence, transport_failure));
        }

        match self
            .cache
            .set_with_expiration(&key, body.clone(), self.config.short_lived_ttl)
            .await
        {
            Ok(()) => tracing::debug!(url, "Saved to cache"),
            Err(e) => tracing::error!(url, error = %e, "Failed to save response to cache"),
        }

        Ok(body)
    }

    /// Drops the cached copy of `url` so the next fetch goes to the network.
    ///
    /// # Errors
    ///
    /// - `CacheError` - If the cache backend rejected the deletion
    pub async fn expire(&self, url: &str) -> Result<(), CacheError> {
        self.cache.delete(&short_lived_key(url)).await?;
        tracing::debug!(url, "Expired short-lived cache entry");
        Ok(())
    }

    async fn fetch_direct(
        &self,
        target: &Url,
        referer: Option<&str>,
    ) -> Result<DirectOutcome, FetchError> {
        let referer = referer
            .filter(|r| !r.is_empty())
            .unwrap_or(self.config.default_referer.as_str());
        let headers =
            headers::browser_headers(&self.config.user_agent, referer).map_err(|e| {
                FetchError::InvalidUrl {
                    url: referer.to_string(),
                    reason: e.to_string(),
                }
            })?;

        let response = match self.client.get(target.clone()).headers(headers).send().await {
            Ok(response) => response,
            Err(e) => return Ok(DirectOutcome::Failed(e.to_string())),
        };

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return Ok(DirectOutcome::Failed(e.to_string())),
        };

        tracing::debug!(
            url = %target,
            status = status.as_u16(),
            content_type = %content_type,
            size = body.len(),
            "Direct response received"
        );

        if self.inspector.is_acceptable(&body) {
            Ok(DirectOutcome::Page(body))
        } else {
            Ok(DirectOutcome::Rejected(body))
        }
    }

    async fn fetch_via_solver(&self, target: &Url) -> Result<Bytes, FetchError> {
        let solution = self
            .solver
            .solve(target.as_str(), self.config.solver_attempts)
            .await?;

        if solution.body.is_empty() && !solution.cookies.is_empty() {
            tracing::debug!(url = %target, "Re-requesting page with solver cookies");
            return self.fetch_with_cookies(target, &solution).await;
        }

        tracing::debug!(url = %target, size = solution.body.len(), "Request served from challenge solver");
        Ok(solution.body)
    }

    async fn fetch_with_cookies(
        &self,
        target: &Url,
        solution: &SolverSolution,
    ) -> Result<Bytes, FetchError> {
        let user_agent = solution
            .user_agent
            .as_deref()
            .unwrap_or(self.config.user_agent.as_str());

        let mut request = self.client.get(target.clone()).header(USER_AGENT, user_agent);
        if let Some(cookie) = solution.cookie_header_for(target) {
            request = request.header(COOKIE, cookie);
        }

        let transient = |e: reqwest::Error| FetchError::TransientNetwork {
            url: target.to_string(),
            reason: e.to_string(),
        };
        let response = request.send().await.map_err(transient)?;
        response.bytes().await.map_err(transient)
    }

    fn rejection(&self, url: &str, body: &[u8], transport_failure: Option<String>) -> FetchError {
        let url = url.to_string();
        match transport_failure {
            Some(reason) if body.is_empty() => FetchError::TransientNetwork { url, reason },
            _ if self.inspector.has_challenge(body) => FetchError::ChallengeDetected { url },
            _ => FetchError::InvalidContent { url },
        }
    }
}

#[cfg(test)]
mod fetcher_tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::cache::MemoryCache;
    use crate::solver::SolverCookie;

    const PAGE: &str = "<!DOCTYPE html><html><body>torrents</body></html>";

    /// Solver returning a fixed solution and counting calls.
    struct ScriptedSolver {
        solution: SolverSolution,
        calls: AtomicU32,
    }

    impl ScriptedSolver {
        fn new(solution: SolverSolution) -> Arc<Self> {
            Arc::new(Self {
                solution,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChallengeSolver for ScriptedSolver {
        async fn solve(&self, _url: &str, _attempts: u32) -> Result<SolverSolution, SolverError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.solution.clone())
        }
    }

    fn fetcher(cache: Arc<MemoryCache>, solver: Arc<ScriptedSolver>) -> DocumentFetcher {
        let config = FetchConfig {
            request_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        DocumentFetcher::new(config, cache, solver).unwrap()
    }

    #[tokio::test]
    async fn test_direct_page_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/list"))
            .and(header("referer", "https://google.com/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .expect(1)
            .mount(&server)
            .await;

        let cache = Arc::new(MemoryCache::default());
        let solver = ScriptedSolver::new(SolverSolution::default());
        let fetcher = fetcher(Arc::clone(&cache), Arc::clone(&solver));
        let url = format!("{}/list", server.uri());

        let first = fetcher.fetch(&url, None).await.unwrap();
        let second = fetcher.fetch(&url, None).await.unwrap();

        assert_eq!(&first[..], PAGE.as_bytes());
        assert_eq!(first, second);
        assert_eq!(solver.calls(), 0);
    }

    #[tokio::test]
    async fn test_referer_is_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("referer", "https://indexer.test/search"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = fetcher(
            Arc::new(MemoryCache::default()),
            ScriptedSolver::new(SolverSolution::default()),
        );

        fetcher
            .fetch(&server.uri(), Some("https://indexer.test/search"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_solver_cookies_trigger_second_request() {
        let server = MockServer::start().await;
        // Exact match: the cookie scoped to another site must be left out
        Mock::given(method("GET"))
            .and(header("cookie", "cf_clearance=ok"))
            .and(header("user-agent", "Solver UA"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Just a moment..."))
            .mount(&server)
            .await;

        let solver = ScriptedSolver::new(SolverSolution {
            body: Bytes::new(),
            cookies: vec![
                SolverCookie {
                    name: "cf_clearance".to_string(),
                    value: "ok".to_string(),
                    ..Default::default()
                },
                SolverCookie {
                    name: "tracker_ad".to_string(),
                    value: "secret".to_string(),
                    domain: "ads.other-site.example".to_string(),
                    path: "/".to_string(),
                },
            ],
            user_agent: Some("Solver UA".to_string()),
        });
        let fetcher = fetcher(Arc::new(MemoryCache::default()), Arc::clone(&solver));

        let body = fetcher.fetch(&server.uri(), None).await.unwrap();

        assert_eq!(&body[..], PAGE.as_bytes());
        assert_eq!(solver.calls(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_site_without_solver_is_transient() {
        let fetcher = fetcher(
            Arc::new(MemoryCache::default()),
            ScriptedSolver::new(SolverSolution::default()),
        );

        let error = fetcher.fetch("http://127.0.0.1:9/", None).await.unwrap_err();

        assert!(matches!(error, FetchError::TransientNetwork { .. }));
        assert!(error.is_recoverable());
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let fetcher = fetcher(
            Arc::new(MemoryCache::default()),
            ScriptedSolver::new(SolverSolution::default()),
        );

        let error = fetcher.fetch("not a url", None).await.unwrap_err();
        assert!(matches!(error, FetchError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn test_expire_drops_cached_page() {
        let cache = Arc::new(MemoryCache::default());
        let fetcher = fetcher(
            Arc::clone(&cache),
            ScriptedSolver::new(SolverSolution::default()),
        );
        let key = short_lived_key("https://example.com/");
        cache.set(&key, Bytes::from_static(PAGE.as_bytes())).await.unwrap();

        fetcher.expire("https://example.com/").await.unwrap();

        assert!(cache.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_short_lived_expiration_applies_to_new_entries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .expect(2)
            .mount(&server)
            .await;

        let mut fetcher = fetcher(
            Arc::new(MemoryCache::default()),
            ScriptedSolver::new(SolverSolution::default()),
        );
        fetcher.set_short_lived_expiration(Duration::from_millis(20));

        fetcher.fetch(&server.uri(), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        fetcher.fetch(&server.uri(), None).await.unwrap();
    }
}
