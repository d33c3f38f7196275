//! Anti-bot challenge solving through an external headless-browser service
//!
//! `ChallengeSolverPool` keeps a bounded set of browser sessions on the
//! backend and hands each solve request exclusive use of one of them.

pub mod pool;
pub mod protocol;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderValue;
use url::Url;

pub use pool::{ChallengeSolverPool, SessionLease};
pub use protocol::SolverCookie;

/// Errors raised while solving a challenge.
#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("Solver backend unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("Solver backend answered {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("Solver still failing after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    #[error("Site at {url} reports it is under attack")]
    UnderAttack { url: String },

    #[error("Invalid solver response: {reason}")]
    InvalidResponse { reason: String },

    #[error("Solver HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl SolverError {
    /// True when trying the same page again later may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SolverError::Unreachable { .. }
                | SolverError::RetriesExhausted { .. }
                | SolverError::UnderAttack { .. }
                | SolverError::Http(_)
        )
    }
}

/// Outcome of a solve request.
///
/// An empty body with cookies means the browser passed the challenge but the
/// rendered page was unusable; the caller should re-request the page directly
/// carrying `cookies` and `user_agent`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolverSolution {
    pub body: Bytes,
    pub cookies: Vec<SolverCookie>,
    pub user_agent: Option<String>,
}

impl SolverSolution {
    /// True when the solver produced neither a page nor cookies.
    pub fn is_empty(&self) -> bool {
        self.body.is_empty() && self.cookies.is_empty()
    }

    /// `Cookie` header value carrying the solver cookies that apply to `url`.
    ///
    /// Cookies scoped to another domain or path are left out, as a browser
    /// would.
    pub fn cookie_header_for(&self, url: &Url) -> Option<HeaderValue> {
        if self.cookies.is_empty() {
            return None;
        }

        let jar = Jar::default();
        for cookie in &self.cookies {
            jar.add_cookie_str(&cookie.to_set_cookie(), url);
        }
        jar.cookies(url)
    }
}

/// Anything able to retrieve a page from behind an anti-bot challenge.
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    /// Loads `url` through the solver, spending at most `attempts` backend
    /// calls when the backend keeps failing with server errors.
    ///
    /// # Errors
    ///
    /// - `SolverError::RetriesExhausted` - If every attempt hit a server error
    /// - `SolverError::Backend` - If the backend rejected the request
    /// - `SolverError::UnderAttack` - If the solved page is an attack notice
    async fn solve(&self, url: &str, attempts: u32) -> Result<SolverSolution, SolverError>;
}

#[cfg(test)]
mod solver_tests {
    use super::*;

    fn cookie(name: &str, value: &str) -> SolverCookie {
        SolverCookie {
            name: name.to_string(),
            value: value.to_string(),
            ..Default::default()
        }
    }

    fn scoped(name: &str, value: &str, domain: &str, path: &str) -> SolverCookie {
        SolverCookie {
            domain: domain.to_string(),
            path: path.to_string(),
            ..cookie(name, value)
        }
    }

    fn sent_pairs(solution: &SolverSolution, url: &str) -> Vec<String> {
        let url = Url::parse(url).unwrap();
        let Some(header) = solution.cookie_header_for(&url) else {
            return Vec::new();
        };
        let mut pairs: Vec<String> = header
            .to_str()
            .unwrap()
            .split("; ")
            .map(str::to_string)
            .collect();
        pairs.sort();
        pairs
    }

    #[test]
    fn test_cookie_header_joins_pairs() {
        let solution = SolverSolution {
            cookies: vec![cookie("cf_clearance", "abc"), cookie("session", "42")],
            ..Default::default()
        };

        assert_eq!(
            sent_pairs(&solution, "https://site.test/browse"),
            vec!["cf_clearance=abc", "session=42"]
        );
        assert!(!solution.is_empty());
    }

    #[test]
    fn test_cookies_for_other_domains_are_not_sent() {
        let solution = SolverSolution {
            cookies: vec![
                scoped("cf_clearance", "ok", "site.test", "/"),
                scoped("tracker_ad", "secret", "ads.other-site.example", "/"),
                scoped("parent", "1", ".site.test", ""),
            ],
            ..Default::default()
        };

        assert_eq!(
            sent_pairs(&solution, "https://site.test/browse"),
            vec!["cf_clearance=ok", "parent=1"]
        );
        assert_eq!(
            sent_pairs(&solution, "https://www.site.test/browse"),
            vec!["cf_clearance=ok", "parent=1"]
        );
        assert!(sent_pairs(&solution, "https://other.test/").is_empty());
    }

    #[test]
    fn test_cookies_for_other_paths_are_not_sent() {
        let solution = SolverSolution {
            cookies: vec![
                scoped("admin", "1", "site.test", "/admin"),
                scoped("cf_clearance", "ok", "site.test", "/"),
            ],
            ..Default::default()
        };

        assert_eq!(
            sent_pairs(&solution, "https://site.test/browse"),
            vec!["cf_clearance=ok"]
        );
        assert_eq!(
            sent_pairs(&solution, "https://site.test/admin/users"),
            vec!["admin=1", "cf_clearance=ok"]
        );
    }

    #[test]
    fn test_default_solution_is_empty() {
        let solution = SolverSolution::default();
        assert!(solution.is_empty());
        assert!(sent_pairs(&solution, "https://site.test/").is_empty());
    }

    #[test]
    fn test_backend_rejection_is_not_recoverable() {
        let error = SolverError::Backend {
            status: 400,
            message: "bad cmd".to_string(),
        };
        assert!(!error.is_recoverable());
        assert!(
            SolverError::UnderAttack {
                url: "https://example.com/".to_string()
            }
            .is_recoverable()
        );
    }
}
