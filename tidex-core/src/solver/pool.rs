//! Bounded pool of solver browser sessions

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::StatusCode;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::protocol::{COMMAND_PATH, SolverCommand, SolverReply};
use super::{ChallengeSolver, SolverError, SolverSolution};
use crate::config::SolverConfig;
use crate::fetch::PageInspector;

/// Session id used when the backend cannot list sessions.
pub const PLACEHOLDER_SESSION: &str = "dumb-session";

/// Extra time granted to the HTTP call on top of the solver's own budget.
const CLIENT_TIMEOUT_SLACK: Duration = Duration::from_secs(5);

/// Marker the backend leaves in pages it could not get past.
const UNDER_ATTACK_MARKER: &str = "Under attack";

/// Idle sessions plus a semaphore counting them.
///
/// A permit is acquired before a session is popped and released only after
/// the session has been pushed back, so a holder of a permit always finds a
/// session in the queue.
struct SessionSlots {
    idle: Mutex<VecDeque<String>>,
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl SessionSlots {
    fn new(sessions: Vec<String>) -> Self {
        let capacity = sessions.len();
        Self {
            idle: Mutex::new(sessions.into()),
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }
}

/// Exclusive hold on one solver session.
///
/// Dropping the lease returns the session to the pool, which covers normal
/// completion, errors and cancellation of the owning future alike.
pub struct SessionLease {
    slots: Arc<SessionSlots>,
    session: Option<String>,
    _permit: OwnedSemaphorePermit,
}

impl SessionLease {
    pub fn session(&self) -> &str {
        self.session.as_deref().unwrap_or(PLACEHOLDER_SESSION)
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.slots.idle.lock().push_back(session);
        }
    }
}

/// Solver client that multiplexes callers over a fixed set of sessions.
///
/// If the backend could not be reached while the pool was being filled, the
/// pool stays uninitiated and every solve returns an empty solution.
pub struct ChallengeSolverPool {
    endpoint: String,
    max_timeout: Duration,
    client: reqwest::Client,
    slots: Option<Arc<SessionSlots>>,
    inspector: PageInspector,
}

impl ChallengeSolverPool {
    /// Connects to the backend and fills the session pool.
    ///
    /// Existing sessions are adopted first. A backend without session
    /// listing gets the whole pool filled with a placeholder id. New sessions
    /// are then created until the pool is full or creation fails.
    ///
    /// # Errors
    ///
    /// - `SolverError::Http` - If the HTTP client cannot be constructed
    pub async fn connect(config: &SolverConfig) -> Result<Self, SolverError> {
        let client = reqwest::Client::builder()
            .timeout(config.max_timeout + CLIENT_TIMEOUT_SLACK)
            .build()?;

        let Some(address) = config.address.as_deref() else {
            tracing::info!("No challenge solver configured, solving disabled");
            return Ok(Self::uninitiated(client, config.max_timeout));
        };

        let mut pool = Self {
            endpoint: format!("{}{COMMAND_PATH}", address.trim_end_matches('/')),
            max_timeout: config.max_timeout,
            client,
            slots: None,
            inspector: PageInspector::new(),
        };

        let sessions = pool.gather_sessions(config.pool_size).await;
        if sessions.is_empty() {
            tracing::warn!(
                endpoint = %pool.endpoint,
                "Challenge solver pool could not be initialized, solving disabled"
            );
        } else {
            tracing::info!(count = sessions.len(), "Challenge solver pool ready");
            pool.slots = Some(Arc::new(SessionSlots::new(sessions)));
        }

        Ok(pool)
    }

    /// A pool that never contacts a backend.
    ///
    /// # Errors
    ///
    /// - `SolverError::Http` - If the HTTP client cannot be constructed
    pub fn disabled() -> Result<Self, SolverError> {
        let config = SolverConfig::default();
        let client = reqwest::Client::builder().build()?;
        Ok(Self::uninitiated(client, config.max_timeout))
    }

    fn uninitiated(client: reqwest::Client, max_timeout: Duration) -> Self {
        Self {
            endpoint: String::new(),
            max_timeout,
            client,
            slots: None,
            inspector: PageInspector::new(),
        }
    }

    /// False when solving is disabled or initialization failed.
    pub fn is_initiated(&self) -> bool {
        self.slots.is_some()
    }

    /// Number of sessions owned by the pool.
    pub fn capacity(&self) -> usize {
        self.slots.as_ref().map_or(0, |slots| slots.capacity)
    }

    /// Number of sessions currently held by in-flight requests.
    pub fn checked_out(&self) -> usize {
        self.slots.as_ref().map_or(0, |slots| {
            slots.capacity - slots.permits.available_permits()
        })
    }

    /// Waits for an idle session and takes exclusive hold of it.
    ///
    /// Returns `None` when the pool is uninitiated.
    ///
    /// # Errors
    ///
    /// - `SolverError::Unreachable` - If the pool has been shut down
    pub async fn checkout(&self) -> Result<Option<SessionLease>, SolverError> {
        let Some(slots) = &self.slots else {
            return Ok(None);
        };

        let permit = Arc::clone(&slots.permits)
            .acquire_owned()
            .await
            .map_err(|_| SolverError::Unreachable {
                reason: "session pool closed".to_string(),
            })?;
        let session = slots.idle.lock().pop_front();

        Ok(Some(SessionLease {
            slots: Arc::clone(slots),
            session,
            _permit: permit,
        }))
    }

    async fn gather_sessions(&self, capacity: usize) -> Vec<String> {
        let mut sessions = match self.list_sessions().await {
            Ok(Some(existing)) => {
                let adopted: Vec<String> = existing.into_iter().take(capacity).collect();
                if !adopted.is_empty() {
                    tracing::info!(count = adopted.len(), "Adopted existing solver sessions");
                }
                adopted
            }
            Ok(None) => {
                tracing::info!("Solver cannot list sessions, using placeholder sessions");
                return vec![PLACEHOLDER_SESSION.to_string(); capacity];
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to list existing solver sessions");
                return Vec::new();
            }
        };

        while sessions.len() < capacity {
            match self.create_session().await {
                Ok(session) => {
                    tracing::info!(session = %session, "Created new solver session");
                    sessions.push(session);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create solver session");
                    break;
                }
            }
        }

        sessions
    }

    async fn list_sessions(&self) -> Result<Option<Vec<String>>, SolverError> {
        let (_, reply) = self.send(&SolverCommand::list_sessions()).await?;
        Ok(reply.sessions)
    }

    async fn create_session(&self) -> Result<String, SolverError> {
        let (status, reply) = self.send(&SolverCommand::create_session()).await?;
        let accepted = reply.is_ok() || status.is_success();
        match reply.session {
            Some(session) if accepted => Ok(session),
            _ => Err(SolverError::Backend {
                status: status.as_u16(),
                message: reply.message,
            }),
        }
    }

    async fn send(
        &self,
        command: &SolverCommand<'_>,
    ) -> Result<(StatusCode, SolverReply), SolverError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(command)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    SolverError::Unreachable {
                        reason: e.to_string(),
                    }
                } else {
                    SolverError::Http(e)
                }
            })?;

        let status = response.status();
        let body = response.bytes().await?;
        let reply = serde_json::from_slice::<SolverReply>(&body).map_err(|e| {
            SolverError::InvalidResponse {
                reason: format!("{} reply is not solver JSON: {e}", command.cmd),
            }
        })?;

        Ok((status, reply))
    }

    /// Turns an `ok` reply into a solution, blanking pages that are not HTML.
    fn solution_from_reply(&self, url: &str, reply: SolverReply) -> Result<SolverSolution, SolverError> {
        let page = reply.solution.ok_or_else(|| SolverError::InvalidResponse {
            reason: "ok reply without solution".to_string(),
        })?;

        if page.response.contains(UNDER_ATTACK_MARKER) {
            return Err(SolverError::UnderAttack {
                url: url.to_string(),
            });
        }

        let body = if self.inspector.is_valid_html(&page.response) {
            Bytes::from(page.response)
        } else {
            tracing::warn!(url, "Solver returned invalid HTML response");
            tracing::debug!(url, response = %page.response, "Solver response content");
            Bytes::new()
        };

        let user_agent = Some(page.user_agent).filter(|ua| !ua.is_empty());

        Ok(SolverSolution {
            body,
            cookies: page.cookies,
            user_agent,
        })
    }
}

#[async_trait]
impl ChallengeSolver for ChallengeSolverPool {
    async fn solve(&self, url: &str, attempts: u32) -> Result<SolverSolution, SolverError> {
        let Some(lease) = self.checkout().await? else {
            tracing::debug!(url, "Challenge solver not initiated, returning empty solution");
            return Ok(SolverSolution::default());
        };

        let attempts = attempts.max(1);
        let max_timeout_ms = u64::try_from(self.max_timeout.as_millis()).unwrap_or(u64::MAX);
        let mut attempts_left = attempts;

        loop {
            let command = SolverCommand::get(url, lease.session(), max_timeout_ms);
            let (status, reply) = self.send(&command).await?;

            if reply.is_ok() {
                return self.solution_from_reply(url, reply);
            }

            attempts_left -= 1;
            if status != StatusCode::INTERNAL_SERVER_ERROR {
                return Err(SolverError::Backend {
                    status: status.as_u16(),
                    message: reply.message,
                });
            }
            if attempts_left == 0 {
                return Err(SolverError::RetriesExhausted {
                    attempts,
                    message: reply.message,
                });
            }

            tracing::warn!(
                url,
                session = lease.session(),
                attempts_left,
                "Solver internal server error, retrying"
            );
        }
    }
}
