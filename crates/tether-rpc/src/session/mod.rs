//! Session lifecycle.
//!
//! Sessions are time-limited tokens scoping a client's access tier. The
//! regular slot is exclusive: at most one live regular session exists at a
//! time. Observing sessions form a pool with a shorter timeout.
//!
//! Expiry is evaluated lazily on every access; there is no sweeper task.

mod guard;

pub use guard::SessionGuard;

use crate::types::{RpcResult, ServerConfig, SessionType, Status};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Expiry is stretched by this factor while a call holds the session.
pub const GUARDED_TIMEOUT_FACTOR: u32 = 4;

/// A live session as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub uuid: String,
    pub session_type: SessionType,
}

impl Session {
    pub fn is_observing(&self) -> bool {
        self.session_type == SessionType::Observing
    }
}

#[derive(Debug)]
struct SessionEntry {
    session_type: SessionType,
    timeout: Duration,
    last_keep_alive: Instant,
    /// Calls currently holding a [`SessionGuard`].
    guards: usize,
}

impl SessionEntry {
    fn is_expired(&self, now: Instant) -> bool {
        let limit = if self.guards > 0 {
            self.timeout * GUARDED_TIMEOUT_FACTOR
        } else {
            self.timeout
        };
        now.saturating_duration_since(self.last_keep_alive) > limit
    }
}

/// Issues, validates, renews and revokes sessions.
///
/// # Example
///
/// ```rust
/// use tether_rpc::session::SessionManager;
/// use tether_rpc::types::{ServerConfig, SessionType};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let sessions = SessionManager::new(&ServerConfig::default());
/// let session = sessions.create_session(SessionType::Regular).unwrap();
/// assert!(sessions.check_session(&session.uuid).is_ok());
/// # }
/// ```
#[derive(Debug)]
pub struct SessionManager {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    regular_timeout: Duration,
    observing_timeout: Duration,
}

impl SessionManager {
    pub fn new(config: &ServerConfig) -> Self {
        Self::with_timeouts(config.session_timeout(), config.observing_session_timeout())
    }

    pub fn with_timeouts(regular_timeout: Duration, observing_timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            regular_timeout,
            observing_timeout,
        }
    }

    /// Whether `create_session(session_type)` would currently succeed.
    pub fn ready_for_session(&self, session_type: SessionType) -> bool {
        match session_type {
            SessionType::Invalid => false,
            SessionType::Observing => true,
            SessionType::Regular => !has_live_regular(&self.live_sessions(), None),
        }
    }

    /// Create a new session of the given tier.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for `SessionType::Invalid`, `FailedPrecondition`
    /// if a regular session is requested while another one is live.
    pub fn create_session(&self, session_type: SessionType) -> RpcResult<Session> {
        let timeout = match session_type {
            SessionType::Invalid => {
                return Err(Status::invalid_argument("Cannot create a session of type INVALID"))
            }
            SessionType::Regular => self.regular_timeout,
            SessionType::Observing => self.observing_timeout,
        };

        let mut sessions = self.live_sessions();
        if session_type == SessionType::Regular && has_live_regular(&sessions, None) {
            return Err(Status::failed_precondition(
                "Another regular session is already active",
            ));
        }

        let uuid = Uuid::new_v4().to_string();
        sessions.insert(
            uuid.clone(),
            SessionEntry {
                session_type,
                timeout,
                last_keep_alive: Instant::now(),
                guards: 0,
            },
        );
        info!("Created {} session {}", session_type, uuid);
        Ok(Session { uuid, session_type })
    }

    /// The live session with this uuid, if any.
    pub fn get_session(&self, uuid: &str) -> Option<Session> {
        self.live_sessions().get(uuid).map(|entry| Session {
            uuid: uuid.to_string(),
            session_type: entry.session_type,
        })
    }

    /// Refresh the session's keep-alive timestamp.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` if no live session has this uuid.
    pub fn keep_alive(&self, uuid: &str) -> RpcResult<Session> {
        let mut sessions = self.live_sessions();
        let entry = sessions.get_mut(uuid).ok_or_else(|| {
            Status::failed_precondition(format!("Session '{}' is not valid", uuid))
        })?;
        entry.last_keep_alive = Instant::now();
        debug!("Session {} kept alive", uuid);
        Ok(Session {
            uuid: uuid.to_string(),
            session_type: entry.session_type,
        })
    }

    /// Guard used at the top of every authenticated request.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` when `uuid` is empty, unknown or expired.
    pub fn check_session(&self, uuid: &str) -> RpcResult<Session> {
        check_locked(&mut self.lock(), uuid)
    }

    /// Move a live session to another tier.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` if the session is not live, `InvalidArgument` for
    /// `SessionType::Invalid`, `FailedPrecondition` when promoting to
    /// regular while another regular session is live.
    pub fn change_session(&self, uuid: &str, session_type: SessionType) -> RpcResult<Session> {
        let timeout = match session_type {
            SessionType::Invalid => {
                return Err(Status::invalid_argument("Cannot change a session to type INVALID"))
            }
            SessionType::Regular => self.regular_timeout,
            SessionType::Observing => self.observing_timeout,
        };

        let mut sessions = self.live_sessions();
        if !sessions.contains_key(uuid) {
            return Err(Status::unauthenticated(format!(
                "Session '{}' is not valid",
                uuid
            )));
        }
        if session_type == SessionType::Regular && has_live_regular(&sessions, Some(uuid)) {
            return Err(Status::failed_precondition(
                "Another regular session is already active",
            ));
        }
        if let Some(entry) = sessions.get_mut(uuid) {
            entry.session_type = session_type;
            entry.timeout = timeout;
            entry.last_keep_alive = Instant::now();
        }
        info!("Session {} changed to {}", uuid, session_type);
        Ok(Session {
            uuid: uuid.to_string(),
            session_type,
        })
    }

    /// Destroy a session. Destroying an unknown session is not an error.
    pub fn destroy_session(&self, uuid: &str) {
        match self.lock().remove(uuid) {
            Some(_) => info!("Destroyed session {}", uuid),
            None => warn!("Session '{}' did not exist", uuid),
        }
    }

    /// Number of live sessions.
    pub fn live_count(&self) -> usize {
        self.live_sessions().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Locked session map with expired entries discarded.
    fn live_sessions(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        let mut sessions = self.lock();
        let now = Instant::now();
        sessions.retain(|uuid, entry| {
            let expired = entry.is_expired(now);
            if expired {
                debug!("Discarding expired session {}", uuid);
            }
            !expired
        });
        sessions
    }

    /// Check the session and count one more guard on it, atomically.
    pub(crate) fn acquire(&self, uuid: &str) -> RpcResult<Session> {
        let mut sessions = self.lock();
        let session = check_locked(&mut sessions, uuid)?;
        if let Some(entry) = sessions.get_mut(uuid) {
            entry.guards += 1;
        }
        Ok(session)
    }

    #[cfg(test)]
    fn guards(&self, uuid: &str) -> Option<usize> {
        self.lock().get(uuid).map(|entry| entry.guards)
    }

    pub(crate) fn release(&self, uuid: &str) {
        if let Some(entry) = self.lock().get_mut(uuid) {
            entry.guards = entry.guards.saturating_sub(1);
            entry.last_keep_alive = Instant::now();
        }
    }
}

/// Validate `uuid` against the locked session map, discarding it if it
/// has expired.
fn check_locked(sessions: &mut HashMap<String, SessionEntry>, uuid: &str) -> RpcResult<Session> {
    if uuid.is_empty() {
        return Err(Status::unauthenticated("No session provided"));
    }
    let (session_type, expired) = match sessions.get(uuid) {
        Some(entry) => (entry.session_type, entry.is_expired(Instant::now())),
        None => {
            return Err(Status::unauthenticated(format!(
                "Session '{}' is not valid",
                uuid
            )))
        }
    };
    if expired {
        sessions.remove(uuid);
        info!("Session {} has expired", uuid);
        return Err(Status::unauthenticated(format!(
            "Session '{}' has expired",
            uuid
        )));
    }
    Ok(Session {
        uuid: uuid.to_string(),
        session_type,
    })
}

fn has_live_regular(sessions: &HashMap<String, SessionEntry>, except: Option<&str>) -> bool {
    sessions
        .iter()
        .any(|(uuid, e)| e.session_type == SessionType::Regular && Some(uuid.as_str()) != except)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StatusCode;
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    fn manager() -> SessionManager {
        SessionManager::with_timeouts(Duration::from_millis(500), Duration::from_millis(100))
    }

    #[tokio::test(start_paused = true)]
    async fn test_regular_slot_is_exclusive() {
        let sessions = manager();
        let first = assert_ok!(sessions.create_session(SessionType::Regular));
        assert!(!sessions.ready_for_session(SessionType::Regular));

        let err = assert_err!(sessions.create_session(SessionType::Regular));
        assert_eq!(err.code, StatusCode::FailedPrecondition);
        assert_ok!(sessions.check_session(&first.uuid));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_session_is_replaced() {
        let sessions = manager();
        let first = sessions.create_session(SessionType::Regular).unwrap();

        tokio::time::advance(Duration::from_millis(600)).await;

        assert!(sessions.ready_for_session(SessionType::Regular));
        let second = assert_ok!(sessions.create_session(SessionType::Regular));
        assert_ne!(first.uuid, second.uuid);

        let err = assert_err!(sessions.check_session(&first.uuid));
        assert_eq!(err.code, StatusCode::Unauthenticated);
        assert!(sessions.get_session(&first.uuid).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_extends_lifetime() {
        let sessions = manager();
        let session = sessions.create_session(SessionType::Regular).unwrap();

        for _ in 0..4 {
            tokio::time::advance(Duration::from_millis(300)).await;
            assert_ok!(sessions.keep_alive(&session.uuid));
        }
        assert_ok!(sessions.check_session(&session.uuid));

        tokio::time::advance(Duration::from_millis(501)).await;
        let err = assert_err!(sessions.keep_alive(&session.uuid));
        assert_eq!(err.code, StatusCode::FailedPrecondition);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_session_reasons() {
        let sessions = manager();
        let err = assert_err!(sessions.check_session(""));
        assert_eq!(err, Status::unauthenticated("No session provided"));

        let err = assert_err!(sessions.check_session("unknown"));
        assert_eq!(err.code, StatusCode::Unauthenticated);
        assert!(err.message.contains("not valid"));

        let session = sessions.create_session(SessionType::Observing).unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;
        let err = assert_err!(sessions.check_session(&session.uuid));
        assert!(err.message.contains("expired"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_observing_pool() {
        let sessions = manager();
        let regular = sessions.create_session(SessionType::Regular).unwrap();
        let a = assert_ok!(sessions.create_session(SessionType::Observing));
        let b = assert_ok!(sessions.create_session(SessionType::Observing));
        assert_eq!(sessions.live_count(), 3);
        assert!(sessions.get_session(&a.uuid).unwrap().is_observing());

        sessions.destroy_session(&regular.uuid);
        assert_ok!(sessions.change_session(&b.uuid, SessionType::Regular));
        let err = assert_err!(sessions.change_session(&a.uuid, SessionType::Regular));
        assert_eq!(err.code, StatusCode::FailedPrecondition);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_type_rejected() {
        let sessions = manager();
        let err = assert_err!(sessions.create_session(SessionType::Invalid));
        assert_eq!(err.code, StatusCode::InvalidArgument);
        assert!(!sessions.ready_for_session(SessionType::Invalid));
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_is_idempotent() {
        let sessions = manager();
        let session = sessions.create_session(SessionType::Regular).unwrap();
        sessions.destroy_session(&session.uuid);
        sessions.destroy_session(&session.uuid);
        assert!(sessions.ready_for_session(SessionType::Regular));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_counts_guards_only_on_live_sessions() {
        let sessions = Arc::new(manager());
        let session = sessions.create_session(SessionType::Regular).unwrap();

        let first = assert_ok!(SessionGuard::acquire(&sessions, &session.uuid));
        let second = assert_ok!(SessionGuard::acquire(&sessions, &session.uuid));
        assert_eq!(sessions.guards(&session.uuid), Some(2));
        drop(first);
        drop(second);
        assert_eq!(sessions.guards(&session.uuid), Some(0));

        tokio::time::advance(Duration::from_millis(501)).await;
        let err = assert_err!(SessionGuard::acquire(&sessions, &session.uuid));
        assert!(err.message.contains("expired"));
        assert_eq!(sessions.guards(&session.uuid), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_delays_expiry_and_refreshes() {
        let sessions = Arc::new(manager());
        let session = sessions.create_session(SessionType::Regular).unwrap();

        let guard = assert_ok!(SessionGuard::acquire(&sessions, &session.uuid));
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_ok!(sessions.check_session(&session.uuid));
        drop(guard);

        // Dropping the guard counts as a keep-alive.
        tokio::time::advance(Duration::from_millis(400)).await;
        assert_ok!(sessions.check_session(&session.uuid));

        let guard = SessionGuard::acquire(&sessions, &session.uuid).unwrap();
        tokio::time::advance(Duration::from_millis(2100)).await;
        assert_err!(sessions.check_session(&session.uuid));
        drop(guard);
    }
}
