//! Holds a session for the duration of one call.

use super::{Session, SessionManager};
use crate::types::{RpcResult, SessionType};
use std::sync::Arc;

/// Keeps a session alive while a call is being served.
///
/// While held, the session only expires after being silent for
/// [`GUARDED_TIMEOUT_FACTOR`](super::GUARDED_TIMEOUT_FACTOR) times its
/// timeout. Dropping the guard refreshes the keep-alive timestamp.
#[derive(Debug)]
pub struct SessionGuard {
    manager: Arc<SessionManager>,
    session: Session,
}

impl SessionGuard {
    /// Validate `uuid` and hold the session.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` when the session is missing or expired.
    pub fn acquire(manager: &Arc<SessionManager>, uuid: &str) -> RpcResult<Self> {
        let session = manager.acquire(uuid)?;
        Ok(Self {
            manager: manager.clone(),
            session,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_type(&self) -> SessionType {
        self.session.session_type
    }

    pub fn is_observing(&self) -> bool {
        self.session.is_observing()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.manager.release(&self.session.uuid);
    }
}
