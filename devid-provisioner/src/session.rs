//! The session cache: one entry per in-flight provisioning handshake,
//! keyed by an opaque token handed to the client as a cookie.
//!
//! The map and every per-session mutation live behind one `RwLock`, closed
//! over by `advance`, so a lookup-then-mutate sequence can never race with
//! another request for the same token — the map this replaces had no
//! locking at all.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStep {
    Created,
    AwaitingChallenge,
    AwaitingSubmit,
    Completed,
}

impl SessionStep {
    fn next(self) -> Option<SessionStep> {
        match self {
            SessionStep::Created => Some(SessionStep::AwaitingChallenge),
            SessionStep::AwaitingChallenge => Some(SessionStep::AwaitingSubmit),
            SessionStep::AwaitingSubmit => Some(SessionStep::Completed),
            SessionStep::Completed => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionToken(Uuid);

impl SessionToken {
    fn new() -> Self {
        SessionToken(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, SessionError> {
        Uuid::parse_str(s)
            .map(SessionToken)
            .map_err(|_| SessionError::InvalidCookie)
    }
}

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub xname: String,
    pub node_type: String,
    pub expiry: Instant,
    pub step: SessionStep,
    pub nonce: Option<Vec<u8>>,
    pub req_data: Option<Vec<u8>>,
}

pub struct SessionCache {
    sessions: RwLock<HashMap<SessionToken, Session>>,
    lifetime: Duration,
}

impl SessionCache {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            lifetime,
        }
    }

    /// Creates a new session in `Created` state and returns its token.
    pub fn create(&self, xname: String, node_type: String) -> SessionToken {
        let token = SessionToken::new();
        let session = Session {
            xname,
            node_type,
            expiry: Instant::now() + self.lifetime,
            step: SessionStep::Created,
            nonce: None,
            req_data: None,
        };
        self.sessions
            .write()
            .expect("session map lock poisoned")
            .insert(token, session);
        token
    }

    /// Looks the session up, checks it is not expired and is at
    /// `expected_step`, advances it to the next step, and returns a copy of
    /// its state as it was *before* the advance — the caller still needs
    /// e.g. the nonce stored at the step it is leaving. The whole
    /// check-then-mutate sequence runs under one write lock.
    pub fn advance(
        &self,
        token: SessionToken,
        expected_step: SessionStep,
    ) -> Result<Session, SessionError> {
        let mut sessions = self.sessions.write().expect("session map lock poisoned");
        let session = sessions.get_mut(&token).ok_or(SessionError::InvalidCookie)?;

        if Instant::now() >= session.expiry {
            sessions.remove(&token);
            return Err(SessionError::Expired);
        }
        if session.step != expected_step {
            return Err(SessionError::OutOfOrder);
        }

        let before = session.clone();
        if let Some(next) = session.step.next() {
            session.step = next;
        }
        Ok(before)
    }

    /// Stores the nonce and raw request bytes produced while handling
    /// `RequestChallenge`, for `SubmitChallenge` to compare against later.
    pub fn set_challenge_state(
        &self,
        token: SessionToken,
        nonce: Vec<u8>,
        req_data: Vec<u8>,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().expect("session map lock poisoned");
        let session = sessions.get_mut(&token).ok_or(SessionError::InvalidCookie)?;
        session.nonce = Some(nonce);
        session.req_data = Some(req_data);
        Ok(())
    }

    pub fn remove(&self, token: SessionToken) {
        self.sessions
            .write()
            .expect("session map lock poisoned")
            .remove(&token);
    }

    /// Drops every session past its expiry. Intended to run on a timer;
    /// callers own the scheduling.
    pub fn reap_expired(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().expect("session map lock poisoned");
        let before = sessions.len();
        sessions.retain(|_, session| session.expiry > now);
        before - sessions.len()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sessions.read().expect("session map lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_enforces_step_order() {
        let cache = SessionCache::new(Duration::from_secs(120));
        let token = cache.create("x1000c0s0b0n0".into(), "compute".into());

        assert!(cache.advance(token, SessionStep::Created).is_ok());
        assert_eq!(
            cache.advance(token, SessionStep::Created).unwrap_err(),
            SessionError::OutOfOrder
        );
        assert!(cache.advance(token, SessionStep::AwaitingChallenge).is_ok());
        assert!(cache.advance(token, SessionStep::AwaitingSubmit).is_ok());
    }

    #[test]
    fn advance_rejects_unknown_token() {
        let cache = SessionCache::new(Duration::from_secs(120));
        let token = SessionToken::new();
        assert_eq!(
            cache.advance(token, SessionStep::Created).unwrap_err(),
            SessionError::InvalidCookie
        );
    }

    #[test]
    fn advance_rejects_expired_session_and_removes_it() {
        let cache = SessionCache::new(Duration::from_millis(1));
        let token = cache.create("x1000c0s0b0n0".into(), "compute".into());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(
            cache.advance(token, SessionStep::Created).unwrap_err(),
            SessionError::Expired
        );
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn reap_expired_only_removes_expired_sessions() {
        let cache = SessionCache::new(Duration::from_millis(1));
        let live = cache.create("alive".into(), "compute".into());
        std::thread::sleep(Duration::from_millis(5));
        let _fresh_cache_len_check = live;
        assert_eq!(cache.reap_expired(), 1);
        assert_eq!(cache.len(), 0);
    }
}
