//! Per-worker session key store: independent of a worker's connection state so that
//! reconnects within the expiry window resume without a fresh handshake.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};

use crate::cipher::SESSION_KEY_BYTES;
use crate::error::SessionError;

/// Sessions expire 24h after creation, sliding forward on each successful access.
pub const SESSION_TTL_HOURS: i64 = 24;

/// Bounded cache size; the oldest session is evicted when a new one would exceed it.
pub const MAX_SESSIONS: usize = 100;

#[derive(Clone)]
pub struct Session {
    pub key: [u8; SESSION_KEY_BYTES],
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    fn new(key: [u8; SESSION_KEY_BYTES]) -> Self {
        let now = Utc::now();
        Self {
            key,
            created_at: now,
            expires_at: now + Duration::hours(SESSION_TTL_HOURS),
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// In-memory, bounded store of active per-worker session keys.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create (or replace) a session for `worker_id`, evicting the oldest session
    /// first if the store is at capacity.
    pub fn create_session(&self, worker_id: impl Into<String>, key: [u8; SESSION_KEY_BYTES]) {
        let worker_id = worker_id.into();
        let mut sessions = self.sessions.write().expect("session store poisoned");
        if sessions.len() >= MAX_SESSIONS && !sessions.contains_key(&worker_id) {
            if let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, s)| s.created_at)
                .map(|(id, _)| id.clone())
            {
                sessions.remove(&oldest);
            }
        }
        sessions.insert(worker_id, Session::new(key));
    }

    /// Fetch the session key for `worker_id`, lazily evicting and returning
    /// [`SessionError::Expired`] if it has aged out. Sliding window: a successful
    /// access extends the session's expiry another [`SESSION_TTL_HOURS`].
    pub fn get_and_touch(&self, worker_id: &str) -> Result<[u8; SESSION_KEY_BYTES], SessionError> {
        let mut sessions = self.sessions.write().expect("session store poisoned");
        let now = Utc::now();

        let expired = match sessions.get(worker_id) {
            Some(session) => session.is_expired(now),
            None => return Err(SessionError::NoSession(worker_id.to_string())),
        };

        if expired {
            sessions.remove(worker_id);
            return Err(SessionError::Expired(worker_id.to_string()));
        }

        let session = sessions.get_mut(worker_id).expect("checked above");
        session.expires_at = now + Duration::hours(SESSION_TTL_HOURS);
        Ok(session.key)
    }

    pub fn remove(&self, worker_id: &str) {
        self.sessions
            .write()
            .expect("session store poisoned")
            .remove(worker_id);
    }

    pub fn len(&self) -> usize {
        self.sessions.read().expect("session store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::generate_session_key;

    #[test]
    fn get_and_touch_returns_the_stored_key() {
        let store = SessionStore::new();
        let key = generate_session_key();
        store.create_session("worker-1", key);
        let fetched = store.get_and_touch("worker-1").unwrap();
        assert_eq!(fetched, key);
    }

    #[test]
    fn unknown_worker_has_no_session() {
        let store = SessionStore::new();
        assert!(matches!(
            store.get_and_touch("ghost"),
            Err(SessionError::NoSession(_))
        ));
    }

    #[test]
    fn eviction_drops_oldest_when_at_capacity() {
        let store = SessionStore::new();
        for i in 0..MAX_SESSIONS {
            store.create_session(format!("worker-{i}"), generate_session_key());
        }
        assert_eq!(store.len(), MAX_SESSIONS);
        store.create_session("worker-new", generate_session_key());
        assert_eq!(store.len(), MAX_SESSIONS);
        assert!(store.get_and_touch("worker-new").is_ok());
    }
}
