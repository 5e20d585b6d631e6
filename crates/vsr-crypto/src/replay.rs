//! Anti-replay guard: every decrypted payload carries a 16-byte nonce and a Unix
//! timestamp; a payload is rejected if its nonce has been seen before or its
//! timestamp is older than the replay window.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::SessionError;

pub const REPLAY_WINDOW_SECS: i64 = 300;
pub const SWEEP_INTERVAL_SECS: u64 = 300;

pub struct ReplayGuard {
    seen: Mutex<HashMap<Vec<u8>, i64>>,
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayGuard {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Check and record `nonce`/`timestamp`. Rejects a timestamp older than
    /// [`REPLAY_WINDOW_SECS`] or a nonce already seen within the window.
    pub fn check_and_record(&self, nonce: &[u8], timestamp: i64, now: i64) -> Result<(), SessionError> {
        if (now - timestamp).abs() > REPLAY_WINDOW_SECS {
            return Err(SessionError::StaleTimestamp);
        }

        let mut seen = self.seen.lock().expect("replay guard mutex poisoned");
        if seen.contains_key(nonce) {
            return Err(SessionError::ReplayedNonce);
        }
        seen.insert(nonce.to_vec(), now);
        Ok(())
    }

    /// Purge nonces older than [`REPLAY_WINDOW_SECS`]. Intended to run on a
    /// [`SWEEP_INTERVAL_SECS`] cadence.
    pub fn sweep(&self, now: i64) {
        let mut seen = self.seen.lock().expect("replay guard mutex poisoned");
        seen.retain(|_, recorded_at| now - *recorded_at <= REPLAY_WINDOW_SECS);
    }

    pub fn len(&self) -> usize {
        self.seen.lock().expect("replay guard mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_replayed_nonce() {
        let guard = ReplayGuard::new();
        let nonce = b"0123456789abcdef".to_vec();
        guard.check_and_record(&nonce, 1000, 1000).unwrap();
        assert!(matches!(
            guard.check_and_record(&nonce, 1000, 1001),
            Err(SessionError::ReplayedNonce)
        ));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let guard = ReplayGuard::new();
        let nonce = b"fedcba9876543210".to_vec();
        let result = guard.check_and_record(&nonce, 1000, 1000 + REPLAY_WINDOW_SECS + 1);
        assert!(matches!(result, Err(SessionError::StaleTimestamp)));
    }

    #[test]
    fn sweep_purges_entries_past_the_window() {
        let guard = ReplayGuard::new();
        guard.check_and_record(b"a".as_slice(), 1000, 1000).unwrap();
        guard.sweep(1000 + REPLAY_WINDOW_SECS + 1);
        assert!(guard.is_empty());
    }
}
