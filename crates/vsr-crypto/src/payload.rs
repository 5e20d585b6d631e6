//! The encrypted payload envelope exchanged once a session is established: a random
//! anti-replay nonce, a Unix timestamp, and an AES-256-GCM ciphertext.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;

use crate::cipher::{decrypt, encrypt, SESSION_KEY_BYTES};
use crate::error::SessionError;
use crate::replay::ReplayGuard;

pub const REPLAY_NONCE_BYTES: usize = 16;

/// An encrypted, base64-friendly payload ready to embed in a `batch_assignment` or
/// `batch_result` message.
#[derive(Debug, Clone)]
pub struct EncryptedPayload {
    pub replay_nonce: String,
    pub timestamp: i64,
    pub aead_nonce: String,
    pub ciphertext: String,
}

/// Encrypt `plaintext` under `key`, stamping it with a fresh anti-replay nonce and
/// the current Unix time.
pub fn seal(key: &[u8; SESSION_KEY_BYTES], plaintext: &[u8], now: i64) -> Result<EncryptedPayload, SessionError> {
    let mut replay_nonce = [0u8; REPLAY_NONCE_BYTES];
    rand::thread_rng().fill_bytes(&mut replay_nonce);

    let (aead_nonce, ciphertext) = encrypt(key, plaintext)?;

    Ok(EncryptedPayload {
        replay_nonce: BASE64.encode(replay_nonce),
        timestamp: now,
        aead_nonce: BASE64.encode(aead_nonce),
        ciphertext: BASE64.encode(ciphertext),
    })
}

/// Verify the anti-replay nonce/timestamp against `guard` and decrypt under `key`.
pub fn open(
    key: &[u8; SESSION_KEY_BYTES],
    payload: &EncryptedPayload,
    guard: &ReplayGuard,
    now: i64,
) -> Result<Vec<u8>, SessionError> {
    let replay_nonce = BASE64.decode(&payload.replay_nonce)?;
    guard.check_and_record(&replay_nonce, payload.timestamp, now)?;

    let aead_nonce = BASE64.decode(&payload.aead_nonce)?;
    let ciphertext = BASE64.decode(&payload.ciphertext)?;
    decrypt(key, &aead_nonce, &ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::generate_session_key;

    #[test]
    fn seal_then_open_round_trips() {
        let key = generate_session_key();
        let guard = ReplayGuard::new();
        let payload = seal(&key, b"batch payload", 1_700_000_000).unwrap();
        let plaintext = open(&key, &payload, &guard, 1_700_000_000).unwrap();
        assert_eq!(plaintext, b"batch payload");
    }

    #[test]
    fn replayed_payload_is_rejected_on_second_open() {
        let key = generate_session_key();
        let guard = ReplayGuard::new();
        let payload = seal(&key, b"batch payload", 1_700_000_000).unwrap();
        open(&key, &payload, &guard, 1_700_000_000).unwrap();
        assert!(open(&key, &payload, &guard, 1_700_000_001).is_err());
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let key = generate_session_key();
        let guard = ReplayGuard::new();
        let payload = seal(&key, b"batch payload", 1_700_000_000).unwrap();
        assert!(open(&key, &payload, &guard, 1_700_000_000 + 301).is_err());
    }
}
