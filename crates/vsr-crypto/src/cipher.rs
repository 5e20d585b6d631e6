//! AES-256-GCM authenticated encryption for session payloads.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use crate::error::SessionError;

pub const SESSION_KEY_BYTES: usize = 32;

/// Generate a fresh 256-bit symmetric session key.
pub fn generate_session_key() -> [u8; SESSION_KEY_BYTES] {
    let key = Aes256Gcm::generate_key(OsRng);
    key.into()
}

/// Encrypt `plaintext` under `key`, returning the AEAD nonce (12 bytes) and
/// ciphertext (with authentication tag appended).
pub fn encrypt(key: &[u8; SESSION_KEY_BYTES], plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>), SessionError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| SessionError::SecurityViolation)?;
    Ok((nonce.to_vec(), ciphertext))
}

/// Decrypt `ciphertext` under `key` and `nonce`. Any authentication failure (tampered
/// ciphertext, wrong key, wrong nonce) surfaces as [`SessionError::SecurityViolation`].
pub fn decrypt(
    key: &[u8; SESSION_KEY_BYTES],
    nonce: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, SessionError> {
    if nonce.len() != 12 {
        return Err(SessionError::Malformed("aead nonce must be 12 bytes".to_string()));
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(nonce);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| SessionError::SecurityViolation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_plaintext() {
        let key = generate_session_key();
        let (nonce, ciphertext) = encrypt(&key, b"batch payload bytes").unwrap();
        let plaintext = decrypt(&key, &nonce, &ciphertext).unwrap();
        assert_eq!(plaintext, b"batch payload bytes");
    }

    #[test]
    fn rejects_tampered_ciphertext() {
        let key = generate_session_key();
        let (nonce, mut ciphertext) = encrypt(&key, b"batch payload bytes").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xFF;
        assert!(decrypt(&key, &nonce, &ciphertext).is_err());
    }

    #[test]
    fn rejects_wrong_key() {
        let key = generate_session_key();
        let other_key = generate_session_key();
        let (nonce, ciphertext) = encrypt(&key, b"batch payload bytes").unwrap();
        assert!(decrypt(&other_key, &nonce, &ciphertext).is_err());
    }
}
