//! Errors surfaced by the Session Layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no session exists for worker {0}")]
    NoSession(String),

    #[error("session for worker {0} has expired")]
    Expired(String),

    #[error("rsa key error: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("rsa pkcs8 error: {0}")]
    Pkcs8(String),

    #[error("signature error: {0}")]
    Signature(String),

    #[error("aead encrypt/decrypt failure: tampered or invalid ciphertext")]
    SecurityViolation,

    #[error("replayed or expired nonce")]
    ReplayedNonce,

    #[error("payload timestamp is stale")]
    StaleTimestamp,

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("malformed payload: {0}")]
    Malformed(String),
}
