//! Session Layer: establishes and maintains a per-worker secure channel over an
//! untrusted WAN — RSA-OAEP handshake, AES-256-GCM payload encryption, anti-replay,
//! and PSS signing.

pub mod cipher;
pub mod error;
pub mod keys;
pub mod payload;
pub mod replay;
pub mod session;

pub use cipher::{decrypt, encrypt, generate_session_key, SESSION_KEY_BYTES};
pub use error::SessionError;
pub use keys::{encrypt_oaep, parse_public_key_pem, verify, Keypair, RSA_KEY_BITS};
pub use payload::{open, seal, EncryptedPayload, REPLAY_NONCE_BYTES};
pub use replay::{ReplayGuard, REPLAY_WINDOW_SECS, SWEEP_INTERVAL_SECS};
pub use session::{Session, SessionStore, MAX_SESSIONS, SESSION_TTL_HOURS};
