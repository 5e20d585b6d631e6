//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to connect to coordinator: {0}")]
    ConnectFailed(String),

    #[error("handshake rejected by coordinator: {0}")]
    HandshakeRejected(String),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("upscaler binary not found: {0}")]
    UpscalerNotFound(String),

    #[error("upscaler process failed: {0}")]
    UpscalerFailed(String),

    #[error("upscaler timed out after {0} seconds")]
    UpscalerTimeout(u64),

    #[error("batch was cancelled")]
    Cancelled,

    #[error("session error: {0}")]
    Session(#[from] vsr_crypto::SessionError),

    #[error("media error: {0}")]
    Media(#[from] vsr_media::MediaError),

    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("malformed message: {0}")]
    MalformedMessage(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn connect_failed(msg: impl Into<String>) -> Self {
        Self::ConnectFailed(msg.into())
    }

    pub fn handshake_rejected(msg: impl Into<String>) -> Self {
        Self::HandshakeRejected(msg.into())
    }

    pub fn handshake_failed(msg: impl Into<String>) -> Self {
        Self::HandshakeFailed(msg.into())
    }

    pub fn upscaler_failed(msg: impl Into<String>) -> Self {
        Self::UpscalerFailed(msg.into())
    }

    /// Whether the connection-level failure should trigger a reconnect-with-backoff
    /// rather than terminating the worker process.
    pub fn is_reconnectable(&self) -> bool {
        matches!(
            self,
            WorkerError::ConnectFailed(_) | WorkerError::Transport(_) | WorkerError::HandshakeFailed(_)
        )
    }
}
