//! Wire protocol: the JSON message envelope exchanged over a worker's transport.

use serde::{Deserialize, Serialize};

use crate::batch::BatchStatus;
use crate::ids::{BatchId, WorkerId};
use crate::worker::WorkerCapabilities;

/// Per-batch configuration handed to the worker alongside the archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub model: String,
    pub scale: u32,
    pub tile_size: u32,
    pub threads: u32,
    pub gpu_id: Option<u32>,
}

/// Tagged envelope for every message type defined by the transport contract. Workers
/// send `client_hello`, `batch_result`, `heartbeat`, and `pong`; the coordinator sends
/// `server_hello`, `batch_assignment`, `ping`, and `disconnect`. `error` flows both ways.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    ClientHello {
        worker_id: WorkerId,
        public_key: String,
        capabilities: WorkerCapabilities,
        version: String,
    },
    ServerHello {
        status: HandshakeStatus,
        server_public_key: String,
        /// Symmetric session key, OAEP-wrapped with the worker's public key. Absent on
        /// rejection.
        session_key: Option<String>,
        reason: Option<String>,
    },
    BatchAssignment {
        batch_id: BatchId,
        /// Base64-encoded, encrypted archive payload.
        batch_data: String,
        batch_config: BatchConfig,
        nonce: String,
        timestamp: i64,
    },
    BatchResult {
        batch_id: BatchId,
        status: BatchResultStatus,
        /// Base64-encoded, encrypted archive payload, present on success.
        result_data: Option<String>,
        error_message: Option<String>,
        nonce: String,
        timestamp: i64,
    },
    Heartbeat {
        worker_id: WorkerId,
        timestamp: i64,
        client_status: String,
    },
    /// Tells a worker its in-flight batch no longer exists (the owning job was
    /// cancelled). The worker kills the upscaler child process, deletes the batch's
    /// scratch files, and replies with `batch_cancelled`; no `batch_result` is sent.
    CancelBatch {
        batch_id: BatchId,
        reason: String,
    },
    BatchCancelled {
        batch_id: BatchId,
    },
    Ping {
        timestamp: i64,
    },
    Pong {
        timestamp: i64,
    },
    Disconnect {
        reason: String,
    },
    Error {
        code: String,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeStatus {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchResultStatus {
    Completed,
    Failed,
}

impl From<BatchStatus> for BatchResultStatus {
    fn from(status: BatchStatus) -> Self {
        match status {
            BatchStatus::Completed => BatchResultStatus::Completed,
            _ => BatchResultStatus::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_hello_round_trips_through_json() {
        let msg = Message::ClientHello {
            worker_id: WorkerId::new(),
            public_key: "pem-encoded-key".to_string(),
            capabilities: WorkerCapabilities {
                gpu_count: 1,
                gpu_model: None,
                cpu_threads: 8,
                max_tile_size: 128,
            },
            version: "1.0.0".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"client_hello\""));
        let back: Message = serde_json::from_str(&json).unwrap();
        match back {
            Message::ClientHello { version, .. } => assert_eq!(version, "1.0.0"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn batch_result_status_maps_non_completed_to_failed() {
        assert_eq!(
            BatchResultStatus::from(BatchStatus::Timeout),
            BatchResultStatus::Failed
        );
        assert_eq!(
            BatchResultStatus::from(BatchStatus::Completed),
            BatchResultStatus::Completed
        );
    }
}
