//! Batch lifecycle: decrypt an assignment, run the upscaler, encrypt the result.
//!
//! Scratch directories are always removed once a batch finishes, whether it
//! succeeded or failed.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vsr_core::{BatchConfig, BatchId, BatchResultStatus, Message};
use vsr_crypto::{EncryptedPayload, ReplayGuard, SessionError, SESSION_KEY_BYTES};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::upscaler;

/// What a batch settled to once [`process_batch`] returns. `Cancelled` means the
/// caller should send `batch_cancelled` instead of `batch_result` — the batch was
/// withdrawn by the coordinator mid-processing, not failed by the worker.
pub enum Outcome {
    Settled(Message),
    Cancelled,
}

/// Decrypt, upscale, and re-encrypt one batch assignment. Never propagates an error:
/// any non-cancellation failure along the way is folded into a `Failed` `batch_result`
/// so the caller can always just forward it. The batch's scratch directory is always
/// removed, whether it succeeded, failed, or was cancelled.
pub async fn process_batch(
    config: &WorkerConfig,
    session_key: [u8; SESSION_KEY_BYTES],
    replay_guard: &ReplayGuard,
    batch_id: BatchId,
    batch_data: String,
    batch_config: BatchConfig,
    nonce: String,
    timestamp: i64,
    cancel: CancellationToken,
) -> Outcome {
    let scratch = PathBuf::from(&config.work_dir).join("batches").join(batch_id.as_str());

    let outcome = run_batch(
        config,
        &session_key,
        replay_guard,
        &scratch,
        &batch_data,
        &batch_config,
        nonce,
        timestamp,
        &cancel,
    )
    .await;

    let _ = tokio::fs::remove_dir_all(&scratch).await;

    match outcome {
        Ok((nonce, timestamp, result_data)) => Outcome::Settled(Message::BatchResult {
            batch_id,
            status: BatchResultStatus::Completed,
            result_data: Some(result_data),
            error_message: None,
            nonce,
            timestamp,
        }),
        Err(WorkerError::Cancelled) => {
            info!(%batch_id, "batch processing cancelled, scratch files removed");
            Outcome::Cancelled
        }
        Err(e) => {
            warn!(%batch_id, error = %e, "batch processing failed");
            Outcome::Settled(Message::BatchResult {
                batch_id,
                status: BatchResultStatus::Failed,
                result_data: None,
                error_message: Some(e.to_string()),
                nonce: String::new(),
                timestamp: Utc::now().timestamp(),
            })
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_batch(
    config: &WorkerConfig,
    session_key: &[u8; SESSION_KEY_BYTES],
    replay_guard: &ReplayGuard,
    scratch: &Path,
    batch_data: &str,
    batch_config: &BatchConfig,
    nonce: String,
    timestamp: i64,
    cancel: &CancellationToken,
) -> WorkerResult<(String, i64, String)> {
    let input_dir = scratch.join("input");
    let output_dir = scratch.join("output");
    tokio::fs::create_dir_all(&input_dir).await?;

    let payload = decode_envelope(nonce, timestamp, batch_data)?;
    let plaintext = vsr_crypto::open(session_key, &payload, replay_guard, Utc::now().timestamp())?;

    let archive_path = scratch.join("input.zip");
    tokio::fs::write(&archive_path, &plaintext).await?;

    let unpack_input = input_dir.clone();
    let unpack_archive = archive_path.clone();
    let produced = tokio::task::spawn_blocking(move || vsr_media::unpack(&unpack_archive, &unpack_input))
        .await
        .map_err(|e| WorkerError::upscaler_failed(e.to_string()))??;
    let _ = tokio::fs::remove_file(&archive_path).await;

    if cancel.is_cancelled() {
        return Err(WorkerError::Cancelled);
    }

    upscaler::run_with_fallback(
        &config.upscaler_binary,
        batch_config,
        &input_dir,
        &output_dir,
        config.batch_timeout,
        produced.len(),
        cancel,
    )
    .await?;

    let result_archive = scratch.join("output.zip");
    let pack_output = output_dir.clone();
    let pack_archive = result_archive.clone();
    tokio::task::spawn_blocking(move || vsr_media::pack(&pack_output, &pack_archive))
        .await
        .map_err(|e| WorkerError::upscaler_failed(e.to_string()))??;

    let bytes = tokio::fs::read(&result_archive).await?;
    let sealed = vsr_crypto::seal(session_key, &bytes, Utc::now().timestamp())?;
    Ok(encode_envelope(sealed))
}

/// Mirrors `vsr-coordinator`'s envelope bridging: the flat `nonce`/`timestamp`/opaque
/// string fields on [`Message`] variants carry the 4-field [`EncryptedPayload`].
fn encode_envelope(payload: EncryptedPayload) -> (String, i64, String) {
    let data = serde_json::json!({
        "aead_nonce": payload.aead_nonce,
        "ciphertext": payload.ciphertext,
    })
    .to_string();
    (payload.replay_nonce, payload.timestamp, data)
}

fn decode_envelope(nonce: String, timestamp: i64, data: &str) -> Result<EncryptedPayload, SessionError> {
    let value: serde_json::Value =
        serde_json::from_str(data).map_err(|_| SessionError::Malformed("envelope is not JSON".to_string()))?;
    let aead_nonce = value
        .get("aead_nonce")
        .and_then(|v| v.as_str())
        .ok_or_else(|| SessionError::Malformed("envelope missing aead_nonce".to_string()))?
        .to_string();
    let ciphertext = value
        .get("ciphertext")
        .and_then(|v| v.as_str())
        .ok_or_else(|| SessionError::Malformed("envelope missing ciphertext".to_string()))?
        .to_string();
    Ok(EncryptedPayload {
        replay_nonce: nonce,
        timestamp,
        aead_nonce,
        ciphertext,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_through_encode_decode() {
        let key = vsr_crypto::generate_session_key();
        let sealed = vsr_crypto::seal(&key, b"frame bytes", 1_700_000_000).unwrap();
        let (nonce, timestamp, data) = encode_envelope(sealed);
        let decoded = decode_envelope(nonce, timestamp, &data).unwrap();
        let guard = ReplayGuard::new();
        let plaintext = vsr_crypto::open(&key, &decoded, &guard, 1_700_000_000).unwrap();
        assert_eq!(plaintext, b"frame bytes");
    }

    #[test]
    fn decode_envelope_rejects_malformed_json() {
        assert!(decode_envelope("n".to_string(), 0, "not json").is_err());
    }
}
