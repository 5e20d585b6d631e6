//! The per-worker WebSocket handler: handshake, batch dispatch, and result intake.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message as WsFrame, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, info, warn};

use vsr_core::{BatchConfig, BatchId, HandshakeStatus, Message, WorkerCapabilities, WorkerId, WorkerStatus};
use vsr_crypto::{EncryptedPayload, SessionError};
use vsr_scheduler::SchedulerEvent;

use crate::metrics;
use crate::state::AppState;

static ACTIVE_WORKER_CONNECTIONS: AtomicI64 = AtomicI64::new(0);

const WS_SEND_BUFFER_SIZE: usize = 32;
const WS_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const WS_HELLO_TIMEOUT: Duration = Duration::from_secs(60);

/// Upgrade a worker's transport connection and run its lifetime loop.
pub async fn ws_worker(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let count = ACTIVE_WORKER_CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
    metrics::set_ws_active_connections(count);
    metrics::record_ws_connection();

    ws.on_upgrade(move |socket| async move {
        handle_worker_socket(socket, state, addr).await;
        let count = ACTIVE_WORKER_CONNECTIONS.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_ws_active_connections(count);
    })
}

async fn send_ws_message(tx: &mpsc::Sender<WsFrame>, msg: &Message) -> bool {
    let json = match serde_json::to_string(msg) {
        Ok(j) => j,
        Err(_) => return false,
    };
    match tx.try_send(WsFrame::Text(json.clone())) {
        Ok(_) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            debug!("worker send buffer full, applying backpressure");
            tx.send(WsFrame::Text(json)).await.is_ok()
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

async fn handle_worker_socket(socket: WebSocket, state: AppState, addr: SocketAddr) {
    let (ws_sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<WsFrame>(WS_SEND_BUFFER_SIZE);

    let send_task = tokio::spawn(async move {
        let mut ws_sender = ws_sender;
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let worker_id = match perform_handshake(&state, &tx, &mut receiver, addr).await {
        Some(id) => id,
        None => {
            drop(tx);
            let _ = send_task.await;
            return;
        }
    };

    run_worker_loop(&state, &worker_id, &tx, &mut receiver).await;

    let _ = state
        .store
        .set_worker_status(&worker_id, WorkerStatus::Disconnected)
        .await;
    state.scheduler.on_worker_disconnected(&worker_id).await;

    drop(tx);
    let _ = send_task.await;
    info!(worker_id = %worker_id, "worker connection closed");
}

/// Wait for `client_hello`, establish or resume a session, and reply with
/// `server_hello`. Returns `None` (connection already torn down) on any handshake
/// failure.
async fn perform_handshake(
    state: &AppState,
    tx: &mpsc::Sender<WsFrame>,
    receiver: &mut SplitStream<WebSocket>,
    addr: SocketAddr,
) -> Option<WorkerId> {
    let first = tokio::time::timeout(WS_HELLO_TIMEOUT, receiver.next()).await;
    let text = match first {
        Ok(Some(Ok(WsFrame::Text(text)))) => text,
        _ => {
            let _ = send_ws_message(tx, &Message::Error {
                code: "handshake_timeout".to_string(),
                message: "expected client_hello".to_string(),
            })
            .await;
            return None;
        }
    };

    let hello: Message = match serde_json::from_str(&text) {
        Ok(m) => m,
        Err(e) => {
            let _ = send_ws_message(tx, &Message::Error {
                code: "malformed_hello".to_string(),
                message: e.to_string(),
            })
            .await;
            return None;
        }
    };

    let (worker_id, public_key_pem, capabilities) = match hello {
        Message::ClientHello {
            worker_id,
            public_key,
            capabilities,
            ..
        } => (worker_id, public_key, capabilities),
        _ => {
            let _ = send_ws_message(tx, &Message::Error {
                code: "protocol_violation".to_string(),
                message: "expected client_hello as the first message".to_string(),
            })
            .await;
            return None;
        }
    };

    let worker_public_key = match vsr_crypto::parse_public_key_pem(&public_key_pem) {
        Ok(k) => k,
        Err(e) => {
            reject(tx, format!("invalid public key: {e}")).await;
            return None;
        }
    };

    let session_key = match state.sessions.get_and_touch(worker_id.as_str()) {
        Ok(key) => key,
        Err(_) => {
            let key = vsr_crypto::generate_session_key();
            state.sessions.create_session(worker_id.as_str(), key);
            key
        }
    };

    let wrapped_key = match vsr_crypto::encrypt_oaep(&worker_public_key, &session_key) {
        Ok(bytes) => base64_encode(&bytes),
        Err(e) => {
            reject(tx, format!("failed to wrap session key: {e}")).await;
            return None;
        }
    };

    let server_public_key = match state.keypair.public_key_pem() {
        Ok(pem) => pem,
        Err(e) => {
            reject(tx, format!("server key export failed: {e}")).await;
            return None;
        }
    };

    if state.store.get_worker(&worker_id).await.is_err() {
        state
            .store
            .register_worker(worker_id.clone(), addr.to_string(), capabilities)
            .await;
    } else {
        let _ = state.store.touch_worker(&worker_id).await;
    }
    let _ = state
        .store
        .set_worker_status(&worker_id, WorkerStatus::Connected)
        .await;

    let accepted = send_ws_message(
        tx,
        &Message::ServerHello {
            status: HandshakeStatus::Accepted,
            server_public_key,
            session_key: Some(wrapped_key),
            reason: None,
        },
    )
    .await;

    if !accepted {
        return None;
    }

    info!(worker_id = %worker_id, %addr, "worker handshake accepted");
    Some(worker_id)
}

async fn reject(tx: &mpsc::Sender<WsFrame>, reason: String) {
    warn!(reason = %reason, "rejecting worker handshake");
    let _ = send_ws_message(
        tx,
        &Message::ServerHello {
            status: HandshakeStatus::Rejected,
            server_public_key: String::new(),
            session_key: None,
            reason: Some(reason),
        },
    )
    .await;
}

/// Drive the steady-state protocol for one worker: dispatch assignments pushed by the
/// Scheduler, answer heartbeats, and settle batch results.
async fn run_worker_loop(
    state: &AppState,
    worker_id: &WorkerId,
    tx: &mpsc::Sender<WsFrame>,
    receiver: &mut SplitStream<WebSocket>,
) {
    let mut events_rx = state.scheduler.events().subscribe();
    let mut heartbeat = interval(WS_HEARTBEAT_INTERVAL);
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            event = events_rx.recv() => {
                match event {
                    Ok(SchedulerEvent::BatchAssigned { batch_id, worker_id: target }) if target == *worker_id => {
                        if let Err(e) = dispatch_batch(state, worker_id, &batch_id, tx, false).await {
                            warn!(worker_id = %worker_id, %batch_id, error = %e, "failed to dispatch batch");
                        }
                    }
                    Ok(SchedulerEvent::DuplicateCreated { duplicate, worker_id: target, .. }) if target == *worker_id => {
                        if let Err(e) = dispatch_batch(state, worker_id, &duplicate, tx, true).await {
                            warn!(worker_id = %worker_id, batch_id = %duplicate, error = %e, "failed to dispatch duplicate batch");
                        }
                    }
                    Ok(SchedulerEvent::BatchCancelled { batch_id, worker_id: target }) if target == *worker_id => {
                        let msg = Message::CancelBatch {
                            batch_id: batch_id.clone(),
                            reason: "job cancelled".to_string(),
                        };
                        if !send_ws_message(tx, &msg).await {
                            warn!(worker_id = %worker_id, %batch_id, "failed to send cancel_batch, worker disconnected");
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(worker_id = %worker_id, skipped, "worker event subscription lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = heartbeat.tick() => {
                let ping = Message::Ping { timestamp: Utc::now().timestamp() };
                if !send_ws_message(tx, &ping).await {
                    warn!(worker_id = %worker_id, "heartbeat send failed, worker disconnected");
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(WsFrame::Text(text))) => {
                        last_activity = Instant::now();
                        match serde_json::from_str::<Message>(&text) {
                            Ok(msg) => {
                                metrics::record_ws_message_received(message_kind(&msg));
                                if !handle_incoming(state, worker_id, msg).await {
                                    break;
                                }
                            }
                            Err(e) => warn!(worker_id = %worker_id, error = %e, "malformed message from worker"),
                        }
                    }
                    Some(Ok(WsFrame::Close(_))) | None => {
                        info!(worker_id = %worker_id, "worker closed connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(worker_id = %worker_id, error = %e, "transport error");
                        break;
                    }
                }
            }
        }

        if last_activity.elapsed() > WS_HEARTBEAT_INTERVAL * 3 {
            warn!(worker_id = %worker_id, "worker missed heartbeats, closing connection");
            break;
        }
    }
}

fn message_kind(msg: &Message) -> &'static str {
    match msg {
        Message::ClientHello { .. } => "client_hello",
        Message::ServerHello { .. } => "server_hello",
        Message::BatchAssignment { .. } => "batch_assignment",
        Message::BatchResult { .. } => "batch_result",
        Message::CancelBatch { .. } => "cancel_batch",
        Message::BatchCancelled { .. } => "batch_cancelled",
        Message::Heartbeat { .. } => "heartbeat",
        Message::Ping { .. } => "ping",
        Message::Pong { .. } => "pong",
        Message::Disconnect { .. } => "disconnect",
        Message::Error { .. } => "error",
    }
}

/// Handle one decoded message from the worker. Returns `false` when the connection
/// should be torn down.
async fn handle_incoming(state: &AppState, worker_id: &WorkerId, msg: Message) -> bool {
    match msg {
        Message::Heartbeat { .. } => {
            let _ = state.store.touch_worker(worker_id).await;
            true
        }
        Message::Pong { .. } => true,
        Message::BatchResult {
            batch_id,
            status,
            result_data,
            error_message,
            nonce,
            timestamp,
        } => {
            settle_batch_result(state, worker_id, batch_id, status, result_data, error_message, nonce, timestamp)
                .await;
            true
        }
        Message::Disconnect { reason } => {
            info!(worker_id = %worker_id, reason, "worker requested disconnect");
            false
        }
        Message::Error { code, message } => {
            warn!(worker_id = %worker_id, code, message, "worker reported error");
            true
        }
        Message::BatchCancelled { batch_id } => {
            info!(worker_id = %worker_id, %batch_id, "worker acknowledged batch cancellation");
            true
        }
        Message::ClientHello { .. }
        | Message::ServerHello { .. }
        | Message::BatchAssignment { .. }
        | Message::CancelBatch { .. }
        | Message::Ping { .. } => {
            warn!(worker_id = %worker_id, "unexpected message direction");
            true
        }
    }
}

async fn settle_batch_result(
    state: &AppState,
    worker_id: &WorkerId,
    batch_id: BatchId,
    status: vsr_core::BatchResultStatus,
    result_data: Option<String>,
    error_message: Option<String>,
    nonce: String,
    timestamp: i64,
) {
    use vsr_core::BatchResultStatus;

    if status == BatchResultStatus::Failed {
        metrics::record_batch_failed();
        match state
            .store
            .fail_batch(&batch_id, worker_id, error_message.unwrap_or_else(|| "unspecified failure".to_string()))
            .await
        {
            Ok(will_retry) => state.scheduler.on_batch_failed(batch_id, !will_retry).await,
            Err(e) => warn!(worker_id = %worker_id, %batch_id, error = %e, "failed to record batch failure"),
        }
        return;
    }

    let Some(result_data) = result_data else {
        warn!(worker_id = %worker_id, %batch_id, "batch_result completed with no result_data");
        return;
    };

    let session_key = match state.sessions.get_and_touch(worker_id.as_str()) {
        Ok(key) => key,
        Err(e) => {
            metrics::record_security_violation();
            warn!(worker_id = %worker_id, %batch_id, error = %e, "no valid session for batch result");
            if let Ok(will_retry) = state.store.fail_batch(&batch_id, worker_id, "session invalid").await {
                state.scheduler.on_batch_failed(batch_id, !will_retry).await;
            }
            return;
        }
    };

    let payload = match decode_envelope(nonce, timestamp, &result_data) {
        Ok(p) => p,
        Err(e) => {
            metrics::record_security_violation();
            warn!(worker_id = %worker_id, %batch_id, error = %e, "malformed batch result envelope");
            return;
        }
    };

    let plaintext = match vsr_crypto::open(&session_key, &payload, &state.replay_guard, Utc::now().timestamp()) {
        Ok(bytes) => bytes,
        Err(e) => {
            metrics::record_security_violation();
            warn!(worker_id = %worker_id, %batch_id, error = %e, "batch result failed session verification");
            if let Ok(will_retry) = state.store.fail_batch(&batch_id, worker_id, e.to_string()).await {
                state.scheduler.on_batch_failed(batch_id, !will_retry).await;
            }
            return;
        }
    };

    let batch = match state.store.get_batch(&batch_id).await {
        Ok(b) => b,
        Err(e) => {
            warn!(%batch_id, error = %e, "batch result for unknown batch");
            return;
        }
    };

    let extract_dir = PathBuf::from(&state.config.work_dir)
        .join("jobs")
        .join(batch.job_id.as_str())
        .join("batches")
        .join(format!("{}_result", batch_id.as_str()));
    let archive_path = extract_dir.with_extension("zip");

    if let Err(e) = tokio::fs::write(&archive_path, &plaintext).await {
        warn!(%batch_id, error = %e, "failed to stage result archive");
        return;
    }

    let unpack_dir = extract_dir.clone();
    let unpack_archive = archive_path.clone();
    let unpacked = tokio::task::spawn_blocking(move || vsr_media::unpack(&unpack_archive, &unpack_dir)).await;
    let _ = tokio::fs::remove_file(&archive_path).await;

    let produced = match unpacked {
        Ok(Ok(files)) => files,
        Ok(Err(e)) => {
            warn!(%batch_id, error = %e, "failed to unpack result archive");
            return;
        }
        Err(e) => {
            warn!(%batch_id, error = %e, "result unpack task panicked");
            return;
        }
    };

    let final_dir = PathBuf::from(&state.config.work_dir)
        .join("jobs")
        .join(batch.job_id.as_str())
        .join("upscaled_final");
    if let Err(e) = tokio::fs::create_dir_all(&final_dir).await {
        warn!(%batch_id, error = %e, "failed to create upscaled_final directory");
        return;
    }
    for file in &produced {
        if let Some(name) = file.file_name() {
            let _ = tokio::fs::copy(file, final_dir.join(name)).await;
        }
    }
    let _ = tokio::fs::remove_dir_all(&extract_dir).await;

    let processing_secs = batch
        .started_at
        .map(|started| (Utc::now() - started).num_milliseconds() as f64 / 1000.0)
        .unwrap_or(0.0);

    match state
        .store
        .complete_batch(&batch_id, worker_id, batch.frame_count(), processing_secs)
        .await
    {
        Ok(()) => {
            metrics::record_batch_completed(processing_secs);
            state.scheduler.on_batch_completed(batch_id, batch.job_id).await;
        }
        Err(vsr_store::StoreError::AlreadySettled(_)) => {
            debug!(%batch_id, "duplicate batch result arrived after the race was settled");
        }
        Err(vsr_store::StoreError::StaleResult(_)) => {
            debug!(%batch_id, "batch result arrived after cancellation or reassignment, dropping");
        }
        Err(e) => warn!(%batch_id, error = %e, "failed to record batch completion"),
    }
}

/// Pack a batch's input directory, encrypt it, and push `batch_assignment` over the
/// worker's send channel.
async fn dispatch_batch(
    state: &AppState,
    worker_id: &WorkerId,
    batch_id: &BatchId,
    tx: &mpsc::Sender<WsFrame>,
    is_duplicate: bool,
) -> Result<(), String> {
    let batch = state.store.get_batch(batch_id).await.map_err(|e| e.to_string())?;
    state.store.start_batch(batch_id).await.map_err(|e| e.to_string())?;

    let worker = state.store.get_worker(worker_id).await.map_err(|e| e.to_string())?;

    let archive_path = PathBuf::from(&batch.directory).with_extension("dispatch.zip");
    let source_dir = PathBuf::from(&batch.directory);
    let pack_path = archive_path.clone();
    tokio::task::spawn_blocking(move || vsr_media::pack(&source_dir, &pack_path))
        .await
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())?;

    let bytes = tokio::fs::read(&archive_path).await.map_err(|e| e.to_string())?;
    let _ = tokio::fs::remove_file(&archive_path).await;

    let session_key = state
        .sessions
        .get_and_touch(worker_id.as_str())
        .map_err(|e| e.to_string())?;

    let payload = vsr_crypto::seal(&session_key, &bytes, Utc::now().timestamp()).map_err(|e| e.to_string())?;
    let (nonce, timestamp, batch_data) = encode_envelope(payload);

    let batch_config = batch_config_for(&worker.capabilities);

    let msg = Message::BatchAssignment {
        batch_id: batch_id.clone(),
        batch_data,
        batch_config,
        nonce,
        timestamp,
    };

    if !send_ws_message(tx, &msg).await {
        return Err("send channel closed".to_string());
    }

    metrics::record_batch_assigned(is_duplicate);
    info!(worker_id = %worker_id, %batch_id, is_duplicate, "batch dispatched");
    Ok(())
}

fn batch_config_for(caps: &WorkerCapabilities) -> BatchConfig {
    BatchConfig {
        model: "realesrgan-x4plus".to_string(),
        scale: 4,
        tile_size: caps.max_tile_size,
        threads: caps.cpu_threads,
        gpu_id: if caps.gpu_count > 0 { Some(0) } else { None },
    }
}

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

fn base64_encode(bytes: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.encode(bytes)
}
