//! WebSocket client loop: connect to the coordinator, perform the handshake, then
//! process batch assignments one at a time for the life of the connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsFrame;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vsr_core::{BatchId, HandshakeStatus, Message, WorkerId};
use vsr_crypto::{Keypair, ReplayGuard, SESSION_KEY_BYTES};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::processor::{self, Outcome};

/// The batch currently being processed, if any, and the token that aborts it. Checked
/// against an incoming `cancel_batch`'s batch id so a stale cancel for an already
/// finished batch doesn't reach into the next one.
type CurrentBatch = Arc<Mutex<Option<(BatchId, CancellationToken)>>>;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, WsFrame>;
type WsReader = SplitStream<WsStream>;

const WS_SEND_BUFFER_SIZE: usize = 8;
const WS_HELLO_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// Connect, handshake, and process batches forever, reconnecting with exponential
/// backoff whenever the connection drops.
pub async fn run_forever(config: WorkerConfig, keypair: Arc<Keypair>, worker_id: WorkerId) {
    let mut backoff = config.reconnect_backoff_min;
    loop {
        match run_once(&config, &keypair, &worker_id).await {
            Ok(()) => {
                info!(worker_id = %worker_id, "connection closed cleanly");
                backoff = config.reconnect_backoff_min;
            }
            Err(e) => {
                warn!(worker_id = %worker_id, error = %e, reconnectable = e.is_reconnectable(), "connection lost");
                backoff = (backoff * 2).min(config.reconnect_backoff_max);
            }
        }
        metrics::record_reconnect();
        tokio::time::sleep(backoff).await;
    }
}

async fn run_once(config: &WorkerConfig, keypair: &Keypair, worker_id: &WorkerId) -> WorkerResult<()> {
    info!(url = %config.coordinator_url, "connecting to coordinator");
    let (ws_stream, _) = connect_async(&config.coordinator_url)
        .await
        .map_err(|e| WorkerError::connect_failed(e.to_string()))?;

    let (mut writer, mut reader) = ws_stream.split();

    let session_key = perform_handshake(config, keypair, worker_id, &mut writer, &mut reader).await?;
    info!(worker_id = %worker_id, "handshake accepted, session established");

    let (tx, mut rx) = mpsc::channel::<WsFrame>(WS_SEND_BUFFER_SIZE);
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if writer.send(msg).await.is_err() {
                break;
            }
        }
    });

    let result = run_steady_state(config, worker_id, session_key, tx.clone(), &mut reader).await;

    drop(tx);
    let _ = send_task.await;
    result
}

async fn send_message(tx: &mpsc::Sender<WsFrame>, msg: &Message) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => tx.send(WsFrame::Text(json.into())).await.is_ok(),
        Err(_) => false,
    }
}

fn frame_text(frame: &WsFrame) -> Option<&str> {
    match frame {
        WsFrame::Text(text) => Some(text.as_ref()),
        _ => None,
    }
}

async fn perform_handshake(
    config: &WorkerConfig,
    keypair: &Keypair,
    worker_id: &WorkerId,
    writer: &mut WsWriter,
    reader: &mut WsReader,
) -> WorkerResult<[u8; SESSION_KEY_BYTES]> {
    let public_key = keypair.public_key_pem()?;
    let hello = Message::ClientHello {
        worker_id: worker_id.clone(),
        public_key,
        capabilities: config.capabilities(),
        version: config.version.clone(),
    };
    let json = serde_json::to_string(&hello)?;
    writer
        .send(WsFrame::Text(json.into()))
        .await
        .map_err(|e| WorkerError::handshake_failed(e.to_string()))?;

    let reply = tokio::time::timeout(WS_HELLO_TIMEOUT, reader.next())
        .await
        .map_err(|_| WorkerError::handshake_failed("timed out waiting for server_hello"))?;

    let text = match reply {
        Some(Ok(frame)) => frame_text(&frame)
            .map(str::to_string)
            .ok_or_else(|| WorkerError::handshake_failed("expected a text frame"))?,
        Some(Err(e)) => return Err(WorkerError::handshake_failed(e.to_string())),
        None => return Err(WorkerError::handshake_failed("connection closed before server_hello")),
    };

    let message: Message = serde_json::from_str(&text)?;
    match message {
        Message::ServerHello {
            status: HandshakeStatus::Accepted,
            session_key: Some(wrapped),
            ..
        } => {
            let bytes = base64_decode(&wrapped).map_err(|e| WorkerError::handshake_failed(e.to_string()))?;
            let unwrapped = keypair.decrypt_oaep(&bytes)?;
            let key: [u8; SESSION_KEY_BYTES] = unwrapped
                .try_into()
                .map_err(|_| WorkerError::handshake_failed("session key had the wrong length"))?;
            Ok(key)
        }
        Message::ServerHello {
            status: HandshakeStatus::Rejected,
            reason,
            ..
        } => Err(WorkerError::HandshakeRejected(
            reason.unwrap_or_else(|| "no reason given".to_string()),
        )),
        _ => Err(WorkerError::handshake_failed("expected server_hello")),
    }
}

/// Drive the steady-state protocol: answer pings, send heartbeats, and process batch
/// assignments one at a time. Processing runs in its own task so the heartbeat keeps
/// flowing while the upscaler is busy on a long batch.
async fn run_steady_state(
    config: &WorkerConfig,
    worker_id: &WorkerId,
    session_key: [u8; SESSION_KEY_BYTES],
    tx: mpsc::Sender<WsFrame>,
    reader: &mut WsReader,
) -> WorkerResult<()> {
    let replay_guard = Arc::new(ReplayGuard::new());
    let busy = Arc::new(AtomicBool::new(false));
    let current_batch: CurrentBatch = Arc::new(Mutex::new(None));
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    let mut replay_sweep = tokio::time::interval(std::time::Duration::from_secs(
        vsr_crypto::SWEEP_INTERVAL_SECS,
    ));

    loop {
        tokio::select! {
            _ = replay_sweep.tick() => {
                replay_guard.sweep(Utc::now().timestamp());
            }
            _ = heartbeat.tick() => {
                let hb = Message::Heartbeat {
                    worker_id: worker_id.clone(),
                    timestamp: Utc::now().timestamp(),
                    client_status: if busy.load(Ordering::SeqCst) { "processing" } else { "idle" }.to_string(),
                };
                if !send_message(&tx, &hb).await {
                    return Err(WorkerError::connect_failed("send channel closed"));
                }
            }
            incoming = reader.next() => {
                let frame = match incoming {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => return Err(WorkerError::Transport(e)),
                    None => return Ok(()),
                };
                if matches!(frame, WsFrame::Close(_)) {
                    info!(worker_id = %worker_id, "coordinator closed the connection");
                    return Ok(());
                }
                let Some(text) = frame_text(&frame) else { continue };
                let message: Message = match serde_json::from_str(text) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(worker_id = %worker_id, error = %e, "malformed message from coordinator");
                        continue;
                    }
                };

                match message {
                    Message::Ping { timestamp } => {
                        let _ = timestamp;
                        let pong = Message::Pong { timestamp: Utc::now().timestamp() };
                        let _ = send_message(&tx, &pong).await;
                    }
                    Message::BatchAssignment { batch_id, batch_data, batch_config, nonce, timestamp } => {
                        if busy.swap(true, Ordering::SeqCst) {
                            warn!(worker_id = %worker_id, %batch_id, "dropping assignment, already processing a batch");
                            continue;
                        }
                        let cancel = CancellationToken::new();
                        *current_batch.lock().expect("current batch mutex poisoned") =
                            Some((batch_id.clone(), cancel.clone()));
                        spawn_batch_task(
                            config.clone(),
                            session_key,
                            replay_guard.clone(),
                            busy.clone(),
                            current_batch.clone(),
                            tx.clone(),
                            batch_id,
                            batch_data,
                            batch_config,
                            nonce,
                            timestamp,
                            cancel,
                        );
                    }
                    Message::CancelBatch { batch_id, reason } => {
                        let matched = {
                            let guard = current_batch.lock().expect("current batch mutex poisoned");
                            match guard.as_ref() {
                                Some((current_id, token)) if *current_id == batch_id => {
                                    token.cancel();
                                    true
                                }
                                _ => false,
                            }
                        };
                        if matched {
                            // The in-flight task observes the token, kills the
                            // upscaler, cleans its scratch dir, then sends
                            // `batch_cancelled` itself once that's done.
                            info!(worker_id = %worker_id, %batch_id, reason, "cancelling in-flight batch");
                        } else {
                            warn!(worker_id = %worker_id, %batch_id, "cancel_batch for a batch not currently in flight");
                            let _ = send_message(&tx, &Message::BatchCancelled { batch_id }).await;
                        }
                    }
                    Message::Disconnect { reason } => {
                        info!(worker_id = %worker_id, reason, "coordinator requested disconnect");
                        return Ok(());
                    }
                    Message::Error { code, message } => {
                        warn!(worker_id = %worker_id, code, message, "coordinator reported error");
                    }
                    Message::ClientHello { .. }
                    | Message::ServerHello { .. }
                    | Message::Heartbeat { .. }
                    | Message::BatchResult { .. }
                    | Message::BatchCancelled { .. } => {
                        warn!(worker_id = %worker_id, "unexpected message direction");
                    }
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_batch_task(
    config: WorkerConfig,
    session_key: [u8; SESSION_KEY_BYTES],
    replay_guard: Arc<ReplayGuard>,
    busy: Arc<AtomicBool>,
    current_batch: CurrentBatch,
    tx: mpsc::Sender<WsFrame>,
    batch_id: BatchId,
    batch_data: String,
    batch_config: vsr_core::BatchConfig,
    nonce: String,
    timestamp: i64,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let started = std::time::Instant::now();
        let outcome = processor::process_batch(
            &config,
            session_key,
            &replay_guard,
            batch_id.clone(),
            batch_data,
            batch_config,
            nonce,
            timestamp,
            cancel,
        )
        .await;

        match outcome {
            Outcome::Settled(result_msg) => {
                match &result_msg {
                    Message::BatchResult { status: vsr_core::BatchResultStatus::Completed, .. } => {
                        metrics::record_batch_completed(started.elapsed().as_secs_f64());
                    }
                    Message::BatchResult { status: vsr_core::BatchResultStatus::Failed, .. } => {
                        metrics::record_batch_failed();
                    }
                    _ => {}
                }
                let _ = send_message(&tx, &result_msg).await;
            }
            Outcome::Cancelled => {
                let _ = send_message(&tx, &Message::BatchCancelled { batch_id: batch_id.clone() }).await;
            }
        }

        let mut guard = current_batch.lock().expect("current batch mutex poisoned");
        if matches!(guard.as_ref(), Some((id, _)) if *id == batch_id) {
            *guard = None;
        }
        drop(guard);
        busy.store(false, Ordering::SeqCst);
    });
}

fn base64_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.decode(s)
}
