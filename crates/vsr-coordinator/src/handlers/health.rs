//! Liveness/readiness handlers.

use axum::extract::State;
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

pub async fn health() -> axum::Json<HealthResponse> {
    axum::Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub active_sessions: usize,
    pub replay_guard_entries: usize,
}

/// Readiness reflects the coordinator's own in-process state; there is no external
/// dependency to probe (the Batch Store and Scheduler live in this process).
pub async fn ready(State(state): State<AppState>) -> axum::Json<ReadyResponse> {
    axum::Json(ReadyResponse {
        status: "ready".to_string(),
        active_sessions: state.sessions.len(),
        replay_guard_entries: state.replay_guard.len(),
    })
}
