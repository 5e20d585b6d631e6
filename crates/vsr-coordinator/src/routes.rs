//! HTTP + WebSocket route composition.

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::handlers::health::{health, ready};
use crate::handlers::jobs::{cancel_job, get_job_status, submit_job};
use crate::middleware::{cors_layer, request_id, request_logging, security_headers};
use crate::state::AppState;
use crate::ws::ws_worker;

pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let job_routes = Router::new()
        .route("/jobs", post(submit_job))
        .route("/jobs/:id", get(get_job_status))
        .route("/jobs/:id/cancel", post(cancel_job));

    let worker_routes = Router::new().route("/ws/worker", get(ws_worker));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", job_routes)
        .merge(worker_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
