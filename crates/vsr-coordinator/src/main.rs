//! Coordinator server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vsr_coordinator::{assembly, config::CoordinatorConfig, create_router, metrics, state::AppState};
use vsr_scheduler::{Scheduler, SchedulerConfig};
use vsr_store::BatchStore;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("vsr=info".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("starting vsr-coordinator");

    let config = CoordinatorConfig::from_env();
    info!(host = %config.host, port = config.port, "coordinator config loaded");

    let store = Arc::new(BatchStore::new());
    let scheduler = Arc::new(Scheduler::new(store.clone(), SchedulerConfig::from_env()));

    let state = match AppState::new(config.clone(), store, scheduler.clone()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to create application state");
            std::process::exit(1);
        }
    };

    let metrics_handle = if config.metrics_enabled {
        info!("prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics())
    } else {
        None
    };

    tokio::spawn(scheduler.clone().run_assignment_loop());
    tokio::spawn(scheduler.clone().run_timeout_loop());
    tokio::spawn(assembly::run_assembly_loop(state.clone()));
    tokio::spawn(run_replay_sweep_loop(state.replay_guard.clone()));

    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("invalid bind address");

    info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .unwrap();

    info!("coordinator shutdown complete");
}

/// Purge nonces older than the replay window on a fixed cadence so the coordinator's
/// session-wide `ReplayGuard` doesn't grow unbounded for the life of the process.
async fn run_replay_sweep_loop(replay_guard: Arc<vsr_crypto::ReplayGuard>) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(vsr_crypto::SWEEP_INTERVAL_SECS));
    loop {
        ticker.tick().await;
        replay_guard.sweep(chrono::Utc::now().timestamp());
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install ctrl-c handler");
    info!("received shutdown signal");
}
