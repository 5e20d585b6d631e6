//! Worker Executor binary.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vsr_core::WorkerId;
use vsr_crypto::Keypair;
use vsr_worker::{client, config::WorkerConfig};

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

    info!("starting vsr-worker");

    let config = WorkerConfig::from_env();
    info!(coordinator_url = %config.coordinator_url, "worker config loaded");

    if let Ok(addr) = std::env::var("WORKER_METRICS_ADDR") {
        match addr.parse() {
            Ok(addr) => {
                vsr_worker::metrics::init_metrics(addr);
                info!(%addr, "prometheus metrics enabled");
            }
            Err(e) => tracing::warn!(error = %e, "invalid WORKER_METRICS_ADDR, metrics disabled"),
        }
    }

    let keypair = Arc::new(Keypair::generate().expect("failed to generate handshake keypair"));
    let worker_id = WorkerId::new();
    info!(worker_id = %worker_id, "generated worker identity for this process lifetime");

    client::run_forever(config, keypair, worker_id).await;
}
