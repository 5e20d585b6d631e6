//! Prometheus metrics for the worker process.
//!
//! Unlike the coordinator, the worker has no HTTP server of its own, so the exporter
//! runs its own minimal listener instead of being mounted behind an existing router.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder with its own HTTP listener at `addr`.
pub fn init_metrics(addr: SocketAddr) {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus exporter");
}

pub mod names {
    pub const BATCHES_PROCESSED_TOTAL: &str = "vsr_worker_batches_processed_total";
    pub const BATCHES_FAILED_TOTAL: &str = "vsr_worker_batches_failed_total";
    pub const BATCH_PROCESSING_SECONDS: &str = "vsr_worker_batch_processing_seconds";
    pub const RECONNECTS_TOTAL: &str = "vsr_worker_reconnects_total";
}

pub fn record_batch_completed(processing_secs: f64) {
    counter!(names::BATCHES_PROCESSED_TOTAL).increment(1);
    histogram!(names::BATCH_PROCESSING_SECONDS).record(processing_secs);
}

pub fn record_batch_failed() {
    counter!(names::BATCHES_FAILED_TOTAL).increment(1);
}

pub fn record_reconnect() {
    counter!(names::RECONNECTS_TOTAL).increment(1);
}
