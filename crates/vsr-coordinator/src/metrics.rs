//! Prometheus metrics for the coordinator.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Initialize the Prometheus metrics recorder. Returns a handle used to render
/// `/metrics`.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Metric names as constants for consistency.
pub mod names {
    pub const WS_CONNECTIONS_ACTIVE: &str = "vsr_ws_connections_active";
    pub const WS_CONNECTIONS_TOTAL: &str = "vsr_ws_connections_total";
    pub const WS_MESSAGES_SENT: &str = "vsr_ws_messages_sent_total";
    pub const WS_MESSAGES_RECEIVED: &str = "vsr_ws_messages_received_total";

    pub const JOBS_SUBMITTED_TOTAL: &str = "vsr_jobs_submitted_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "vsr_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vsr_jobs_failed_total";

    pub const BATCHES_ASSIGNED_TOTAL: &str = "vsr_batches_assigned_total";
    pub const BATCHES_DUPLICATED_TOTAL: &str = "vsr_batches_duplicated_total";
    pub const BATCHES_COMPLETED_TOTAL: &str = "vsr_batches_completed_total";
    pub const BATCHES_FAILED_TOTAL: &str = "vsr_batches_failed_total";
    pub const BATCH_PROCESSING_SECONDS: &str = "vsr_batch_processing_seconds";

    pub const SECURITY_VIOLATIONS_TOTAL: &str = "vsr_security_violations_total";
}

pub fn record_ws_connection() {
    counter!(names::WS_CONNECTIONS_TOTAL).increment(1);
}

pub fn set_ws_active_connections(count: i64) {
    gauge!(names::WS_CONNECTIONS_ACTIVE).set(count as f64);
}

pub fn record_ws_message_sent(message_type: &str) {
    let labels = [("type", message_type.to_string())];
    counter!(names::WS_MESSAGES_SENT, &labels).increment(1);
}

pub fn record_ws_message_received(message_type: &str) {
    let labels = [("type", message_type.to_string())];
    counter!(names::WS_MESSAGES_RECEIVED, &labels).increment(1);
}

pub fn record_job_submitted() {
    counter!(names::JOBS_SUBMITTED_TOTAL).increment(1);
}

pub fn record_job_completed() {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
}

pub fn record_job_failed() {
    counter!(names::JOBS_FAILED_TOTAL).increment(1);
}

pub fn record_batch_assigned(duplicate: bool) {
    if duplicate {
        counter!(names::BATCHES_DUPLICATED_TOTAL).increment(1);
    } else {
        counter!(names::BATCHES_ASSIGNED_TOTAL).increment(1);
    }
}

pub fn record_batch_completed(processing_secs: f64) {
    counter!(names::BATCHES_COMPLETED_TOTAL).increment(1);
    histogram!(names::BATCH_PROCESSING_SECONDS).record(processing_secs);
}

pub fn record_batch_failed() {
    counter!(names::BATCHES_FAILED_TOTAL).increment(1);
}

pub fn record_security_violation() {
    counter!(names::SECURITY_VIOLATIONS_TOTAL).increment(1);
}
