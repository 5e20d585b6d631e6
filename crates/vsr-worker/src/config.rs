//! Worker configuration.

use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Coordinator WebSocket URL, e.g. `ws://coordinator:8080/ws/worker`.
    pub coordinator_url: String,
    /// Work directory for scratch batch inputs/outputs.
    pub work_dir: String,
    /// Path (or bare name resolved via `PATH`) to the upscaler binary.
    pub upscaler_binary: String,
    /// Model name passed to the upscaler via `-n`.
    pub model: String,
    /// Default upscale factor passed via `-s`, overridden per batch by the coordinator.
    pub scale: u32,
    /// Number of GPUs this worker exposes. Reported in `client_hello` capabilities.
    pub gpu_count: u32,
    /// GPU model string, if known. Reported in `client_hello` capabilities.
    pub gpu_model: Option<String>,
    /// CPU worker threads available for upscaling. Reported in capabilities and used
    /// as the default `-j` thread configuration.
    pub cpu_threads: u32,
    /// Largest tile size this worker can process without running out of memory.
    /// Reported in capabilities and used as the default `-t`.
    pub max_tile_size: u32,
    /// Heartbeat send interval.
    pub heartbeat_interval: Duration,
    /// Per-batch upscaler process ceiling.
    pub batch_timeout: Duration,
    /// Initial reconnect backoff after a dropped connection.
    pub reconnect_backoff_min: Duration,
    /// Reconnect backoff ceiling; doubles on each consecutive failure up to this.
    pub reconnect_backoff_max: Duration,
    /// Protocol version string reported in `client_hello`.
    pub version: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            coordinator_url: "ws://127.0.0.1:8080/ws/worker".to_string(),
            work_dir: "/tmp/vsr-worker".to_string(),
            upscaler_binary: "realesrgan-ncnn-vulkan".to_string(),
            model: "realesrgan-x4plus".to_string(),
            scale: 4,
            gpu_count: 0,
            gpu_model: None,
            cpu_threads: 4,
            max_tile_size: 128,
            heartbeat_interval: Duration::from_secs(30),
            batch_timeout: Duration::from_secs(1800),
            reconnect_backoff_min: Duration::from_secs(1),
            reconnect_backoff_max: Duration::from_secs(60),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            coordinator_url: std::env::var("WORKER_COORDINATOR_URL").unwrap_or(default.coordinator_url),
            work_dir: std::env::var("WORKER_WORK_DIR").unwrap_or(default.work_dir),
            upscaler_binary: std::env::var("WORKER_UPSCALER_BINARY").unwrap_or(default.upscaler_binary),
            model: std::env::var("WORKER_MODEL").unwrap_or(default.model),
            scale: std::env::var("WORKER_SCALE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.scale),
            gpu_count: std::env::var("WORKER_GPU_COUNT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.gpu_count),
            gpu_model: std::env::var("WORKER_GPU_MODEL").ok(),
            cpu_threads: std::env::var("WORKER_CPU_THREADS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.cpu_threads),
            max_tile_size: std::env::var("WORKER_MAX_TILE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.max_tile_size),
            heartbeat_interval: Duration::from_secs(
                std::env::var("WORKER_HEARTBEAT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            batch_timeout: Duration::from_secs(
                std::env::var("WORKER_BATCH_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1800),
            ),
            reconnect_backoff_min: Duration::from_secs(
                std::env::var("WORKER_RECONNECT_BACKOFF_MIN_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1),
            ),
            reconnect_backoff_max: Duration::from_secs(
                std::env::var("WORKER_RECONNECT_BACKOFF_MAX_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            version: default.version,
        }
    }

    pub fn capabilities(&self) -> vsr_core::WorkerCapabilities {
        vsr_core::WorkerCapabilities {
            gpu_count: self.gpu_count,
            gpu_model: self.gpu_model.clone(),
            cpu_threads: self.cpu_threads,
            max_tile_size: self.max_tile_size,
        }
    }
}
