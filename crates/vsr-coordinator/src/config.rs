//! Coordinator configuration.

use std::time::Duration;

/// Coordinator server configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Root directory for job working trees (`jobs/<job_id>/...`)
    pub work_dir: String,
    /// Request timeout
    pub request_timeout: Duration,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    /// Whether the `/metrics` endpoint is mounted
    pub metrics_enabled: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: vec!["*".to_string()],
            work_dir: "./work".to_string(),
            request_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024,
            environment: "development".to_string(),
            metrics_enabled: true,
        }
    }
}

impl CoordinatorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            host: std::env::var("COORDINATOR_HOST").unwrap_or(default.host),
            port: std::env::var("COORDINATOR_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(default.cors_origins),
            work_dir: std::env::var("COORDINATOR_WORK_DIR").unwrap_or(default.work_dir),
            request_timeout: Duration::from_secs(
                std::env::var("REQUEST_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            max_body_size: std::env::var("MAX_BODY_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.max_body_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(default.environment),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }
}
