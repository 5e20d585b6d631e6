//! Worker definitions: a remote executor and its fleet bookkeeping.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{BatchId, WorkerId};

/// Consecutive failures before a worker is auto-banned.
pub const BAN_THRESHOLD: u32 = 3;

/// Ban duration once a worker crosses [`BAN_THRESHOLD`].
pub const BAN_DURATION_SECS: i64 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    #[default]
    Connecting,
    Connected,
    Processing,
    Idle,
    Disconnected,
    Error,
    Banned,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerStatus::Connecting => "connecting",
            WorkerStatus::Connected => "connected",
            WorkerStatus::Processing => "processing",
            WorkerStatus::Idle => "idle",
            WorkerStatus::Disconnected => "disconnected",
            WorkerStatus::Error => "error",
            WorkerStatus::Banned => "banned",
        };
        write!(f, "{}", s)
    }
}

/// Hardware/capability descriptor reported once at handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerCapabilities {
    pub gpu_count: u32,
    pub gpu_model: Option<String>,
    pub cpu_threads: u32,
    pub max_tile_size: u32,
}

/// A remote executor in the fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub address: String,
    pub capabilities: WorkerCapabilities,
    pub status: WorkerStatus,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub current_batch: Option<BatchId>,
    pub batches_completed: u64,
    pub batches_failed: u64,
    pub frames_processed: u64,
    pub total_processing_secs: f64,
    pub consecutive_failures: u32,
    pub ban_until: Option<DateTime<Utc>>,
    pub max_concurrent_batches: u32,
}

impl Worker {
    pub fn new(id: WorkerId, address: impl Into<String>, capabilities: WorkerCapabilities) -> Self {
        let now = Utc::now();
        Self {
            id,
            address: address.into(),
            capabilities,
            status: WorkerStatus::Connecting,
            connected_at: now,
            last_heartbeat: now,
            current_batch: None,
            batches_completed: 0,
            batches_failed: 0,
            frames_processed: 0,
            total_processing_secs: 0.0,
            consecutive_failures: 0,
            ban_until: None,
            max_concurrent_batches: 1,
        }
    }

    pub fn touch_heartbeat(&mut self) {
        self.last_heartbeat = Utc::now();
    }

    /// A worker is stale once no heartbeat has arrived within `stale_threshold_secs`,
    /// allowing an extra `grace_period_secs` before treating it as disconnected.
    pub fn is_stale(&self, stale_threshold_secs: i64, grace_period_secs: i64) -> bool {
        let elapsed = Utc::now()
            .signed_duration_since(self.last_heartbeat)
            .num_seconds();
        elapsed > stale_threshold_secs + grace_period_secs
    }

    pub fn is_available(&self) -> bool {
        matches!(self.status, WorkerStatus::Connected | WorkerStatus::Idle) && !self.is_banned()
    }

    pub fn is_banned(&self) -> bool {
        match self.ban_until {
            Some(until) => Utc::now() < until,
            None => false,
        }
    }

    pub fn assign_batch(&mut self, batch_id: BatchId) {
        self.current_batch = Some(batch_id);
        self.status = WorkerStatus::Processing;
    }

    /// Record a successful completion: increments the completion counter, clears the
    /// consecutive-failure count, and frees the worker for reassignment.
    pub fn record_success(&mut self, frame_count: u32, processing_secs: f64) {
        self.batches_completed += 1;
        self.frames_processed += frame_count as u64;
        self.total_processing_secs += processing_secs;
        self.consecutive_failures = 0;
        self.current_batch = None;
        self.status = WorkerStatus::Idle;
    }

    /// Record a failure. Bans the worker for [`BAN_DURATION_SECS`] once
    /// [`BAN_THRESHOLD`] consecutive failures accrue.
    pub fn record_failure(&mut self) {
        self.batches_failed += 1;
        self.consecutive_failures += 1;
        self.current_batch = None;
        if self.consecutive_failures >= BAN_THRESHOLD {
            self.status = WorkerStatus::Banned;
            self.ban_until = Some(Utc::now() + Duration::seconds(BAN_DURATION_SECS));
        } else {
            self.status = WorkerStatus::Idle;
        }
    }

    /// Clear an expired ban. The next successful operation is what actually resets
    /// the consecutive-failure counter per the ban-lift contract.
    pub fn lift_ban_if_expired(&mut self) {
        if let Some(until) = self.ban_until {
            if Utc::now() >= until {
                self.ban_until = None;
                if self.status == WorkerStatus::Banned {
                    self.status = WorkerStatus::Idle;
                }
            }
        }
    }

    /// Average seconds per completed batch, for the Scheduler's quality ranking.
    pub fn average_batch_time(&self) -> f64 {
        if self.batches_completed == 0 {
            return 0.0;
        }
        self.total_processing_secs / self.batches_completed as f64
    }

    /// Success rate in [0, 1], for the Scheduler's quality ranking. A worker with no
    /// history yet ranks as perfectly reliable so it gets a chance to prove itself.
    pub fn success_rate(&self) -> f64 {
        let total = self.batches_completed + self.batches_failed;
        if total == 0 {
            return 1.0;
        }
        self.batches_completed as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_worker() -> Worker {
        Worker::new(
            WorkerId::new(),
            "10.0.0.1:9001",
            WorkerCapabilities {
                gpu_count: 1,
                gpu_model: Some("rtx-4090".to_string()),
                cpu_threads: 16,
                max_tile_size: 256,
            },
        )
    }

    #[test]
    fn bans_after_three_consecutive_failures() {
        let mut w = new_worker();
        w.record_failure();
        w.record_failure();
        assert!(!w.is_banned());
        w.record_failure();
        assert!(w.is_banned());
        assert_eq!(w.status, WorkerStatus::Banned);
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let mut w = new_worker();
        w.record_failure();
        w.record_failure();
        w.record_success(50, 12.5);
        assert_eq!(w.consecutive_failures, 0);
        assert_eq!(w.batches_completed, 1);
    }

    #[test]
    fn success_rate_defaults_perfect_with_no_history() {
        let w = new_worker();
        assert_eq!(w.success_rate(), 1.0);
    }
}
