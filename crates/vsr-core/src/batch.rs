//! Batch definitions: a contiguous slice of a job's frames assigned to one worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{BatchId, JobId, WorkerId};

/// Default number of frames per batch; the final batch of a job may be smaller.
pub const DEFAULT_BATCH_SIZE: u32 = 50;

/// Default retry ceiling before a batch is terminally failed.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    #[default]
    Pending,
    Assigned,
    Processing,
    Completed,
    Failed,
    Timeout,
    Duplicate,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Assigned => "assigned",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Timeout => "timeout",
            BatchStatus::Duplicate => "duplicate",
        };
        write!(f, "{}", s)
    }
}

/// A contiguous, ordered slice of a job's frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub job_id: JobId,
    pub start_frame: u32,
    pub end_frame: u32,
    pub frame_filenames: Vec<String>,
    pub directory: String,
    pub status: BatchStatus,
    pub assigned_worker: Option<WorkerId>,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub progress_percent: f64,
    pub error_message: Option<String>,
    /// Id of the original batch this one duplicates the in-flight work of, if any.
    pub duplicate_of: Option<BatchId>,
}

impl Batch {
    pub fn new(
        job_id: JobId,
        start_frame: u32,
        end_frame: u32,
        frame_filenames: Vec<String>,
        directory: impl Into<String>,
    ) -> Self {
        Self {
            id: BatchId::new(),
            job_id,
            start_frame,
            end_frame,
            frame_filenames,
            directory: directory.into(),
            status: BatchStatus::Pending,
            assigned_worker: None,
            created_at: Utc::now(),
            assigned_at: None,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            progress_percent: 0.0,
            error_message: None,
            duplicate_of: None,
        }
    }

    /// Build a duplicate sharing this batch's backing directory and frame range but
    /// carrying its own id, status, and assignment.
    pub fn duplicate(&self) -> Self {
        Self {
            id: BatchId::new(),
            job_id: self.job_id.clone(),
            start_frame: self.start_frame,
            end_frame: self.end_frame,
            frame_filenames: self.frame_filenames.clone(),
            directory: self.directory.clone(),
            status: BatchStatus::Pending,
            assigned_worker: None,
            created_at: Utc::now(),
            assigned_at: None,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: self.max_retries,
            progress_percent: 0.0,
            error_message: None,
            duplicate_of: Some(self.id.clone()),
        }
    }

    pub fn frame_count(&self) -> u32 {
        self.end_frame - self.start_frame + 1
    }

    pub fn assign(&mut self, worker_id: WorkerId) {
        self.status = BatchStatus::Assigned;
        self.assigned_worker = Some(worker_id);
        self.assigned_at = Some(Utc::now());
    }

    pub fn start(&mut self) {
        self.status = BatchStatus::Processing;
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self) {
        self.status = BatchStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.progress_percent = 100.0;
    }

    /// Record a failure. Returns `true` if the batch goes back to `pending` for a
    /// retry, `false` if retries are exhausted and the failure is terminal.
    pub fn fail(&mut self, err: impl Into<String>) -> bool {
        self.error_message = Some(err.into());
        self.retry_count += 1;
        self.assigned_worker = None;
        if self.retry_count < self.max_retries {
            self.status = BatchStatus::Pending;
            true
        } else {
            self.status = BatchStatus::Failed;
            false
        }
    }

    /// Record a timeout. Same retry bookkeeping as [`Batch::fail`] but distinguishes
    /// the terminal state as `Timeout` rather than `Failed` when retries remain, to
    /// preserve the cause for observability; once retries are exhausted it settles
    /// into `Failed` like any other exhausted batch.
    pub fn timeout(&mut self) -> bool {
        self.retry_count += 1;
        self.assigned_worker = None;
        if self.retry_count < self.max_retries {
            self.status = BatchStatus::Pending;
            true
        } else {
            self.status = BatchStatus::Failed;
            self.error_message = Some("batch exceeded wall-clock ceiling".to_string());
            false
        }
    }

    pub fn mark_duplicate_loser(&mut self) {
        self.status = BatchStatus::Duplicate;
        self.completed_at = Some(Utc::now());
    }

    pub fn is_duplicate(&self) -> bool {
        self.duplicate_of.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_batch() -> Batch {
        Batch::new(
            JobId::new(),
            0,
            49,
            (0..50).map(|i| format!("frame_{:06}.png", i)).collect(),
            "/work/jobs/j1/batches/batch_000",
        )
    }

    #[test]
    fn frame_count_is_inclusive_range() {
        let b = new_batch();
        assert_eq!(b.frame_count(), 50);
        assert_eq!(b.frame_filenames.len(), 50);
    }

    #[test]
    fn duplicate_shares_directory_but_not_id() {
        let original = new_batch();
        let dup = original.duplicate();
        assert_ne!(dup.id, original.id);
        assert_eq!(dup.directory, original.directory);
        assert_eq!(dup.duplicate_of, Some(original.id.clone()));
        assert!(dup.is_duplicate());
        assert!(!original.is_duplicate());
    }

    #[test]
    fn fail_retries_until_exhausted() {
        let mut b = new_batch();
        assert!(b.fail("boom"));
        assert_eq!(b.status, BatchStatus::Pending);
        assert!(b.fail("boom"));
        assert!(!b.fail("boom"));
        assert_eq!(b.status, BatchStatus::Failed);
        assert_eq!(b.retry_count, 3);
    }
}
