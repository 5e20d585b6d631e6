//! Richer job progress snapshot returned by [`crate::store::BatchStore::job_progress`].

use vsr_core::JobStatus;

#[derive(Debug, Clone)]
pub struct JobProgress {
    pub status: JobStatus,
    pub total_batches: usize,
    pub pending: usize,
    pub assigned: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub percent_complete: f64,
}
