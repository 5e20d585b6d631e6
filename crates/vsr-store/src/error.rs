//! Errors surfaced by the Batch Store.

use thiserror::Error;
use vsr_core::{BatchId, JobId, WorkerId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("batch {0} not found")]
    BatchNotFound(BatchId),

    #[error("worker {0} not found")]
    WorkerNotFound(WorkerId),

    #[error("batch {0} already settled by a winning duplicate")]
    AlreadySettled(BatchId),

    #[error("worker {0} is not available for assignment")]
    WorkerUnavailable(WorkerId),

    #[error("stale result for batch {0}: not in flight or not assigned to the reporting worker")]
    StaleResult(BatchId),
}
