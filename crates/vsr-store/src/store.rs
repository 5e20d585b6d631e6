//! The Batch Store: single source of truth for all job/batch/worker state.
//!
//! All state lives behind one `tokio::sync::Mutex` so each top-level operation runs
//! as a single exclusive region, matching the shared-resource policy: the store is
//! the only shared mutable state in the system.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::{info, warn};

use vsr_core::{
    AudioTrack, Batch, BatchId, BatchStatus, Job, JobId, JobStatus, SubtitleTrack, Worker,
    WorkerCapabilities, WorkerId, WorkerStatus,
};

use crate::error::StoreError;
use crate::progress::JobProgress;

struct StoreInner {
    jobs: HashMap<JobId, Job>,
    batches: HashMap<BatchId, Batch>,
    workers: HashMap<WorkerId, Worker>,
}

impl StoreInner {
    fn new() -> Self {
        Self {
            jobs: HashMap::new(),
            batches: HashMap::new(),
            workers: HashMap::new(),
        }
    }

    /// Every batch sharing a duplication group with `batch_id`: the group's original
    /// plus all of its duplicates, in no particular order.
    fn duplicate_group(&self, batch_id: &BatchId) -> Vec<BatchId> {
        let original_id = self
            .batches
            .get(batch_id)
            .and_then(|b| b.duplicate_of.clone())
            .unwrap_or_else(|| batch_id.clone());

        self.batches
            .values()
            .filter(|b| b.id == original_id || b.duplicate_of.as_ref() == Some(&original_id))
            .map(|b| b.id.clone())
            .collect()
    }
}

pub struct BatchStore {
    inner: Mutex<StoreInner>,
}

impl Default for BatchStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner::new()),
        }
    }

    pub async fn create_job(&self, source_path: impl Into<String>, output_path: impl Into<String>) -> JobId {
        let job = Job::new(source_path, output_path);
        let job_id = job.id.clone();
        let mut inner = self.inner.lock().await;
        inner.jobs.insert(job_id.clone(), job);
        info!(%job_id, "job created");
        job_id
    }

    pub async fn set_job_frames(
        &self,
        job_id: &JobId,
        frame_count: u32,
        frame_rate: f64,
        audio_tracks: Vec<AudioTrack>,
        subtitle_tracks: Vec<SubtitleTrack>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.clone()))?;
        job.set_frames(frame_count, frame_rate, audio_tracks, subtitle_tracks);
        Ok(())
    }

    pub async fn create_batch(
        &self,
        job_id: &JobId,
        start: u32,
        end: u32,
        filenames: Vec<String>,
        directory: impl Into<String>,
    ) -> Result<BatchId, StoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.jobs.contains_key(job_id) {
            return Err(StoreError::JobNotFound(job_id.clone()));
        }
        let batch = Batch::new(job_id.clone(), start, end, filenames, directory);
        let batch_id = batch.id.clone();
        inner.batches.insert(batch_id.clone(), batch);
        inner
            .jobs
            .get_mut(job_id)
            .expect("checked above")
            .add_batch(batch_id.clone());
        Ok(batch_id)
    }

    /// Create a duplicate of `original_id` for straggler mitigation. The duplicate is
    /// tracked in the batch table but not added to the job's `batch_ids`, since it
    /// does not represent distinct work for completion-counting purposes.
    pub async fn duplicate_batch(&self, original_id: &BatchId) -> Result<BatchId, StoreError> {
        let mut inner = self.inner.lock().await;
        let original = inner
            .batches
            .get(original_id)
            .ok_or_else(|| StoreError::BatchNotFound(original_id.clone()))?;
        let duplicate = original.duplicate();
        let duplicate_id = duplicate.id.clone();
        inner.batches.insert(duplicate_id.clone(), duplicate);
        Ok(duplicate_id)
    }

    pub async fn register_worker(
        &self,
        id: WorkerId,
        address: impl Into<String>,
        capabilities: WorkerCapabilities,
    ) {
        let worker = Worker::new(id.clone(), address, capabilities);
        let mut inner = self.inner.lock().await;
        inner.workers.insert(id.clone(), worker);
        info!(worker_id = %id, "worker registered");
    }

    pub async fn set_worker_status(&self, id: &WorkerId, status: WorkerStatus) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let worker = inner
            .workers
            .get_mut(id)
            .ok_or_else(|| StoreError::WorkerNotFound(id.clone()))?;
        worker.status = status;
        Ok(())
    }

    pub async fn touch_worker(&self, id: &WorkerId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let worker = inner
            .workers
            .get_mut(id)
            .ok_or_else(|| StoreError::WorkerNotFound(id.clone()))?;
        worker.touch_heartbeat();
        worker.lift_ban_if_expired();
        Ok(())
    }

    /// Atomically select the oldest pending batch and transition it (and the claiming
    /// worker) to `assigned`/`processing`. Returns `None` if no pending work exists or
    /// the worker is unavailable.
    pub async fn claim_pending_batch(&self, worker_id: &WorkerId) -> Result<Option<BatchId>, StoreError> {
        let mut inner = self.inner.lock().await;

        {
            let worker = inner
                .workers
                .get_mut(worker_id)
                .ok_or_else(|| StoreError::WorkerNotFound(worker_id.clone()))?;
            worker.lift_ban_if_expired();
            if !worker.is_available() {
                return Ok(None);
            }
        }

        let oldest_pending = inner
            .batches
            .values()
            .filter(|b| b.status == BatchStatus::Pending)
            .min_by_key(|b| b.created_at)
            .map(|b| b.id.clone());

        let Some(batch_id) = oldest_pending else {
            return Ok(None);
        };

        inner
            .batches
            .get_mut(&batch_id)
            .expect("just selected")
            .assign(worker_id.clone());
        inner
            .workers
            .get_mut(worker_id)
            .expect("checked above")
            .assign_batch(batch_id.clone());

        Ok(Some(batch_id))
    }

    /// Directly assign a specific batch (typically a freshly created duplicate) to
    /// `worker_id`, bypassing the oldest-pending selection [`Self::claim_pending_batch`]
    /// performs. Returns `Ok(false)` without mutating anything if the worker is not
    /// available.
    pub async fn assign_batch_to_worker(
        &self,
        batch_id: &BatchId,
        worker_id: &WorkerId,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;

        {
            let worker = inner
                .workers
                .get_mut(worker_id)
                .ok_or_else(|| StoreError::WorkerNotFound(worker_id.clone()))?;
            worker.lift_ban_if_expired();
            if !worker.is_available() {
                return Ok(false);
            }
        }

        inner
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| StoreError::BatchNotFound(batch_id.clone()))?
            .assign(worker_id.clone());
        inner
            .workers
            .get_mut(worker_id)
            .expect("checked above")
            .assign_batch(batch_id.clone());

        Ok(true)
    }

    /// The oldest batch currently in flight (`assigned` or `processing`), used by the
    /// Scheduler's straggler-mitigation duplication rule.
    pub async fn oldest_in_flight_batch(&self) -> Option<BatchId> {
        let inner = self.inner.lock().await;
        inner
            .batches
            .values()
            .filter(|b| matches!(b.status, BatchStatus::Assigned | BatchStatus::Processing))
            .min_by_key(|b| b.assigned_at.unwrap_or(b.created_at))
            .map(|b| b.id.clone())
    }

    /// Every batch currently in flight (`assigned` or `processing`), used by the
    /// Scheduler's timeout-reaping loop to sweep all overdue batches in one pass.
    pub async fn list_in_flight(&self) -> Vec<BatchId> {
        let inner = self.inner.lock().await;
        inner
            .batches
            .values()
            .filter(|b| matches!(b.status, BatchStatus::Assigned | BatchStatus::Processing))
            .map(|b| b.id.clone())
            .collect()
    }

    pub async fn start_batch(&self, batch_id: &BatchId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| StoreError::BatchNotFound(batch_id.clone()))?
            .start();
        Ok(())
    }

    /// Complete a batch on behalf of `worker_id`. A no-op (returning
    /// [`StoreError::AlreadySettled`]) if the batch's original or any duplicate has
    /// already completed — the duplicate-win race's losers are cancelled, not failed.
    /// Also a no-op (returning [`StoreError::StaleResult`]) if the batch is no longer
    /// in flight under `worker_id` — e.g. it was cancelled or reassigned after a
    /// timeout before this result arrived.
    pub async fn complete_batch(
        &self,
        batch_id: &BatchId,
        worker_id: &WorkerId,
        frame_count: u32,
        processing_secs: f64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;

        let group = inner.duplicate_group(batch_id);
        if group
            .iter()
            .any(|id| inner.batches.get(id).map(|b| b.status == BatchStatus::Completed).unwrap_or(false))
        {
            return Err(StoreError::AlreadySettled(batch_id.clone()));
        }

        let batch_ref = inner
            .batches
            .get(batch_id)
            .ok_or_else(|| StoreError::BatchNotFound(batch_id.clone()))?;
        if batch_ref.assigned_worker.as_ref() != Some(worker_id)
            || !matches!(batch_ref.status, BatchStatus::Assigned | BatchStatus::Processing)
        {
            return Err(StoreError::StaleResult(batch_id.clone()));
        }
        let job_id = batch_ref.job_id.clone();

        inner
            .batches
            .get_mut(batch_id)
            .expect("checked above")
            .complete();

        for peer_id in group.into_iter().filter(|id| id != batch_id) {
            if let Some(peer) = inner.batches.get_mut(&peer_id) {
                if !peer.status.is_terminal() {
                    let peer_worker = peer.assigned_worker.clone();
                    peer.mark_duplicate_loser();
                    if let Some(peer_worker) = peer_worker {
                        if let Some(w) = inner.workers.get_mut(&peer_worker) {
                            w.current_batch = None;
                            w.status = WorkerStatus::Idle;
                        }
                    }
                }
            }
        }

        if let Some(worker) = inner.workers.get_mut(worker_id) {
            worker.record_success(frame_count, processing_secs);
        }

        if let Some(job) = inner.jobs.get_mut(&job_id) {
            job.completed_batches += 1;
        }

        Ok(())
    }

    /// Fail a batch on behalf of `worker_id`. Returns `true` if the batch goes back
    /// to `pending` for a retry.
    pub async fn fail_batch(
        &self,
        batch_id: &BatchId,
        worker_id: &WorkerId,
        err: impl Into<String>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let batch = inner
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| StoreError::BatchNotFound(batch_id.clone()))?;
        let will_retry = batch.fail(err);

        if !will_retry {
            let job_id = batch.job_id.clone();
            if let Some(job) = inner.jobs.get_mut(&job_id) {
                job.failed_batches += 1;
            }
        }

        if let Some(worker) = inner.workers.get_mut(worker_id) {
            worker.record_failure();
        }

        Ok(will_retry)
    }

    /// Reap a batch that exceeded its wall-clock ceiling. Same retry bookkeeping as
    /// [`Self::fail_batch`], released for reassignment without charging the worker a
    /// failure if the cause was a transport drop rather than the worker's own fault.
    pub async fn timeout_batch(&self, batch_id: &BatchId) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let batch = inner
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| StoreError::BatchNotFound(batch_id.clone()))?;
        let worker_id = batch.assigned_worker.clone();
        let will_retry = batch.timeout();

        if !will_retry {
            let job_id = batch.job_id.clone();
            if let Some(job) = inner.jobs.get_mut(&job_id) {
                job.failed_batches += 1;
            }
        }

        if let Some(worker_id) = worker_id {
            if let Some(worker) = inner.workers.get_mut(&worker_id) {
                worker.record_failure();
            }
        }

        warn!(%batch_id, will_retry, "batch timed out");
        Ok(will_retry)
    }

    pub async fn list_pending(&self) -> Vec<Batch> {
        let inner = self.inner.lock().await;
        let mut pending: Vec<Batch> = inner
            .batches
            .values()
            .filter(|b| b.status == BatchStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|b| b.created_at);
        pending
    }

    /// Available workers ordered by quality: higher success rate first, then shorter
    /// average batch time.
    pub async fn list_available_workers(&self) -> Vec<Worker> {
        let inner = self.inner.lock().await;
        let mut workers: Vec<Worker> = inner
            .workers
            .values()
            .filter(|w| w.is_available())
            .cloned()
            .collect();
        workers.sort_by(|a, b| {
            b.success_rate()
                .partial_cmp(&a.success_rate())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    a.average_batch_time()
                        .partial_cmp(&b.average_batch_time())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });
        workers
    }

    pub async fn get_job(&self, job_id: &JobId) -> Result<Job, StoreError> {
        let inner = self.inner.lock().await;
        inner
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| StoreError::JobNotFound(job_id.clone()))
    }

    pub async fn get_worker(&self, worker_id: &WorkerId) -> Result<Worker, StoreError> {
        let inner = self.inner.lock().await;
        inner
            .workers
            .get(worker_id)
            .cloned()
            .ok_or_else(|| StoreError::WorkerNotFound(worker_id.clone()))
    }

    pub async fn get_batch(&self, batch_id: &BatchId) -> Result<Batch, StoreError> {
        let inner = self.inner.lock().await;
        inner
            .batches
            .get(batch_id)
            .cloned()
            .ok_or_else(|| StoreError::BatchNotFound(batch_id.clone()))
    }

    pub async fn mark_job_assembling(&self, job_id: &JobId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.clone()))?
            .start_assembling();
        Ok(())
    }

    pub async fn complete_job(&self, job_id: &JobId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.clone()))?
            .complete();
        Ok(())
    }

    pub async fn fail_job(&self, job_id: &JobId, err: impl Into<String>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.clone()))?
            .fail(err);
        Ok(())
    }

    /// Cancel a job and every one of its non-terminal batches. Batches are moved to
    /// `Failed` with a cancellation message (there is no separate cancelled state for
    /// batches); their workers are freed to `Idle` without a retry/ban penalty. Returns
    /// the (batch, worker) pairs that were in flight, so the caller can tell each
    /// worker to kill its child process and discard the work.
    pub async fn cancel_job(&self, job_id: &JobId) -> Result<Vec<(BatchId, WorkerId)>, StoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.jobs.contains_key(job_id) {
            return Err(StoreError::JobNotFound(job_id.clone()));
        }

        let mut in_flight = Vec::new();
        let batch_ids: Vec<BatchId> = inner
            .batches
            .values()
            .filter(|b| b.job_id == *job_id && !b.status.is_terminal())
            .map(|b| b.id.clone())
            .collect();

        for batch_id in batch_ids {
            let Some(batch) = inner.batches.get_mut(&batch_id) else {
                continue;
            };
            let worker_id = batch.assigned_worker.take();
            if matches!(batch.status, BatchStatus::Assigned | BatchStatus::Processing) {
                if let Some(worker_id) = worker_id.clone() {
                    in_flight.push((batch_id.clone(), worker_id));
                }
            }
            batch.status = BatchStatus::Failed;
            batch.error_message = Some("job cancelled".to_string());
            if let Some(worker_id) = worker_id {
                if let Some(worker) = inner.workers.get_mut(&worker_id) {
                    worker.current_batch = None;
                    worker.status = WorkerStatus::Idle;
                }
            }
        }

        inner.jobs.get_mut(job_id).expect("checked above").cancel();
        Ok(in_flight)
    }

    pub async fn job_progress(&self, job_id: &JobId) -> Result<JobProgress, StoreError> {
        let inner = self.inner.lock().await;
        let job = inner
            .jobs
            .get(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.clone()))?;

        let mut pending = 0;
        let mut assigned = 0;
        let mut processing = 0;
        let mut completed = 0;
        let mut failed = 0;

        for batch_id in &job.batch_ids {
            if let Some(batch) = inner.batches.get(batch_id) {
                match batch.status {
                    BatchStatus::Pending => pending += 1,
                    BatchStatus::Assigned => assigned += 1,
                    BatchStatus::Processing => processing += 1,
                    BatchStatus::Completed => completed += 1,
                    BatchStatus::Failed | BatchStatus::Timeout => failed += 1,
                    BatchStatus::Duplicate => {}
                }
            }
        }

        let total = job.batch_ids.len();
        let percent_complete = if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64 * 100.0
        };

        Ok(JobProgress {
            status: job.status,
            total_batches: total,
            pending,
            assigned,
            processing,
            completed,
            failed,
            percent_complete,
        })
    }

    /// Reclaim every non-terminal batch currently assigned to `worker_id`, releasing
    /// it back to `pending` without charging a retry (used on connection drop — a
    /// transient failure, not the worker's own fault).
    pub async fn release_worker_batches(&self, worker_id: &WorkerId) -> Vec<BatchId> {
        let mut inner = self.inner.lock().await;
        let affected: Vec<BatchId> = inner
            .batches
            .values()
            .filter(|b| b.assigned_worker.as_ref() == Some(worker_id) && !b.status.is_terminal())
            .map(|b| b.id.clone())
            .collect();

        for batch_id in &affected {
            if let Some(batch) = inner.batches.get_mut(batch_id) {
                batch.status = BatchStatus::Pending;
                batch.assigned_worker = None;
            }
        }
        affected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> WorkerCapabilities {
        WorkerCapabilities {
            gpu_count: 1,
            gpu_model: None,
            cpu_threads: 8,
            max_tile_size: 256,
        }
    }

    #[tokio::test]
    async fn claim_pending_batch_assigns_oldest_first() {
        let store = BatchStore::new();
        let job_id = store.create_job("/in.mp4", "/out.mp4").await;
        let b1 = store
            .create_batch(&job_id, 0, 49, vec![], "/work/b1")
            .await
            .unwrap();
        let _b2 = store
            .create_batch(&job_id, 50, 99, vec![], "/work/b2")
            .await
            .unwrap();

        let worker_id = WorkerId::new();
        store.register_worker(worker_id.clone(), "10.0.0.1:9001", caps()).await;
        store.set_worker_status(&worker_id, WorkerStatus::Connected).await.unwrap();

        let claimed = store.claim_pending_batch(&worker_id).await.unwrap().unwrap();
        assert_eq!(claimed, b1);
    }

    #[tokio::test]
    async fn duplicate_completion_race_has_one_winner() {
        let store = BatchStore::new();
        let job_id = store.create_job("/in.mp4", "/out.mp4").await;
        let original = store
            .create_batch(&job_id, 0, 49, vec![], "/work/b1")
            .await
            .unwrap();
        let duplicate = store.duplicate_batch(&original).await.unwrap();

        let w1 = WorkerId::new();
        let w2 = WorkerId::new();
        store.register_worker(w1.clone(), "10.0.0.1:1", caps()).await;
        store.register_worker(w2.clone(), "10.0.0.1:2", caps()).await;
        store.assign_batch_to_worker(&original, &w1).await.unwrap();
        store.assign_batch_to_worker(&duplicate, &w2).await.unwrap();

        store.complete_batch(&original, &w1, 50, 10.0).await.unwrap();
        let second = store.complete_batch(&duplicate, &w2, 50, 9.0).await;
        assert!(matches!(second, Err(StoreError::AlreadySettled(_))));

        let dup_batch = store.get_batch(&duplicate).await.unwrap();
        assert_eq!(dup_batch.status, BatchStatus::Duplicate);
    }

    #[tokio::test]
    async fn complete_batch_rejects_stale_result_after_reassignment() {
        let store = BatchStore::new();
        let job_id = store.create_job("/in.mp4", "/out.mp4").await;
        let batch_id = store.create_batch(&job_id, 0, 49, vec![], "/work/b1").await.unwrap();

        let w1 = WorkerId::new();
        let w2 = WorkerId::new();
        store.register_worker(w1.clone(), "10.0.0.1:1", caps()).await;
        store.register_worker(w2.clone(), "10.0.0.1:2", caps()).await;

        store.assign_batch_to_worker(&batch_id, &w1).await.unwrap();
        store.timeout_batch(&batch_id).await.unwrap();
        store.assign_batch_to_worker(&batch_id, &w2).await.unwrap();

        let late = store.complete_batch(&batch_id, &w1, 50, 10.0).await;
        assert!(matches!(late, Err(StoreError::StaleResult(_))));

        store.complete_batch(&batch_id, &w2, 50, 9.0).await.unwrap();
    }

    #[tokio::test]
    async fn job_progress_counts_each_batch_status() {
        let store = BatchStore::new();
        let job_id = store.create_job("/in.mp4", "/out.mp4").await;
        let b1 = store.create_batch(&job_id, 0, 49, vec![], "/work/b1").await.unwrap();
        let _b2 = store.create_batch(&job_id, 50, 99, vec![], "/work/b2").await.unwrap();

        let worker_id = WorkerId::new();
        store.register_worker(worker_id.clone(), "10.0.0.1:1", caps()).await;
        store.assign_batch_to_worker(&b1, &worker_id).await.unwrap();
        store.complete_batch(&b1, &worker_id, 50, 5.0).await.unwrap();

        let progress = store.job_progress(&job_id).await.unwrap();
        assert_eq!(progress.total_batches, 2);
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.pending, 1);
        assert!((progress.percent_complete - 50.0).abs() < 0.01);
    }
}
