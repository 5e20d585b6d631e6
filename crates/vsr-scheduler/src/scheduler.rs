//! The Scheduler: keeps the fleet saturated, bounds tail latency, and recovers from
//! faults via three cooperative control loops.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::interval;
use tracing::{info, warn};

use vsr_core::{BatchId, BatchStatus, JobId, WorkerId};
use vsr_store::BatchStore;

use crate::config::SchedulerConfig;
use crate::events::{EventBus, SchedulerEvent};

pub struct Scheduler {
    store: Arc<BatchStore>,
    events: Arc<EventBus>,
    config: SchedulerConfig,
    wake: Notify,
}

impl Scheduler {
    pub fn new(store: Arc<BatchStore>, config: SchedulerConfig) -> Self {
        Self {
            store,
            events: Arc::new(EventBus::default()),
            config,
            wake: Notify::new(),
        }
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// Wake the assignment loop immediately — call this when a worker becomes
    /// available or a batch is newly created.
    pub fn notify(&self) {
        self.wake.notify_one();
    }

    /// Run the assignment loop forever: wakes on `notify()` or a bounded poll
    /// interval, whichever comes first.
    pub async fn run_assignment_loop(self: Arc<Self>) {
        info!(poll_secs = self.config.assignment_poll_secs, "assignment loop starting");
        loop {
            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(Duration::from_secs(self.config.assignment_poll_secs)) => {}
            }
            if let Err(e) = self.assignment_pass().await {
                warn!(error = %e, "assignment pass failed");
            }
        }
    }

    /// Run the timeout-reaping loop forever on a fixed interval.
    pub async fn run_timeout_loop(self: Arc<Self>) {
        info!(poll_secs = self.config.timeout_poll_secs, "timeout loop starting");
        let mut ticker = interval(Duration::from_secs(self.config.timeout_poll_secs));
        loop {
            ticker.tick().await;
            self.timeout_pass().await;
        }
    }

    async fn assignment_pass(&self) -> Result<(), vsr_store::StoreError> {
        let pending_before = self.store.list_pending().await;
        let workers = self.store.list_available_workers().await;

        let mut remaining_workers = Vec::new();
        let mut pending_left = pending_before.len();

        for worker in workers {
            if pending_left == 0 {
                remaining_workers.push(worker);
                continue;
            }
            match self.store.claim_pending_batch(&worker.id).await? {
                Some(batch_id) => {
                    pending_left = pending_left.saturating_sub(1);
                    self.events.emit(SchedulerEvent::BatchAssigned {
                        batch_id,
                        worker_id: worker.id,
                    });
                }
                None => remaining_workers.push(worker),
            }
        }

        if remaining_workers.is_empty() {
            return Ok(());
        }

        let still_pending = self.store.list_pending().await.len();
        if still_pending >= self.config.duplicate_threshold {
            return Ok(());
        }

        for worker in remaining_workers {
            let Some(oldest) = self.store.oldest_in_flight_batch().await else {
                break;
            };
            let duplicate_id = self.store.duplicate_batch(&oldest).await?;
            if self
                .store
                .assign_batch_to_worker(&duplicate_id, &worker.id)
                .await?
            {
                self.events.emit(SchedulerEvent::DuplicateCreated {
                    original: oldest,
                    duplicate: duplicate_id,
                    worker_id: worker.id,
                });
            }
        }

        Ok(())
    }

    async fn timeout_pass(&self) {
        let now = Utc::now();
        let ceiling = chrono::Duration::seconds(self.config.batch_timeout_secs);

        let in_flight_ids = self.store.list_in_flight().await;
        for batch_id in in_flight_ids {
            let Ok(batch) = self.store.get_batch(&batch_id).await else {
                continue;
            };
            let reference = batch.started_at.or(batch.assigned_at).unwrap_or(batch.created_at);
            if now.signed_duration_since(reference) > ceiling {
                match self.store.timeout_batch(&batch_id).await {
                    Ok(will_retry) => {
                        self.events.emit(SchedulerEvent::BatchTimedOut {
                            batch_id,
                            terminal: !will_retry,
                        });
                        self.notify();
                    }
                    Err(e) => warn!(%batch_id, error = %e, "failed to reap timed-out batch"),
                }
            }
        }
    }

    /// Called by the coordinator after a worker's `batch_result` has been recorded
    /// via [`BatchStore::complete_batch`]. Emits `JobReadyToAssemble` once every
    /// batch owned by the job has settled.
    pub async fn on_batch_completed(&self, batch_id: BatchId, job_id: JobId) {
        self.events.emit(SchedulerEvent::BatchCompleted { batch_id });
        self.notify();

        match self.store.job_progress(&job_id).await {
            Ok(progress) if progress.total_batches > 0 && progress.completed == progress.total_batches => {
                self.events.emit(SchedulerEvent::JobReadyToAssemble { job_id });
            }
            Ok(_) => {}
            Err(e) => warn!(%job_id, error = %e, "job progress lookup failed after completion"),
        }
    }

    /// Called by the coordinator after a worker's `batch_result` reports failure (or a
    /// decrypt/signature failure is attributed to the batch). Wakes the assignment
    /// loop since a non-terminal failure returns the batch to `pending`.
    pub async fn on_batch_failed(&self, batch_id: BatchId, terminal: bool) {
        self.events.emit(SchedulerEvent::BatchFailed { batch_id, terminal });
        if !terminal {
            self.notify();
        }
    }

    /// Called by the coordinator after [`vsr_store::BatchStore::cancel_job`] has moved
    /// a job's in-flight batches to `Failed`. Emits one [`SchedulerEvent::BatchCancelled`]
    /// per batch so each assigned worker's WebSocket task can push a `cancel_batch`
    /// message and abort the corresponding in-flight upscale.
    pub fn cancel_batches(&self, in_flight: Vec<(BatchId, WorkerId)>) {
        for (batch_id, worker_id) in in_flight {
            self.events.emit(SchedulerEvent::BatchCancelled { batch_id, worker_id });
        }
    }

    /// Called by the coordinator when a worker's connection drops. Releases the
    /// worker's in-flight batches back to `pending` without charging a retry (a
    /// transient failure per spec) and wakes the assignment loop.
    pub async fn on_worker_disconnected(&self, worker_id: &WorkerId) {
        let released = self.store.release_worker_batches(worker_id).await;
        if !released.is_empty() {
            info!(worker_id = %worker_id, count = released.len(), "released batches from disconnected worker");
            self.notify();
        }
    }

    pub fn batch_timeout_secs(&self) -> i64 {
        self.config.batch_timeout_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vsr_core::WorkerCapabilities;

    fn caps() -> WorkerCapabilities {
        WorkerCapabilities {
            gpu_count: 0,
            gpu_model: None,
            cpu_threads: 4,
            max_tile_size: 128,
        }
    }

    #[tokio::test]
    async fn assignment_pass_pairs_oldest_batch_with_available_worker() {
        let store = Arc::new(BatchStore::new());
        let job_id = store.create_job("/in.mp4", "/out.mp4").await;
        let batch_id = store
            .create_batch(&job_id, 0, 49, vec![], "/work/b1")
            .await
            .unwrap();

        let worker_id = WorkerId::new();
        store.register_worker(worker_id.clone(), "10.0.0.1:1", caps()).await;
        store
            .set_worker_status(&worker_id, vsr_core::WorkerStatus::Connected)
            .await
            .unwrap();

        let scheduler = Scheduler::new(store.clone(), SchedulerConfig::default());
        scheduler.assignment_pass().await.unwrap();

        let batch = store.get_batch(&batch_id).await.unwrap();
        assert_eq!(batch.status, BatchStatus::Assigned);
        assert_eq!(batch.assigned_worker, Some(worker_id));
    }

    #[tokio::test]
    async fn on_batch_completed_emits_ready_to_assemble_once_all_batches_done() {
        let store = Arc::new(BatchStore::new());
        let job_id = store.create_job("/in.mp4", "/out.mp4").await;
        let batch_id = store
            .create_batch(&job_id, 0, 49, vec![], "/work/b1")
            .await
            .unwrap();

        let worker_id = WorkerId::new();
        store.register_worker(worker_id.clone(), "10.0.0.1:1", caps()).await;
        store.assign_batch_to_worker(&batch_id, &worker_id).await.unwrap();
        store.complete_batch(&batch_id, &worker_id, 50, 3.0).await.unwrap();

        let scheduler = Scheduler::new(store.clone(), SchedulerConfig::default());
        let mut rx = scheduler.events().subscribe();
        scheduler.on_batch_completed(batch_id, job_id.clone()).await;

        let mut saw_ready = false;
        while let Ok(event) = rx.try_recv() {
            if let SchedulerEvent::JobReadyToAssemble { job_id: ready_job } = event {
                assert_eq!(ready_job, job_id);
                saw_ready = true;
            }
        }
        assert!(saw_ready);
    }
}
