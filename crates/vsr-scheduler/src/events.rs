//! Typed, multi-consumer scheduler events, replacing a callback-driven emitter.

use tokio::sync::broadcast;
use vsr_core::{BatchId, JobId, WorkerId};

#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    BatchAssigned { batch_id: BatchId, worker_id: WorkerId },
    DuplicateCreated { original: BatchId, duplicate: BatchId, worker_id: WorkerId },
    BatchCompleted { batch_id: BatchId },
    BatchFailed { batch_id: BatchId, terminal: bool },
    BatchTimedOut { batch_id: BatchId, terminal: bool },
    BatchCancelled { batch_id: BatchId, worker_id: WorkerId },
    JobReadyToAssemble { job_id: JobId },
    JobCompleted { job_id: JobId },
}

/// Broadcasts [`SchedulerEvent`]s to any number of subscribers (coordinator WS
/// handlers, metrics, logging).
pub struct EventBus {
    sender: broadcast::Sender<SchedulerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.sender.subscribe()
    }

    /// Emit an event. Silently dropped if there are currently no subscribers.
    pub fn emit(&self, event: SchedulerEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
