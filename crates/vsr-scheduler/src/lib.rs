//! Scheduler: matches pending batches to available workers, issues duplicates when
//! stragglers hold the critical path, reaps timeouts, and drives retries.

pub mod config;
pub mod events;
pub mod scheduler;

pub use config::SchedulerConfig;
pub use events::{EventBus, SchedulerEvent};
pub use scheduler::Scheduler;
