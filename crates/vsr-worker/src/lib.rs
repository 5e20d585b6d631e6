//! Worker Executor: the per-machine process that holds a persistent, encrypted
//! WebSocket connection to the coordinator, accepts one batch assignment at a time,
//! and runs it through the external upscaler.

pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod processor;
pub mod upscaler;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
