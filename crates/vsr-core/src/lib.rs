//! Shared data models for the upscale fleet coordinator and workers.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs and their lifecycle
//! - Batches, the unit of work dispatched to a worker
//! - Workers and fleet bookkeeping
//! - The wire message envelope exchanged over a worker's transport
//!
//! Nothing in this crate performs I/O; it is shared by `vsr-store`, `vsr-scheduler`,
//! `vsr-coordinator`, and `vsr-worker`.

pub mod batch;
pub mod ids;
pub mod job;
pub mod message;
pub mod worker;

pub use batch::{Batch, BatchStatus, DEFAULT_BATCH_SIZE, DEFAULT_MAX_RETRIES};
pub use ids::{BatchId, JobId, WorkerId};
pub use job::{AudioTrack, Job, JobStatus, SubtitleTrack};
pub use message::{BatchConfig, BatchResultStatus, HandshakeStatus, Message};
pub use worker::{Worker, WorkerCapabilities, WorkerStatus, BAN_DURATION_SECS, BAN_THRESHOLD};
