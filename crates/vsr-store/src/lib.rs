//! Batch Store: single source of truth for all job/batch/worker state. Exposes
//! transactional mutators; every other component reads through it.

pub mod error;
pub mod progress;
pub mod store;

pub use error::StoreError;
pub use progress::JobProgress;
pub use store::BatchStore;
