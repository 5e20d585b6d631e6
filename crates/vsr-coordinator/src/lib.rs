//! Coordinator: job submission, batch scheduling, and the per-worker WebSocket
//! protocol that couples the fleet to the Batch Store and Scheduler.

pub mod assembly;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod ws;

pub use config::CoordinatorConfig;
pub use routes::create_router;
pub use state::AppState;
