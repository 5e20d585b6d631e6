//! Shared application state.

use std::sync::Arc;

use vsr_crypto::{Keypair, ReplayGuard, SessionStore};
use vsr_scheduler::Scheduler;
use vsr_store::BatchStore;

use crate::config::CoordinatorConfig;

/// Shared application state, cloned into every handler and WebSocket task.
#[derive(Clone)]
pub struct AppState {
    pub config: CoordinatorConfig,
    pub store: Arc<BatchStore>,
    pub scheduler: Arc<Scheduler>,
    pub sessions: Arc<SessionStore>,
    pub replay_guard: Arc<ReplayGuard>,
    /// The coordinator's own handshake keypair, used to decrypt the session key
    /// workers wrap with it and to sign server-originated payloads.
    pub keypair: Arc<Keypair>,
}

impl AppState {
    pub fn new(config: CoordinatorConfig, store: Arc<BatchStore>, scheduler: Arc<Scheduler>) -> Result<Self, vsr_crypto::SessionError> {
        let keypair = Keypair::generate()?;
        Ok(Self {
            config,
            store,
            scheduler,
            sessions: Arc::new(SessionStore::new()),
            replay_guard: Arc::new(ReplayGuard::new()),
            keypair: Arc::new(keypair),
        })
    }
}
