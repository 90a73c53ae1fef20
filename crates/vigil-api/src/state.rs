//! Application state shared across handlers.

use std::sync::Arc;
use vigil_builder::Orchestrator;
use vigil_core::CacheDefinition;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Baseline caches registered by `POST /caches/initialize`.
    pub defaults: Arc<Vec<CacheDefinition>>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, defaults: Vec<CacheDefinition>) -> Self {
        Self {
            orchestrator,
            defaults: Arc::new(defaults),
        }
    }
}
