//! API route definitions.

use axum::{
    Router,
    routing::{get, post, put},
};
use std::sync::Arc;

use crate::handlers::{admin, caches, health};
use crate::state::AppState;

/// Create the main API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api/v1", api_routes())
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .with_state(state)
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest("/caches", cache_routes())
}

fn cache_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(caches::list_caches))
        .route("/initialize", post(admin::initialize_defaults))
        .route("/policy", put(admin::set_policy_all))
        .route("/{name}", get(caches::get_cache))
        .route("/{name}/status", get(caches::get_status))
        .route("/{name}/processing", get(caches::get_processing_status))
        .route("/{name}/ensure-fresh", post(caches::ensure_fresh))
        .route("/{name}/invalidate", post(caches::invalidate))
        .route("/{name}/usage", post(caches::report_usage))
        .route("/{name}/errors", get(caches::recent_errors))
        .route("/{name}/refresh", post(admin::refresh))
        .route("/{name}/cancel", post(admin::cancel))
        .route("/{name}/policy", put(admin::set_policy))
        .route("/{name}/reset", post(admin::reset))
}
