//! HTTP API server for Vigil.

pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;

use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Router with request tracing, request ids, and CORS applied.
pub fn build_app(state: Arc<AppState>) -> Router {
    create_router(state)
        .layer(axum::middleware::from_fn(middleware::request_id))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::cors_layer())
}
