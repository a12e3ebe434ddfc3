//! API route modules.

pub mod frames;
pub mod health;
pub mod logging;
pub mod logs;
pub mod metrics;
pub mod streams;

use axum::Router;

use crate::api::server::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/frames", frames::router())
        .nest("/api/streams", streams::router())
        .nest("/api/logs", logs::router())
        .nest("/api/logging", logging::router())
        .nest("/health", health::router())
        .merge(metrics::router())
        .with_state(state)
}
