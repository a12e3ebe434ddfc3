//! Health check routes.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};

use crate::api::models::{ComponentHealth, HealthResponse};
use crate::api::server::AppState;

/// Create the health router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/live", get(liveness_check))
}

/// Overall status with per-component detail.
///
/// Alert channels with an open circuit make the service `degraded`; ingest
/// keeps working either way.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut components = vec![ComponentHealth {
        name: "freeze_registry".to_string(),
        status: "healthy".to_string(),
        message: Some(format!("{} streams tracked", state.ingest.freeze_registry().len())),
    }];
    components.extend(
        state
            .ingest
            .alerts()
            .channel_status()
            .into_iter()
            .map(ComponentHealth::from),
    );

    let degraded = components.iter().any(|c| c.status != "healthy");
    Json(HealthResponse {
        status: if degraded { "degraded" } else { "healthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        components,
    })
}

/// Readiness check - is the service ready to accept frames?
async fn readiness_check() -> impl IntoResponse {
    (StatusCode::OK, "ready")
}

/// Liveness check - is the service alive?
async fn liveness_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "alive",
            "uptime_secs": uptime
        })),
    )
}
