//! Runtime log filter routes.

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{LoggingConfigResponse, ModuleInfo, UpdateLogFilterRequest};
use crate::api::server::AppState;
use crate::logging::{LoggingConfig, available_modules};

pub fn router() -> Router<AppState> {
    Router::new().route("/filter", get(get_log_filter).put(update_log_filter))
}

fn logging_config(state: &AppState) -> ApiResult<&Arc<LoggingConfig>> {
    state
        .logging_config
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Logging is not configured"))
}

fn response(config: &LoggingConfig) -> LoggingConfigResponse {
    LoggingConfigResponse {
        filter: config.get_filter(),
        available_modules: available_modules()
            .into_iter()
            .map(|(name, description)| ModuleInfo {
                name: name.to_string(),
                description: description.to_string(),
            })
            .collect(),
    }
}

async fn get_log_filter(State(state): State<AppState>) -> ApiResult<Json<LoggingConfigResponse>> {
    Ok(Json(response(logging_config(&state)?)))
}

async fn update_log_filter(
    State(state): State<AppState>,
    Json(request): Json<UpdateLogFilterRequest>,
) -> ApiResult<Json<LoggingConfigResponse>> {
    let config = logging_config(&state)?;
    if request.filter.trim().is_empty() {
        return Err(ApiError::bad_request("Filter must not be empty"));
    }
    config.set_filter(request.filter.trim())?;
    Ok(Json(response(config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::routes::test_support::{body_json, test_state};
    use crate::domain::ArchiveLayout;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_filter_unavailable_without_logging() {
        let app = crate::api::routes::create_router(test_state(ArchiveLayout::Tiered));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/logging/filter")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/logging/filter")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"filter":"framewatch=debug"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["code"], "SERVICE_UNAVAILABLE");
    }
}
