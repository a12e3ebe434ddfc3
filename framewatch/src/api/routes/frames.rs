//! Frame upload route.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, header},
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;
use tracing::debug;

use crate::api::envelope::SubmissionEnvelope;
use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{FrameListQuery, FrameListResponse, FrameResponse};
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_frames).post(submit_frame))
        .route("/{*key}", get(get_frame))
}

/// Accept one thumbnail in either the JSON or the binary shape.
async fn submit_frame(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<FrameResponse>> {
    let submission = SubmissionEnvelope::from_parts(&headers, body)
        .and_then(|envelope| envelope.into_submission(Utc::now()))
        .map_err(|e| {
            debug!(error = %e, "Rejected frame upload");
            ApiError::bad_request(e.to_string())
        })?;

    let outcome = state.ingest.ingest(submission).await?;
    Ok(Json(outcome.into()))
}

/// Archived frame keys, optionally narrowed to a key prefix such as `f1/s1/`.
async fn list_frames(
    State(state): State<AppState>,
    Query(query): Query<FrameListQuery>,
) -> ApiResult<Json<FrameListResponse>> {
    let prefix = query.prefix.unwrap_or_default();
    let keys = state.ingest.archive().list_frames(&prefix).await?;
    Ok(Json(FrameListResponse {
        total: keys.len(),
        keys,
    }))
}

/// Raw bytes of one archived frame.
async fn get_frame(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    if !is_archive_key(&key) {
        return Err(ApiError::bad_request("Invalid frame key"));
    }
    let bytes = state.ingest.archive().read_frame(&key).await?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes))
}

fn is_archive_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}
