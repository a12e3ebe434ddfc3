//! Daily ingest log lookup.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use chrono::NaiveDate;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::DailyLogResponse;
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/{date}", get(get_daily_log))
}

/// Entries of one UTC day (`YYYY-MM-DD`), oldest first.
async fn get_daily_log(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> ApiResult<Json<DailyLogResponse>> {
    let day = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|_| ApiError::bad_request("Invalid date; expected YYYY-MM-DD"))?;

    let entries = state.ingest.archive().read_log(day).await?;
    Ok(Json(DailyLogResponse {
        date: day.format("%Y-%m-%d").to_string(),
        entries,
    }))
}
