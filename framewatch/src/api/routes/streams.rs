//! Freeze state listing.

use axum::{Json, Router, extract::State, routing::get};

use crate::api::models::StreamsResponse;
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_streams))
}

async fn list_streams(State(state): State<AppState>) -> Json<StreamsResponse> {
    let streams = state.ingest.freeze_registry().snapshot();
    Json(StreamsResponse {
        total: streams.len(),
        frozen: streams.iter().filter(|s| s.frozen).count(),
        streams,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::routes::test_support::{body_json, test_state};
    use crate::domain::{ArchiveLayout, StreamKey};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::{TimeZone, Utc};
    use frame_analysis::Fingerprint;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_list_streams() {
        let state = test_state(ArchiveLayout::Tiered);
        let registry = state.ingest.freeze_registry();
        let t0 = Utc.timestamp_millis_opt(1_000).unwrap();
        let fp = Fingerprint::from_bits(0xabcd);
        registry.observe(&StreamKey::new("s1", "f1"), fp, t0);
        registry.observe(&StreamKey::new("s1", "f1"), fp, t0);
        registry.observe(&StreamKey::new("s2", "f1"), fp, t0);

        let app = crate::api::routes::create_router(state);
        let response = app
            .oneshot(Request::builder().uri("/api/streams").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["total"], 2);
        assert_eq!(body["frozen"], 1);
        assert_eq!(body["streams"][0]["stream_id"], "s1");
        assert_eq!(body["streams"][0]["frozen"], true);
        assert_eq!(body["streams"][0]["last_fingerprint"], "000000000000abcd");
    }
}
