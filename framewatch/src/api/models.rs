//! API request and response bodies.

use frame_analysis::{Fingerprint, FrameStatus, QualityTier};
use serde::{Deserialize, Serialize};

use crate::domain::LogEntry;
use crate::freeze::FreezeStateView;
use crate::ingest::IngestOutcome;
use crate::notification::ChannelStatus;

/// Freeze part of a frame response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreezeInfo {
    /// The frame repeats the previous frame of its stream.
    pub active: bool,
    /// Length of the freeze episode this frame ended, if any.
    pub ended_duration_secs: Option<f64>,
}

/// Response to `POST /api/frames`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameResponse {
    pub status: FrameStatus,
    pub quality: QualityTier,
    pub archive_key: String,
    pub fingerprint: Option<Fingerprint>,
    pub freeze: FreezeInfo,
}

impl From<IngestOutcome> for FrameResponse {
    fn from(outcome: IngestOutcome) -> Self {
        Self {
            status: outcome.status,
            quality: outcome.quality,
            archive_key: outcome.archive_key.to_string(),
            fingerprint: outcome.fingerprint,
            freeze: FreezeInfo {
                active: outcome.freeze.is_freeze_now,
                ended_duration_secs: outcome.freeze.freeze_ended.map(|d| d.as_secs_f64()),
            },
        }
    }
}

/// Query of `GET /api/frames`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FrameListQuery {
    pub prefix: Option<String>,
}

/// Response to `GET /api/frames`.
#[derive(Debug, Clone, Serialize)]
pub struct FrameListResponse {
    pub total: usize,
    pub keys: Vec<String>,
}

/// Response to `GET /api/streams`.
#[derive(Debug, Clone, Serialize)]
pub struct StreamsResponse {
    pub total: usize,
    pub frozen: usize,
    pub streams: Vec<FreezeStateView>,
}

/// Response to `GET /api/logs/{date}`.
#[derive(Debug, Clone, Serialize)]
pub struct DailyLogResponse {
    pub date: String,
    pub entries: Vec<LogEntry>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub components: Vec<ComponentHealth>,
}

/// Health of one component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<ChannelStatus> for ComponentHealth {
    fn from(channel: ChannelStatus) -> Self {
        let open = channel.circuit == crate::notification::CircuitState::Open;
        Self {
            name: format!("alerts.{}", channel.channel_type),
            status: if open { "degraded" } else { "healthy" }.to_string(),
            message: open.then(|| "circuit open, alerts are being skipped".to_string()),
        }
    }
}

/// Request for `PUT /api/logging/filter`.
#[derive(Debug, Deserialize)]
pub struct UpdateLogFilterRequest {
    pub filter: String,
}

/// Response for the logging configuration.
#[derive(Debug, Serialize)]
pub struct LoggingConfigResponse {
    pub filter: String,
    pub available_modules: Vec<ModuleInfo>,
}

#[derive(Debug, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    pub description: String,
}

