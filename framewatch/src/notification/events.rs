//! Alert events emitted by the ingest path.

use chrono::{DateTime, Utc};
use frame_analysis::FrameStatus;
use serde::{Deserialize, Serialize};

use crate::domain::ArchiveKey;

/// Why an alert was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// The frame classified as black or corrupt.
    Unhealthy,
    /// The stream just started repeating the same frame.
    FreezeStarted,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unhealthy => "unhealthy",
            Self::FreezeStarted => "freeze_started",
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload handed to alert channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub kind: AlertKind,
    pub feed_id: String,
    pub stream_id: String,
    pub status: FrameStatus,
    pub timestamp: DateTime<Utc>,
    pub archive_key: ArchiveKey,
}

impl AlertEvent {
    pub fn title(&self) -> String {
        match self.kind {
            AlertKind::Unhealthy => {
                format!("{} frame on {}/{}", self.status, self.feed_id, self.stream_id)
            }
            AlertKind::FreezeStarted => {
                format!("Stream {}/{} is frozen", self.feed_id, self.stream_id)
            }
        }
    }
}
