//! Domain types shared across the ingest path.

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, SecondsFormat, SubsecRound, Utc};
use frame_analysis::{FrameStatus, QualityTier};
use serde::{Deserialize, Serialize};

/// A normalized frame upload, ready for classification.
#[derive(Debug, Clone)]
pub struct FrameSubmission {
    pub feed_id: String,
    pub stream_id: String,
    pub timestamp: DateTime<Utc>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub bytes: Bytes,
}

impl FrameSubmission {
    pub fn quality(&self) -> QualityTier {
        QualityTier::from_dimensions(self.width, self.height)
    }

    pub fn stream_key(&self) -> StreamKey {
        StreamKey::new(&self.stream_id, &self.feed_id)
    }
}

/// Identity of one monitored rendition: `(stream_id, feed_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamKey {
    pub stream_id: String,
    pub feed_id: String,
}

impl StreamKey {
    pub fn new(stream_id: impl Into<String>, feed_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            feed_id: feed_id.into(),
        }
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.feed_id, self.stream_id)
    }
}

/// How archive keys are laid out in the blob store.
///
/// `Tiered` is the default. Deployments that do not report rendition
/// dimensions can pick `Flat` (`ARCHIVE_LAYOUT=flat`) so keys carry no
/// `unknown` quality segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveLayout {
    /// `{feed}/{stream}/{quality}/{ts}.jpg`
    #[default]
    Tiered,
    /// `{feed}/{stream}/{ts}.jpg`
    Flat,
}

impl std::str::FromStr for ArchiveLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tiered" => Ok(Self::Tiered),
            "flat" => Ok(Self::Flat),
            other => Err(format!("unknown archive layout: {other}")),
        }
    }
}

/// Deterministic blob key for an archived frame.
///
/// The timestamp is truncated to whole seconds, so two frames of the same
/// rendition within one second share a key and the later one overwrites.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArchiveKey(String);

impl ArchiveKey {
    pub fn new(
        layout: ArchiveLayout,
        feed_id: &str,
        stream_id: &str,
        quality: QualityTier,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let ts = timestamp
            .trunc_subsecs(0)
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        let key = match layout {
            ArchiveLayout::Tiered => format!("{feed_id}/{stream_id}/{quality}/{ts}.jpg"),
            ArchiveLayout::Flat => format!("{feed_id}/{stream_id}/{ts}.jpg"),
        };
        Self(key)
    }

    pub fn for_submission(layout: ArchiveLayout, submission: &FrameSubmission) -> Self {
        Self::new(
            layout,
            &submission.feed_id,
            &submission.stream_id,
            submission.quality(),
            submission.timestamp,
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArchiveKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One line of the daily ingest log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub ts: DateTime<Utc>,
    pub feed_id: String,
    pub stream_id: String,
    pub status: FrameStatus,
    #[serde(default)]
    pub extra: serde_json::Value,
}

/// Blob key of the daily log for the UTC day `date`.
pub fn daily_log_key(date: NaiveDate) -> String {
    format!("logs/{}.json", date.format("%Y-%m-%d"))
}
