//! Normalizes the two accepted upload shapes into a [`FrameSubmission`].
//!
//! - JSON: `{feedId, streamId, timestamp, width?, height?, thumbnail}` where
//!   `thumbnail` is base64 or a `data:` URL.
//! - Binary: the body is the image and metadata travels in `x-*` headers.

use axum::http::{HeaderMap, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::domain::FrameSubmission;

pub const FEED_ID_HEADER: &str = "x-feed-id";
pub const STREAM_ID_HEADER: &str = "x-stream-id";
pub const TIMESTAMP_HEADER: &str = "x-timestamp";
pub const WIDTH_HEADER: &str = "x-width";
pub const HEIGHT_HEADER: &str = "x-height";

/// Why an upload was rejected before reaching the ingest pipeline.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("invalid JSON body: {0}")]
    Json(String),
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl EnvelopeError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Epoch milliseconds or an RFC 3339 string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TimestampValue {
    Millis(i64),
    Text(String),
}

impl TimestampValue {
    fn resolve(&self, field: &'static str) -> Result<DateTime<Utc>, EnvelopeError> {
        match self {
            Self::Millis(ms) => from_millis(*ms, field),
            Self::Text(text) => parse_timestamp(text, field),
        }
    }
}

fn from_millis(ms: i64, field: &'static str) -> Result<DateTime<Utc>, EnvelopeError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| EnvelopeError::invalid(field, "out of range"))
}

fn parse_timestamp(text: &str, field: &'static str) -> Result<DateTime<Utc>, EnvelopeError> {
    let text = text.trim();
    if let Ok(ms) = text.parse::<i64>() {
        return from_millis(ms, field);
    }
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EnvelopeError::invalid(field, e.to_string()))
}

/// JSON upload body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonEnvelope {
    pub feed_id: Option<String>,
    pub stream_id: Option<String>,
    pub timestamp: Option<TimestampValue>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub thumbnail: Option<String>,
}

/// Raw image body with header metadata.
#[derive(Debug, Clone, Default)]
pub struct BinaryEnvelope {
    pub feed_id: Option<String>,
    pub stream_id: Option<String>,
    pub timestamp: Option<String>,
    pub width: Option<String>,
    pub height: Option<String>,
    pub body: Bytes,
}

/// One upload in either accepted wire shape.
#[derive(Debug, Clone)]
pub enum SubmissionEnvelope {
    Json(JsonEnvelope),
    Binary(BinaryEnvelope),
}

impl SubmissionEnvelope {
    /// Pick the shape from the content type: JSON for `application/json`
    /// (and `+json` types), binary otherwise.
    pub fn from_parts(headers: &HeaderMap, body: Bytes) -> Result<Self, EnvelopeError> {
        if is_json(headers) {
            let envelope = serde_json::from_slice::<JsonEnvelope>(&body)
                .map_err(|e| EnvelopeError::Json(e.to_string()))?;
            return Ok(Self::Json(envelope));
        }

        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Ok(Self::Binary(BinaryEnvelope {
            feed_id: header(FEED_ID_HEADER),
            stream_id: header(STREAM_ID_HEADER),
            timestamp: header(TIMESTAMP_HEADER),
            width: header(WIDTH_HEADER),
            height: header(HEIGHT_HEADER),
            body,
        }))
    }

    /// Validate and convert; a missing timestamp means `received_at`.
    pub fn into_submission(self, received_at: DateTime<Utc>) -> Result<FrameSubmission, EnvelopeError> {
        match self {
            Self::Json(envelope) => {
                let feed_id = require_id(envelope.feed_id, "feedId")?;
                let stream_id = require_id(envelope.stream_id, "streamId")?;
                let timestamp = match &envelope.timestamp {
                    Some(ts) => ts.resolve("timestamp")?,
                    None => received_at,
                };
                let thumbnail = envelope
                    .thumbnail
                    .filter(|t| !t.trim().is_empty())
                    .ok_or(EnvelopeError::Missing("thumbnail"))?;
                let bytes = decode_thumbnail(&thumbnail)?;

                Ok(FrameSubmission {
                    feed_id,
                    stream_id,
                    timestamp,
                    width: envelope.width,
                    height: envelope.height,
                    bytes,
                })
            }
            Self::Binary(envelope) => {
                let feed_id = require_id(envelope.feed_id, FEED_ID_HEADER)?;
                let stream_id = require_id(envelope.stream_id, STREAM_ID_HEADER)?;
                let timestamp = match &envelope.timestamp {
                    Some(ts) => parse_timestamp(ts, TIMESTAMP_HEADER)?,
                    None => received_at,
                };
                if envelope.body.is_empty() {
                    return Err(EnvelopeError::Missing("request body"));
                }

                Ok(FrameSubmission {
                    feed_id,
                    stream_id,
                    timestamp,
                    width: parse_dimension(envelope.width, WIDTH_HEADER)?,
                    height: parse_dimension(envelope.height, HEIGHT_HEADER)?,
                    bytes: envelope.body,
                })
            }
        }
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| {
            let mime = mime.trim().to_ascii_lowercase();
            mime == "application/json" || mime.ends_with("+json")
        })
        .unwrap_or(false)
}

/// Ids become archive path segments, so they must be single segments.
fn require_id(value: Option<String>, field: &'static str) -> Result<String, EnvelopeError> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(EnvelopeError::Missing(field))?;
    if value == "." || value == ".." || value.contains(['/', '\\']) {
        return Err(EnvelopeError::invalid(field, "must be a single path segment"));
    }
    Ok(value)
}

fn parse_dimension(value: Option<String>, field: &'static str) -> Result<Option<u32>, EnvelopeError> {
    value
        .map(|v| {
            v.parse::<u32>()
                .map_err(|e| EnvelopeError::invalid(field, e.to_string()))
        })
        .transpose()
}

/// Decode plain base64 or a `data:<mime>;base64,<payload>` URL.
fn decode_thumbnail(thumbnail: &str) -> Result<Bytes, EnvelopeError> {
    let payload = match thumbnail.trim().strip_prefix("data:") {
        Some(rest) => {
            let (meta, data) = rest
                .split_once(',')
                .ok_or_else(|| EnvelopeError::invalid("thumbnail", "malformed data URL"))?;
            if !meta.ends_with(";base64") {
                return Err(EnvelopeError::invalid("thumbnail", "data URL is not base64"));
            }
            data
        }
        None => thumbnail,
    };

    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| EnvelopeError::invalid("thumbnail", e.to_string()))?;
    if bytes.is_empty() {
        return Err(EnvelopeError::Missing("thumbnail"));
    }
    Ok(Bytes::from(bytes))
}
