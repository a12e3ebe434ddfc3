//! Metrics recorder implementation.
//!
//! Aggregates frame classification counters, freeze gauges and the freeze
//! duration histogram. Every operation is infallible and lock-light so the
//! ingest path is never blocked or aborted by metrics.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use frame_analysis::{FrameStatus, QualityTier};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::histogram::{FREEZE_DURATION_BUCKETS, Histogram, HistogramSnapshot};
use crate::freeze::FreezeOutcome;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FrameLabels {
    feed_id: String,
    stream_id: String,
    quality: QualityTier,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StreamLabels {
    feed_id: String,
    stream_id: String,
}

impl StreamLabels {
    fn new(feed_id: &str, stream_id: &str) -> Self {
        Self {
            feed_id: feed_id.to_string(),
            stream_id: stream_id.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct StatusCounters {
    ok: AtomicU64,
    black: AtomicU64,
    corrupt: AtomicU64,
}

impl StatusCounters {
    fn counter(&self, status: FrameStatus) -> &AtomicU64 {
        match status {
            FrameStatus::Ok => &self.ok,
            FrameStatus::Black => &self.black,
            FrameStatus::Corrupt => &self.corrupt,
        }
    }
}

#[derive(Debug)]
struct StreamSeries {
    freeze_total: AtomicU64,
    freeze_active: AtomicBool,
    latest_timestamp_ms: AtomicI64,
    freeze_duration: Mutex<Histogram>,
}

impl StreamSeries {
    fn new() -> Self {
        Self {
            freeze_total: AtomicU64::new(0),
            freeze_active: AtomicBool::new(false),
            latest_timestamp_ms: AtomicI64::new(0),
            freeze_duration: Mutex::new(Histogram::new(FREEZE_DURATION_BUCKETS)),
        }
    }
}

/// Aggregate health metrics for all monitored streams.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    frames: DashMap<FrameLabels, StatusCounters>,
    streams: DashMap<StreamLabels, StreamSeries>,

    // Alert delivery metrics
    alerts_sent_total: AtomicU64,
    alerts_failed_total: AtomicU64,
    alerts_dropped_total: AtomicU64,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Classification ==========

    /// Count one classified frame and move the stream's latest-timestamp gauge.
    pub fn record_classification(
        &self,
        feed_id: &str,
        stream_id: &str,
        quality: QualityTier,
        status: FrameStatus,
        timestamp: DateTime<Utc>,
    ) {
        let labels = FrameLabels {
            feed_id: feed_id.to_string(),
            stream_id: stream_id.to_string(),
            quality,
        };
        self.frames
            .entry(labels)
            .or_default()
            .counter(status)
            .fetch_add(1, Ordering::Relaxed);

        self.with_stream(feed_id, stream_id, |series| {
            series
                .latest_timestamp_ms
                .store(timestamp.timestamp_millis(), Ordering::Relaxed);
        });
    }

    /// Number of frames counted for `status` on one rendition.
    pub fn frame_count(
        &self,
        feed_id: &str,
        stream_id: &str,
        quality: QualityTier,
        status: FrameStatus,
    ) -> u64 {
        let labels = FrameLabels {
            feed_id: feed_id.to_string(),
            stream_id: stream_id.to_string(),
            quality,
        };
        self.frames
            .get(&labels)
            .map(|c| c.counter(status).load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    // ========== Freeze ==========

    /// Apply a freeze detector outcome.
    pub fn record_freeze(&self, feed_id: &str, stream_id: &str, outcome: &FreezeOutcome) {
        if !outcome.is_freeze_now && outcome.freeze_ended.is_none() {
            return;
        }

        self.with_stream(feed_id, stream_id, |series| {
            if outcome.is_freeze_now {
                series.freeze_total.fetch_add(1, Ordering::Relaxed);
            }
            if outcome.freeze_started {
                series.freeze_active.store(true, Ordering::Relaxed);
            }
            if let Some(duration) = outcome.freeze_ended {
                series.freeze_duration.lock().observe(duration.as_secs_f64());
                series.freeze_active.store(false, Ordering::Relaxed);
            }
        });
    }

    /// Reset the active gauge of a stream whose freeze state was discarded.
    pub fn clear_freeze_active(&self, feed_id: &str, stream_id: &str) {
        if let Some(series) = self.streams.get(&StreamLabels::new(feed_id, stream_id)) {
            series.freeze_active.store(false, Ordering::Relaxed);
        }
    }

    pub fn freeze_total(&self, feed_id: &str, stream_id: &str) -> u64 {
        self.streams
            .get(&StreamLabels::new(feed_id, stream_id))
            .map(|s| s.freeze_total.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn freeze_active(&self, feed_id: &str, stream_id: &str) -> bool {
        self.streams
            .get(&StreamLabels::new(feed_id, stream_id))
            .is_some_and(|s| s.freeze_active.load(Ordering::Relaxed))
    }

    pub fn freeze_durations(&self, feed_id: &str, stream_id: &str) -> Option<HistogramSnapshot> {
        self.streams
            .get(&StreamLabels::new(feed_id, stream_id))
            .map(|s| s.freeze_duration.lock().snapshot())
    }

    // ========== Alerts ==========

    pub fn record_alert_sent(&self) {
        self.alerts_sent_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert_failed(&self) {
        self.alerts_failed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert_dropped(&self) {
        self.alerts_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    // ========== Snapshot ==========

    /// Get a snapshot of all metrics, ordered by labels.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut frames: Vec<FrameCountSample> = self
            .frames
            .iter()
            .map(|entry| {
                let (labels, counters) = entry.pair();
                FrameCountSample {
                    feed_id: labels.feed_id.clone(),
                    stream_id: labels.stream_id.clone(),
                    quality: labels.quality,
                    ok: counters.ok.load(Ordering::Relaxed),
                    black: counters.black.load(Ordering::Relaxed),
                    corrupt: counters.corrupt.load(Ordering::Relaxed),
                }
            })
            .collect();
        frames.sort_by(|a, b| {
            (&a.feed_id, &a.stream_id, a.quality.as_str())
                .cmp(&(&b.feed_id, &b.stream_id, b.quality.as_str()))
        });

        let mut streams: Vec<StreamSample> = self
            .streams
            .iter()
            .map(|entry| {
                let (labels, series) = entry.pair();
                StreamSample {
                    feed_id: labels.feed_id.clone(),
                    stream_id: labels.stream_id.clone(),
                    freeze_total: series.freeze_total.load(Ordering::Relaxed),
                    freeze_active: series.freeze_active.load(Ordering::Relaxed),
                    latest_timestamp_seconds: series.latest_timestamp_ms.load(Ordering::Relaxed)
                        as f64
                        / 1000.0,
                    freeze_duration: series.freeze_duration.lock().snapshot(),
                }
            })
            .collect();
        streams.sort_by(|a, b| (&a.feed_id, &a.stream_id).cmp(&(&b.feed_id, &b.stream_id)));

        MetricsSnapshot {
            frames,
            streams,
            alerts_sent_total: self.alerts_sent_total.load(Ordering::Relaxed),
            alerts_failed_total: self.alerts_failed_total.load(Ordering::Relaxed),
            alerts_dropped_total: self.alerts_dropped_total.load(Ordering::Relaxed),
        }
    }

    fn with_stream(&self, feed_id: &str, stream_id: &str, f: impl FnOnce(&StreamSeries)) {
        let series = self
            .streams
            .entry(StreamLabels::new(feed_id, stream_id))
            .or_insert_with(StreamSeries::new);
        f(&series);
    }
}

/// Classification counters of one rendition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameCountSample {
    pub feed_id: String,
    pub stream_id: String,
    pub quality: QualityTier,
    pub ok: u64,
    pub black: u64,
    pub corrupt: u64,
}

/// Freeze and freshness series of one stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSample {
    pub feed_id: String,
    pub stream_id: String,
    pub freeze_total: u64,
    pub freeze_active: bool,
    pub latest_timestamp_seconds: f64,
    pub freeze_duration: HistogramSnapshot,
}

/// Snapshot of all metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub frames: Vec<FrameCountSample>,
    pub streams: Vec<StreamSample>,
    pub alerts_sent_total: u64,
    pub alerts_failed_total: u64,
    pub alerts_dropped_total: u64,
}
