//! Metrics for classified frames and freeze episodes.
//!
//! The [`MetricsRecorder`] owns the aggregate state; [`PrometheusExporter`]
//! renders it for the `/metrics` pull endpoint.
//!
//! # Example
//!
//! ```ignore
//! use framewatch::metrics::{MetricsRecorder, PrometheusExporter};
//!
//! let recorder = Arc::new(MetricsRecorder::new());
//! recorder.record_classification("feed", "stream", QualityTier::High, FrameStatus::Ok, Utc::now());
//!
//! let text = PrometheusExporter::new(recorder).export();
//! ```

mod histogram;
mod prometheus;
mod recorder;

pub use histogram::{FREEZE_DURATION_BUCKETS, HistogramSnapshot};
pub use prometheus::PrometheusExporter;
pub use recorder::{FrameCountSample, MetricsRecorder, MetricsSnapshot, StreamSample};
