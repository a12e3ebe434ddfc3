//! Frame ingestion.
//!
//! [`FrameIngestService`] owns the freeze registry and drives every submitted
//! frame through classification, freeze detection, metrics, archiving and
//! alerting.

mod service;

pub use service::{FrameIngestService, IngestOutcome};
