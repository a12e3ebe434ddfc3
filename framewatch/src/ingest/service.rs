//! Per-submission ingest pipeline.

use std::sync::Arc;
use std::time::Duration;

use frame_analysis::{ClassificationResult, Fingerprint, FrameAnalyzer, FrameStatus, QualityTier};
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::archive::ArchiveWriter;
use crate::domain::{ArchiveKey, FrameSubmission, LogEntry};
use crate::freeze::{FreezeOutcome, FreezeRegistry};
use crate::metrics::MetricsRecorder;
use crate::notification::{AlertDispatcher, AlertEvent, AlertKind};
use crate::{Error, Result};

/// What happened to one submitted frame.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub status: FrameStatus,
    pub quality: QualityTier,
    pub archive_key: ArchiveKey,
    pub fingerprint: Option<Fingerprint>,
    #[serde(skip)]
    pub freeze: FreezeOutcome,
}

/// Runs classification, freeze detection, metrics, archiving and alerting for
/// each frame.
pub struct FrameIngestService {
    analyzer: Arc<dyn FrameAnalyzer>,
    freeze: Arc<FreezeRegistry>,
    metrics: Arc<MetricsRecorder>,
    archive: Arc<ArchiveWriter>,
    alerts: AlertDispatcher,
}

impl FrameIngestService {
    pub fn new(
        analyzer: impl FrameAnalyzer + 'static,
        freeze: Arc<FreezeRegistry>,
        metrics: Arc<MetricsRecorder>,
        archive: Arc<ArchiveWriter>,
        alerts: AlertDispatcher,
    ) -> Self {
        Self {
            analyzer: Arc::new(analyzer),
            freeze,
            metrics,
            archive,
            alerts,
        }
    }

    pub fn freeze_registry(&self) -> &Arc<FreezeRegistry> {
        &self.freeze
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    pub fn archive(&self) -> &Arc<ArchiveWriter> {
        &self.archive
    }

    pub fn alerts(&self) -> &AlertDispatcher {
        &self.alerts
    }

    /// Process one frame.
    ///
    /// Only archive failures are returned; alert delivery happens in the
    /// background and never fails the submission.
    pub async fn ingest(&self, submission: FrameSubmission) -> Result<IngestOutcome> {
        let quality = submission.quality();
        let classification = self.classify(&submission).await?;
        let status = classification.status;

        self.metrics.record_classification(
            &submission.feed_id,
            &submission.stream_id,
            quality,
            status,
            submission.timestamp,
        );

        // Corrupt frames carry no fingerprint and never reach the detector.
        // A decodable frame whose hash failed is let through without a
        // freeze decision.
        let freeze = match classification.fingerprint {
            Some(fingerprint) => {
                let key = submission.stream_key();
                self.freeze
                    .observe_with(&key, fingerprint, submission.timestamp, |outcome| {
                        self.metrics
                            .record_freeze(&submission.feed_id, &submission.stream_id, outcome);
                    })
            }
            None => {
                if status != FrameStatus::Corrupt {
                    warn!(
                        feed_id = %submission.feed_id,
                        stream_id = %submission.stream_id,
                        "Frame decoded without a fingerprint, skipping freeze detection"
                    );
                }
                FreezeOutcome::default()
            }
        };

        let archive_key = self.archive.archive_frame(&submission).await?;
        self.archive
            .append_log(LogEntry {
                ts: submission.timestamp,
                feed_id: submission.feed_id.clone(),
                stream_id: submission.stream_id.clone(),
                status,
                extra: log_extra(quality, &archive_key, &classification, &freeze),
            })
            .await?;

        if !status.is_ok() {
            self.raise(AlertKind::Unhealthy, &submission, status, &archive_key);
        }
        if freeze.freeze_started {
            self.raise(AlertKind::FreezeStarted, &submission, status, &archive_key);
        }

        debug!(
            feed_id = %submission.feed_id,
            stream_id = %submission.stream_id,
            status = %status,
            quality = %quality,
            frozen = freeze.is_freeze_now,
            "Frame ingested"
        );

        Ok(IngestOutcome {
            status,
            quality,
            archive_key,
            fingerprint: classification.fingerprint,
            freeze,
        })
    }

    /// Decode and hashing are CPU-bound, so they run off the async workers.
    async fn classify(&self, submission: &FrameSubmission) -> Result<ClassificationResult> {
        let analyzer = Arc::clone(&self.analyzer);
        let bytes = submission.bytes.clone();
        tokio::task::spawn_blocking(move || analyzer.analyze(&bytes))
            .await
            .map_err(|e| Error::Other(format!("classification task failed: {e}")))
    }

    fn raise(&self, kind: AlertKind, submission: &FrameSubmission, status: FrameStatus, archive_key: &ArchiveKey) {
        let event = AlertEvent {
            kind,
            feed_id: submission.feed_id.clone(),
            stream_id: submission.stream_id.clone(),
            status,
            timestamp: submission.timestamp,
            archive_key: archive_key.clone(),
        };
        if self.alerts.is_enabled() && !self.alerts.dispatch(event) {
            debug!(kind = %kind, feed_id = %submission.feed_id, "Alert not queued");
        }
    }

    /// Drop freeze state of idle streams every `interval` until cancelled.
    pub fn start_freeze_sweeper(
        self: &Arc<Self>,
        idle_ttl: Duration,
        interval: Duration,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Freeze sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        service.sweep_idle(idle_ttl);
                    }
                }
            }
        })
    }

    /// Evict streams idle for longer than `idle_ttl`. Returns how many were removed.
    ///
    /// The active gauge of an evicted frozen stream is cleared while the
    /// registry still holds its key, so a new frame for the same stream
    /// cannot re-freeze it in between.
    pub fn sweep_idle(&self, idle_ttl: Duration) -> usize {
        self.freeze
            .evict_idle_with(idle_ttl, |stream| {
                if stream.was_frozen {
                    info!(
                        feed_id = %stream.key.feed_id,
                        stream_id = %stream.key.stream_id,
                        "Evicted a frozen stream; its freeze duration will not be recorded"
                    );
                    self.metrics
                        .clear_freeze_active(&stream.key.feed_id, &stream.key.stream_id);
                }
            })
            .len()
    }
}

fn log_extra(
    quality: QualityTier,
    archive_key: &ArchiveKey,
    classification: &ClassificationResult,
    freeze: &FreezeOutcome,
) -> serde_json::Value {
    let mut extra = json!({
        "quality": quality.as_str(),
        "archiveKey": archive_key.as_str(),
        "freeze": freeze.is_freeze_now,
    });
    if let Some(fingerprint) = classification.fingerprint {
        extra["fingerprint"] = json!(fingerprint.to_string());
    }
    if let Some(resolution) = classification.resolution {
        extra["decoded"] = json!(resolution.to_string());
    }
    if let Some(score) = classification.black_score {
        extra["blackScore"] = json!(score);
    }
    if let Some(duration) = freeze.freeze_ended {
        extra["freezeEndedSecs"] = json!(duration.as_secs_f64());
    }
    extra
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{BlobStore, MemoryBlobStore};
    use crate::domain::{ArchiveLayout, StreamKey};
    use bytes::Bytes;
    use chrono::{DateTime, TimeZone, Utc};
    use frame_analysis::{FrameClassifier, Resolution};
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn ts(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn png(image: RgbImage) -> Bytes {
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        Bytes::from(out.into_inner())
    }

    fn gradient() -> Bytes {
        png(RgbImage::from_fn(64, 48, |x, y| Rgb([(x * 4) as u8, (y * 5) as u8, 128])))
    }

    fn submission(bytes: Bytes, ms: i64) -> FrameSubmission {
        FrameSubmission {
            feed_id: "f1".into(),
            stream_id: "s1".into(),
            timestamp: ts(ms),
            width: Some(854),
            height: Some(480),
            bytes,
        }
    }

    /// Reports every frame as a decoded, healthy picture without a fingerprint.
    struct NoFingerprint;

    impl FrameAnalyzer for NoFingerprint {
        fn analyze(&self, _bytes: &[u8]) -> ClassificationResult {
            ClassificationResult {
                status: FrameStatus::Ok,
                fingerprint: None,
                resolution: Some(Resolution::new(854, 480)),
                black_score: Some(120.0),
            }
        }
    }

    fn service() -> (FrameIngestService, Arc<MemoryBlobStore>) {
        service_with(FrameClassifier::default())
    }

    fn service_with(analyzer: impl FrameAnalyzer + 'static) -> (FrameIngestService, Arc<MemoryBlobStore>) {
        let store = Arc::new(MemoryBlobStore::new());
        let metrics = Arc::new(MetricsRecorder::new());
        let service = FrameIngestService::new(
            analyzer,
            Arc::new(FreezeRegistry::new()),
            metrics.clone(),
            Arc::new(ArchiveWriter::new(store.clone(), ArchiveLayout::Tiered)),
            AlertDispatcher::disabled(metrics),
        );
        (service, store)
    }

    #[tokio::test]
    async fn test_ok_frame_is_counted_and_archived() {
        let (service, store) = service();
        let outcome = service.ingest(submission(gradient(), 1_700_000_000_000)).await.unwrap();

        assert_eq!(outcome.status, FrameStatus::Ok);
        assert_eq!(outcome.quality, QualityTier::High);
        assert!(outcome.fingerprint.is_some());
        assert_eq!(outcome.archive_key.as_str(), "f1/s1/high/2023-11-14T22:13:20.000Z.jpg");
        assert_eq!(
            service.metrics().frame_count("f1", "s1", QualityTier::High, FrameStatus::Ok),
            1
        );
        assert!(store.get(outcome.archive_key.as_str()).await.unwrap().is_some());

        let log = service.archive().read_log(ts(1_700_000_000_000).date_naive()).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].extra["quality"], "high");
    }

    #[tokio::test]
    async fn test_corrupt_frame_skips_freeze_detection() {
        let (service, _store) = service();
        let outcome = service
            .ingest(submission(Bytes::from_static(b"not an image"), 1_700_000_000_000))
            .await
            .unwrap();

        assert_eq!(outcome.status, FrameStatus::Corrupt);
        assert!(outcome.fingerprint.is_none());
        assert!(service.freeze_registry().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_frame_freezes_stream() {
        let (service, _store) = service();
        let frame = gradient();

        let first = service.ingest(submission(frame.clone(), 1_000)).await.unwrap();
        assert!(!first.freeze.is_freeze_now);

        let second = service.ingest(submission(frame.clone(), 2_000)).await.unwrap();
        assert!(second.freeze.freeze_started);
        assert!(service.metrics().freeze_active("f1", "s1"));
    }

    #[tokio::test]
    async fn test_sweep_clears_active_gauge() {
        let (service, _store) = service();
        let frame = gradient();
        service.ingest(submission(frame.clone(), 1_000)).await.unwrap();
        service.ingest(submission(frame, 2_000)).await.unwrap();
        assert!(service.metrics().freeze_active("f1", "s1"));

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(service.sweep_idle(Duration::ZERO), 1);
        assert!(service.freeze_registry().is_empty());
        assert!(!service.metrics().freeze_active("f1", "s1"));
    }

    #[tokio::test]
    async fn test_refrozen_stream_after_sweep_is_active() {
        let (service, _store) = service();
        let frame = gradient();
        service.ingest(submission(frame.clone(), 1_000)).await.unwrap();
        service.ingest(submission(frame.clone(), 2_000)).await.unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(service.sweep_idle(Duration::ZERO), 1);

        // The stream comes back and freezes again.
        service.ingest(submission(frame.clone(), 3_000)).await.unwrap();
        let outcome = service.ingest(submission(frame, 4_000)).await.unwrap();
        assert!(outcome.freeze.freeze_started);
        assert!(service.freeze_registry().is_frozen(&StreamKey::new("s1", "f1")));
        assert!(service.metrics().freeze_active("f1", "s1"));
    }

    #[tokio::test]
    async fn test_decoded_frame_without_fingerprint_skips_detection() {
        let (service, _store) = service_with(NoFingerprint);
        let bytes = Bytes::from_static(b"opaque");

        for ms in [1_700_000_000_000, 1_700_000_001_000] {
            let outcome = service.ingest(submission(bytes.clone(), ms)).await.unwrap();
            assert_eq!(outcome.status, FrameStatus::Ok);
            assert!(outcome.fingerprint.is_none());
            assert!(!outcome.freeze.is_freeze_now);
            assert!(!outcome.freeze.freeze_started);
        }

        assert!(service.freeze_registry().is_empty());
        assert_eq!(service.metrics().freeze_total("f1", "s1"), 0);
        assert_eq!(
            service.metrics().frame_count("f1", "s1", QualityTier::High, FrameStatus::Ok),
            2
        );

        let log = service.archive().read_log(ts(1_700_000_000_000).date_naive()).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].extra["freeze"], false);
        assert!(log[0].extra.get("fingerprint").is_none());
        assert_eq!(log[0].extra["blackScore"], 120.0);
    }
}
