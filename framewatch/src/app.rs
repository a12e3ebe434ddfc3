//! Wiring of the ingest pipeline from configuration.

use std::sync::Arc;

use frame_analysis::FrameClassifier;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::archive::{ArchiveWriter, BlobStore, FsBlobStore, MemoryBlobStore};
use crate::config::AppConfig;
use crate::freeze::FreezeRegistry;
use crate::ingest::FrameIngestService;
use crate::metrics::MetricsRecorder;
use crate::notification::{AlertChannel, AlertDispatcher, WebhookChannel};

/// Running pipeline and its background tasks.
pub struct App {
    pub ingest: Arc<FrameIngestService>,
    pub tasks: Vec<JoinHandle<()>>,
}

impl App {
    /// Build every component and start the alert worker and freeze sweeper.
    /// All background tasks stop when `cancel_token` is cancelled.
    pub fn start(config: &AppConfig, cancel_token: CancellationToken) -> Self {
        let metrics = Arc::new(MetricsRecorder::new());

        let store: Arc<dyn BlobStore> = match &config.archive.dir {
            Some(dir) => {
                info!(dir = %dir.display(), layout = ?config.archive.layout, "Archiving frames to filesystem");
                Arc::new(FsBlobStore::new(dir.clone()))
            }
            None => {
                info!(layout = ?config.archive.layout, "ARCHIVE_DIR not set; archiving frames in memory");
                Arc::new(MemoryBlobStore::new())
            }
        };
        let archive = Arc::new(ArchiveWriter::new(store, config.archive.layout));

        let channels: Vec<Arc<dyn AlertChannel>> =
            vec![Arc::new(WebhookChannel::new(config.alerts.webhook.clone()))];
        let (alerts, alert_worker) = AlertDispatcher::start(
            config.alerts.dispatcher.clone(),
            channels,
            metrics.clone(),
            cancel_token.clone(),
        );

        let ingest = Arc::new(FrameIngestService::new(
            FrameClassifier::new(config.analysis.classifier.clone()),
            Arc::new(FreezeRegistry::with_tolerance(config.analysis.fingerprint_tolerance)),
            metrics,
            archive,
            alerts,
        ));

        let sweeper = ingest.start_freeze_sweeper(
            config.freeze.idle_ttl,
            config.freeze.sweep_interval,
            cancel_token,
        );

        let mut tasks = vec![sweeper];
        tasks.extend(alert_worker);
        Self { ingest, tasks }
    }

    /// Wait for background tasks after cancellation.
    pub async fn join(self) {
        for task in futures::future::join_all(self.tasks).await {
            if let Err(e) = task {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
    }
}
