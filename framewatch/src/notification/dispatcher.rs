//! Alert dispatcher.
//!
//! Alerts are queued on a bounded channel and delivered by a background
//! worker, so a slow or failing endpoint never delays ingestion:
//! - enqueue is non-blocking; a full queue drops the alert and counts it
//! - each channel gets exponential-backoff retries
//! - a per-channel circuit breaker skips channels that keep failing

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::channels::AlertChannel;
use super::events::AlertEvent;
use super::resilience::{CircuitBreaker, CircuitState, RetryConfig};
use crate::metrics::MetricsRecorder;

/// Configuration for the alert dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertDispatcherConfig {
    /// Maximum number of alerts waiting for delivery.
    pub queue_size: usize,
    pub retry: RetryConfig,
    /// Consecutive failures that open a channel's circuit.
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown_secs: u64,
}

impl Default for AlertDispatcherConfig {
    fn default() -> Self {
        Self {
            queue_size: 256,
            retry: RetryConfig::default(),
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown_secs: 60,
        }
    }
}

struct RuntimeChannel {
    channel: Arc<dyn AlertChannel>,
    breaker: CircuitBreaker,
}

/// Delivery state of one channel, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    pub channel_type: String,
    pub circuit: CircuitState,
}

/// Handle used by the ingest path to raise alerts.
#[derive(Clone)]
pub struct AlertDispatcher {
    tx: Option<mpsc::Sender<AlertEvent>>,
    channels: Arc<Vec<RuntimeChannel>>,
    metrics: Arc<MetricsRecorder>,
}

impl AlertDispatcher {
    /// A dispatcher with no channels; every alert is discarded.
    pub fn disabled(metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            tx: None,
            channels: Arc::new(Vec::new()),
            metrics,
        }
    }

    /// Start the delivery worker for the enabled `channels`.
    ///
    /// The worker drains the queue until `cancel_token` fires.
    pub fn start(
        config: AlertDispatcherConfig,
        channels: Vec<Arc<dyn AlertChannel>>,
        metrics: Arc<MetricsRecorder>,
        cancel_token: CancellationToken,
    ) -> (Self, Option<JoinHandle<()>>) {
        let cooldown = Duration::from_secs(config.circuit_breaker_cooldown_secs);
        let channels: Vec<RuntimeChannel> = channels
            .into_iter()
            .filter(|c| c.is_enabled())
            .map(|channel| RuntimeChannel {
                channel,
                breaker: CircuitBreaker::new(config.circuit_breaker_threshold, cooldown),
            })
            .collect();

        if channels.is_empty() {
            info!("No alert channels enabled; alerts will be discarded");
            return (Self::disabled(metrics), None);
        }

        let (tx, rx) = mpsc::channel(config.queue_size.max(1));
        let channels = Arc::new(channels);
        info!(channels = channels.len(), queue_size = config.queue_size, "Alert dispatcher started");

        let worker = tokio::spawn(run_worker(
            rx,
            channels.clone(),
            config.retry,
            metrics.clone(),
            cancel_token,
        ));

        (
            Self {
                tx: Some(tx),
                channels,
                metrics,
            },
            Some(worker),
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue an alert without waiting. Returns whether it was accepted.
    pub fn dispatch(&self, event: AlertEvent) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };

        match tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    kind = %event.kind,
                    feed_id = %event.feed_id,
                    stream_id = %event.stream_id,
                    "Alert queue full, dropping alert"
                );
                self.metrics.record_alert_dropped();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Alert worker stopped, dropping alert");
                self.metrics.record_alert_dropped();
                false
            }
        }
    }

    pub fn channel_status(&self) -> Vec<ChannelStatus> {
        self.channels
            .iter()
            .map(|c| ChannelStatus {
                channel_type: c.channel.channel_type().to_string(),
                circuit: c.breaker.state(),
            })
            .collect()
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<AlertEvent>,
    channels: Arc<Vec<RuntimeChannel>>,
    retry: RetryConfig,
    metrics: Arc<MetricsRecorder>,
    cancel_token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!("Alert dispatcher shutting down");
                break;
            }
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        for runtime in channels.iter() {
            if deliver(runtime, &event, &retry, &cancel_token).await {
                metrics.record_alert_sent();
            } else {
                metrics.record_alert_failed();
            }
        }
    }
}

/// Deliver `event` on one channel, retrying with backoff. Never surfaces errors.
async fn deliver(
    runtime: &RuntimeChannel,
    event: &AlertEvent,
    retry: &RetryConfig,
    cancel_token: &CancellationToken,
) -> bool {
    let channel_type = runtime.channel.channel_type();
    let mut attempt = 0;

    loop {
        if !runtime.breaker.is_allowed() {
            warn!(channel = channel_type, kind = %event.kind, "Circuit open, skipping alert");
            return false;
        }

        match runtime.channel.send(event).await {
            Ok(()) => {
                runtime.breaker.record_success();
                return true;
            }
            Err(e) => {
                runtime.breaker.record_failure();
                if !retry.should_retry(attempt) {
                    warn!(
                        channel = channel_type,
                        kind = %event.kind,
                        attempts = attempt + 1,
                        error = %e,
                        "Alert delivery failed"
                    );
                    return false;
                }

                attempt += 1;
                let delay = retry.delay_for_attempt(attempt);
                debug!(channel = channel_type, attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying alert");
                tokio::select! {
                    _ = cancel_token.cancelled() => return false,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ArchiveKey, ArchiveLayout};
    use crate::notification::events::AlertKind;
    use crate::{Error, Result};
    use async_trait::async_trait;
    use chrono::Utc;
    use frame_analysis::{FrameStatus, QualityTier};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Records alerts and fails the first `fail_first` sends.
    struct RecordingChannel {
        sent: Mutex<Vec<AlertEvent>>,
        attempts: AtomicU32,
        fail_first: u32,
    }

    impl RecordingChannel {
        fn new(fail_first: u32) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                attempts: AtomicU32::new(0),
                fail_first,
            })
        }
    }

    #[async_trait]
    impl AlertChannel for RecordingChannel {
        fn channel_type(&self) -> &'static str {
            "recording"
        }

        fn is_enabled(&self) -> bool {
            true
        }

        async fn send(&self, event: &AlertEvent) -> Result<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_first {
                return Err(Error::Notification("endpoint down".into()));
            }
            self.sent.lock().push(event.clone());
            Ok(())
        }
    }

    fn event(kind: AlertKind) -> AlertEvent {
        let timestamp = Utc::now();
        AlertEvent {
            kind,
            feed_id: "f1".into(),
            stream_id: "s1".into(),
            status: FrameStatus::Black,
            timestamp,
            archive_key: ArchiveKey::new(ArchiveLayout::Flat, "f1", "s1", QualityTier::Unknown, timestamp),
        }
    }

    fn fast_config() -> AlertDispatcherConfig {
        AlertDispatcherConfig {
            retry: RetryConfig {
                max_retries: 3,
                initial_delay_ms: 1,
                max_delay_ms: 5,
                backoff_multiplier: 2.0,
                use_jitter: false,
            },
            ..Default::default()
        }
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_disabled_dispatcher_discards() {
        let dispatcher = AlertDispatcher::disabled(Arc::new(MetricsRecorder::new()));
        assert!(!dispatcher.is_enabled());
        assert!(!dispatcher.dispatch(event(AlertKind::Unhealthy)));
    }

    #[tokio::test]
    async fn test_delivers_alerts() {
        let channel = RecordingChannel::new(0);
        let metrics = Arc::new(MetricsRecorder::new());
        let (dispatcher, worker) = AlertDispatcher::start(
            fast_config(),
            vec![channel.clone()],
            metrics.clone(),
            CancellationToken::new(),
        );
        assert!(worker.is_some());

        assert!(dispatcher.dispatch(event(AlertKind::Unhealthy)));
        assert!(dispatcher.dispatch(event(AlertKind::FreezeStarted)));

        wait_for(|| channel.sent.lock().len() == 2).await;
        let kinds: Vec<_> = channel.sent.lock().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![AlertKind::Unhealthy, AlertKind::FreezeStarted]);
        wait_for(|| metrics.snapshot().alerts_sent_total == 2).await;
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let channel = RecordingChannel::new(2);
        let metrics = Arc::new(MetricsRecorder::new());
        let (dispatcher, _worker) = AlertDispatcher::start(
            fast_config(),
            vec![channel.clone()],
            metrics.clone(),
            CancellationToken::new(),
        );

        dispatcher.dispatch(event(AlertKind::Unhealthy));
        wait_for(|| channel.sent.lock().len() == 1).await;
        assert_eq!(channel.attempts.load(Ordering::SeqCst), 3);
        wait_for(|| metrics.snapshot().alerts_sent_total == 1).await;
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let channel = RecordingChannel::new(u32::MAX);
        let metrics = Arc::new(MetricsRecorder::new());
        let (dispatcher, _worker) = AlertDispatcher::start(
            fast_config(),
            vec![channel.clone()],
            metrics.clone(),
            CancellationToken::new(),
        );

        dispatcher.dispatch(event(AlertKind::Unhealthy));
        wait_for(|| metrics.snapshot().alerts_failed_total == 1).await;
        assert_eq!(channel.attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_open_circuit_skips_channel() {
        let channel = RecordingChannel::new(u32::MAX);
        let metrics = Arc::new(MetricsRecorder::new());
        let config = AlertDispatcherConfig {
            circuit_breaker_threshold: 2,
            circuit_breaker_cooldown_secs: 3600,
            ..fast_config()
        };
        let (dispatcher, _worker) =
            AlertDispatcher::start(config, vec![channel.clone()], metrics.clone(), CancellationToken::new());

        dispatcher.dispatch(event(AlertKind::Unhealthy));
        dispatcher.dispatch(event(AlertKind::Unhealthy));
        wait_for(|| metrics.snapshot().alerts_failed_total == 2).await;

        // The breaker opened after two failed attempts of the first alert.
        assert_eq!(channel.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.channel_status()[0].circuit, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let metrics = Arc::new(MetricsRecorder::new());
        let (tx, _rx) = mpsc::channel(1);
        let dispatcher = AlertDispatcher {
            tx: Some(tx),
            channels: Arc::new(Vec::new()),
            metrics: metrics.clone(),
        };

        assert!(dispatcher.dispatch(event(AlertKind::Unhealthy)));
        assert!(!dispatcher.dispatch(event(AlertKind::Unhealthy)));
        assert_eq!(metrics.snapshot().alerts_dropped_total, 1);
    }

    #[tokio::test]
    async fn test_worker_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let (_dispatcher, worker) = AlertDispatcher::start(
            fast_config(),
            vec![RecordingChannel::new(0)],
            Arc::new(MetricsRecorder::new()),
            cancel.clone(),
        );

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), worker.unwrap())
            .await
            .unwrap()
            .unwrap();
    }
}
