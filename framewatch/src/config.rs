//! Service configuration.
//!
//! Every section has sensible defaults and can be overridden from environment
//! variables (a `.env` file is loaded by the binary before this runs).
//! Unparseable values are ignored with a warning and the default is kept.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use frame_analysis::{BlackFramePolicy, ClassifierConfig};
use tracing::warn;

use crate::api::server::ApiServerConfig;
use crate::domain::ArchiveLayout;
use crate::notification::{AlertDispatcherConfig, WebhookAuth, WebhookConfig};

/// Read `name`, treating blank values as unset.
fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse `name` into `T`; warn and return `None` when it does not parse.
fn env_parse<T>(name: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env_var(name)?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(var = name, value = %raw, error = %e, "Ignoring invalid environment value");
            None
        }
    }
}

/// Classifier thresholds and freeze comparison tolerance.
#[derive(Debug, Clone, Default)]
pub struct AnalysisConfig {
    pub classifier: ClassifierConfig,
    /// Fingerprints within this Hamming distance count as the same frame.
    pub fingerprint_tolerance: u32,
}

impl AnalysisConfig {
    /// Supported env vars: `BLACK_POLICY`, `BLACK_LUMA_THRESHOLD`,
    /// `BLACK_PIXEL_CUTOFF`, `BLACK_RATIO_THRESHOLD`, `FINGERPRINT_TOLERANCE`.
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();
        let classifier = &mut config.classifier;

        if let Some(policy) = env_parse::<BlackFramePolicy>("BLACK_POLICY") {
            classifier.policy = policy;
        }
        if let Some(threshold) = env_parse::<f64>("BLACK_LUMA_THRESHOLD") {
            classifier.black_luma_threshold = threshold;
        }
        if let Some(cutoff) = env_parse::<u8>("BLACK_PIXEL_CUTOFF") {
            classifier.black_pixel_cutoff = cutoff;
        }
        if let Some(ratio) = env_parse::<f64>("BLACK_RATIO_THRESHOLD") {
            classifier.black_ratio_threshold = ratio.clamp(0.0, 1.0);
        }
        if let Some(tolerance) = env_parse::<u32>("FINGERPRINT_TOLERANCE") {
            config.fingerprint_tolerance = tolerance.min(64);
        }

        config
    }
}

/// Where and how frames are archived.
#[derive(Debug, Clone, Default)]
pub struct ArchiveConfig {
    /// Root of the filesystem blob store; frames stay in memory when unset.
    pub dir: Option<PathBuf>,
    pub layout: ArchiveLayout,
}

impl ArchiveConfig {
    /// Supported env vars: `ARCHIVE_DIR`, `ARCHIVE_LAYOUT` (`tiered` | `flat`).
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();
        if let Some(dir) = env_var("ARCHIVE_DIR") {
            config.dir = Some(PathBuf::from(dir));
        }
        if let Some(layout) = env_parse::<ArchiveLayout>("ARCHIVE_LAYOUT") {
            config.layout = layout;
        }
        config
    }
}

/// Outbound alerting.
#[derive(Debug, Clone, Default)]
pub struct AlertConfig {
    pub webhook: WebhookConfig,
    pub dispatcher: AlertDispatcherConfig,
}

impl AlertConfig {
    /// Supported env vars: `ALERT_WEBHOOK_URL`, `ALERT_WEBHOOK_TOKEN`,
    /// `ALERT_WEBHOOK_TIMEOUT_SECS`, `ALERT_QUEUE_SIZE`, `ALERT_MAX_RETRIES`,
    /// `ALERT_CIRCUIT_THRESHOLD`, `ALERT_CIRCUIT_COOLDOWN_SECS`.
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Some(url) = env_var("ALERT_WEBHOOK_URL") {
            config.webhook = WebhookConfig::for_url(url);
        }
        if let Some(token) = env_var("ALERT_WEBHOOK_TOKEN") {
            config.webhook.auth = Some(WebhookAuth::Bearer { token });
        }
        if let Some(timeout) = env_parse::<u64>("ALERT_WEBHOOK_TIMEOUT_SECS") {
            config.webhook.timeout_secs = timeout;
        }

        let dispatcher = &mut config.dispatcher;
        if let Some(size) = env_parse::<usize>("ALERT_QUEUE_SIZE") {
            dispatcher.queue_size = size.max(1);
        }
        if let Some(retries) = env_parse::<u32>("ALERT_MAX_RETRIES") {
            dispatcher.retry.max_retries = retries;
        }
        if let Some(threshold) = env_parse::<u32>("ALERT_CIRCUIT_THRESHOLD") {
            dispatcher.circuit_breaker_threshold = threshold;
        }
        if let Some(cooldown) = env_parse::<u64>("ALERT_CIRCUIT_COOLDOWN_SECS") {
            dispatcher.circuit_breaker_cooldown_secs = cooldown;
        }

        config
    }
}

/// Freeze state retention.
#[derive(Debug, Clone)]
pub struct FreezeConfig {
    /// Streams without a frame for this long are forgotten.
    pub idle_ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for FreezeConfig {
    fn default() -> Self {
        Self {
            idle_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl FreezeConfig {
    /// Supported env vars: `FREEZE_IDLE_TTL_SECS`, `FREEZE_SWEEP_INTERVAL_SECS`.
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();
        if let Some(secs) = env_parse::<u64>("FREEZE_IDLE_TTL_SECS") {
            config.idle_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("FREEZE_SWEEP_INTERVAL_SECS") {
            config.sweep_interval = Duration::from_secs(secs.max(1));
        }
        config
    }
}

/// All configuration sections.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub api: ApiServerConfig,
    pub analysis: AnalysisConfig,
    pub archive: ArchiveConfig,
    pub alerts: AlertConfig,
    pub freeze: FreezeConfig,
    /// Directory for rolling log files; console only when unset.
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env_or_default() -> Self {
        Self {
            api: ApiServerConfig::from_env_or_default(),
            analysis: AnalysisConfig::from_env_or_default(),
            archive: ArchiveConfig::from_env_or_default(),
            alerts: AlertConfig::from_env_or_default(),
            freeze: FreezeConfig::from_env_or_default(),
            log_dir: env_var("LOG_DIR").map(PathBuf::from),
        }
    }
}
