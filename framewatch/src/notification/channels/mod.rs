//! Alert channels.

mod webhook;

pub use webhook::{WebhookAuth, WebhookChannel, WebhookConfig};

use async_trait::async_trait;

use super::events::AlertEvent;
use crate::Result;

/// Trait for alert delivery channels.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    /// Get the channel type name.
    fn channel_type(&self) -> &'static str;

    /// Check if the channel is enabled.
    fn is_enabled(&self) -> bool;

    /// Deliver one alert. A returned error is retried by the dispatcher.
    async fn send(&self, event: &AlertEvent) -> Result<()>;
}
