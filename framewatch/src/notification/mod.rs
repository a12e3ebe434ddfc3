//! Alert notification.
//!
//! Unhealthy frames and freeze transitions become [`AlertEvent`]s that the
//! [`AlertDispatcher`] delivers to every enabled [`AlertChannel`] in the
//! background.

pub mod channels;
mod dispatcher;
mod events;
mod resilience;

pub use channels::{AlertChannel, WebhookAuth, WebhookChannel, WebhookConfig};
pub use dispatcher::{AlertDispatcher, AlertDispatcherConfig, ChannelStatus};
pub use events::{AlertEvent, AlertKind};
pub use resilience::{CircuitBreaker, CircuitState, RetryConfig};
