//! Retry backoff and circuit breaking for alert delivery.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Backoff schedule for redelivering an alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to each delay.
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based); zero for the first try.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay_ms as f64
            * self
                .backoff_multiplier
                .powi(attempt.saturating_sub(1) as i32);
        let delay_ms = base_delay.min(self.max_delay_ms as f64) as u64;

        let jitter = if self.use_jitter {
            (delay_ms as f64 * 0.25 * rand::random::<f64>()) as u64
        } else {
            0
        };

        Duration::from_millis(delay_ms + jitter)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Deliveries flow normally.
    Closed,
    /// Deliveries are rejected until the cooldown passes.
    Open,
    /// Cooldown passed; the next delivery decides.
    HalfOpen,
}

/// Consecutive-failure circuit breaker for one alert channel.
pub struct CircuitBreaker {
    state: Mutex<CircuitState>,
    opened_at: Mutex<Option<Instant>>,
    failure_count: AtomicU32,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: Mutex::new(CircuitState::Closed),
            opened_at: Mutex::new(None),
            failure_count: AtomicU32::new(0),
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    pub fn state(&self) -> CircuitState {
        let mut state = self.state.lock();
        if *state == CircuitState::Open
            && let Some(opened_at) = *self.opened_at.lock()
            && opened_at.elapsed() >= self.cooldown
        {
            *state = CircuitState::HalfOpen;
            debug!("Alert circuit breaker half-open");
        }
        *state
    }

    pub fn is_allowed(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        if *state != CircuitState::Closed {
            info!("Alert circuit breaker closed after successful delivery");
        }
        *state = CircuitState::Closed;
        *self.opened_at.lock() = None;
        self.failure_count.store(0, Ordering::SeqCst);
    }

    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.lock();
        let reopen = *state == CircuitState::HalfOpen;
        if reopen || (*state == CircuitState::Closed && failures >= self.failure_threshold) {
            *state = CircuitState::Open;
            *self.opened_at.lock() = Some(Instant::now());
            warn!(failures, "Alert circuit breaker opened");
        }
    }
}
