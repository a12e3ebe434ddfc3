//! Per-stream freeze state registry.
//!
//! The registry is owned by the ingest service and shared by every request.
//! Read-compare-write of a key happens under the DashMap entry guard, so two
//! concurrent frames for the same stream are applied one after the other and
//! a freeze episode can only end once.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use frame_analysis::Fingerprint;
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::StreamKey;

/// Result of feeding one fingerprint to the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FreezeOutcome {
    /// The frame repeats the previous one.
    pub is_freeze_now: bool,
    /// This frame is the one that moved the stream into the frozen state.
    pub freeze_started: bool,
    /// Set when this frame ended a freeze episode.
    pub freeze_ended: Option<Duration>,
}

#[derive(Debug, Clone)]
struct FreezeState {
    last_fingerprint: Fingerprint,
    frozen_since: Option<DateTime<Utc>>,
    last_touched: Instant,
}

impl FreezeState {
    fn new(fingerprint: Fingerprint) -> Self {
        Self {
            last_fingerprint: fingerprint,
            frozen_since: None,
            last_touched: Instant::now(),
        }
    }

    fn advance(&mut self, fingerprint: Fingerprint, now: DateTime<Utc>, tolerance: u32) -> FreezeOutcome {
        let mut outcome = FreezeOutcome::default();

        if self.last_fingerprint.matches(&fingerprint, tolerance) {
            outcome.is_freeze_now = true;
            if self.frozen_since.is_none() {
                self.frozen_since = Some(now);
                outcome.freeze_started = true;
            }
        } else if let Some(since) = self.frozen_since.take() {
            // Out-of-order timestamps clamp to zero rather than going negative.
            outcome.freeze_ended = Some((now - since).to_std().unwrap_or_default());
        }

        self.last_fingerprint = fingerprint;
        self.last_touched = Instant::now();
        outcome
    }
}

/// Read-only view of one stream's freeze state.
#[derive(Debug, Clone, Serialize)]
pub struct FreezeStateView {
    pub feed_id: String,
    pub stream_id: String,
    pub last_fingerprint: Fingerprint,
    pub frozen: bool,
    pub frozen_since: Option<DateTime<Utc>>,
    pub idle_secs: u64,
}

/// A key removed by [`FreezeRegistry::evict_idle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictedStream {
    pub key: StreamKey,
    /// The stream was mid-episode; its duration will never be observed.
    pub was_frozen: bool,
}

/// Concurrent freeze state, one entry per stream key.
#[derive(Debug, Default)]
pub struct FreezeRegistry {
    states: DashMap<StreamKey, FreezeState>,
    tolerance: u32,
}

impl FreezeRegistry {
    /// Create a registry that treats fingerprints as equal only when identical.
    pub fn new() -> Self {
        Self::with_tolerance(0)
    }

    /// Create a registry that treats fingerprints within `tolerance` bits as equal.
    pub fn with_tolerance(tolerance: u32) -> Self {
        Self {
            states: DashMap::new(),
            tolerance,
        }
    }

    /// Feed a fingerprint observed at `now` for `key`.
    pub fn observe(&self, key: &StreamKey, fingerprint: Fingerprint, now: DateTime<Utc>) -> FreezeOutcome {
        self.observe_with(key, fingerprint, now, |_| {})
    }

    /// Like [`observe`](Self::observe), running `on_outcome` while the key is
    /// still locked so side effects are ordered the same way as transitions.
    pub fn observe_with<F>(
        &self,
        key: &StreamKey,
        fingerprint: Fingerprint,
        now: DateTime<Utc>,
        on_outcome: F,
    ) -> FreezeOutcome
    where
        F: FnOnce(&FreezeOutcome),
    {
        match self.states.entry(key.clone()) {
            Entry::Vacant(vacant) => {
                debug!(stream = %key, fingerprint = %fingerprint, "First frame for stream");
                let _guard = vacant.insert(FreezeState::new(fingerprint));
                let outcome = FreezeOutcome::default();
                on_outcome(&outcome);
                outcome
            }
            Entry::Occupied(mut occupied) => {
                let outcome = occupied.get_mut().advance(fingerprint, now, self.tolerance);
                if outcome.freeze_started {
                    info!(stream = %key, since = %now, "Stream frozen");
                }
                if let Some(duration) = outcome.freeze_ended {
                    info!(stream = %key, duration_secs = duration.as_secs_f64(), "Stream recovered from freeze");
                }
                on_outcome(&outcome);
                outcome
            }
        }
    }

    /// Whether `key` is currently frozen.
    pub fn is_frozen(&self, key: &StreamKey) -> bool {
        self.states
            .get(key)
            .is_some_and(|state| state.frozen_since.is_some())
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Drop keys that have not seen a frame for longer than `ttl`.
    pub fn evict_idle(&self, ttl: Duration) -> Vec<EvictedStream> {
        self.evict_idle_with(ttl, |_| {})
    }

    /// Like [`evict_idle`](Self::evict_idle), running `on_evict` for each
    /// removed key while its shard is still locked. A frame for that key
    /// arriving concurrently is applied only after `on_evict` returns.
    pub fn evict_idle_with<F>(&self, ttl: Duration, mut on_evict: F) -> Vec<EvictedStream>
    where
        F: FnMut(&EvictedStream),
    {
        let mut evicted = Vec::new();
        self.states.retain(|key, state| {
            if state.last_touched.elapsed() > ttl {
                let stream = EvictedStream {
                    key: key.clone(),
                    was_frozen: state.frozen_since.is_some(),
                };
                on_evict(&stream);
                evicted.push(stream);
                false
            } else {
                true
            }
        });

        if !evicted.is_empty() {
            debug!(count = evicted.len(), "Evicted idle freeze states");
        }
        evicted
    }

    /// Current state of every tracked stream, ordered by key.
    pub fn snapshot(&self) -> Vec<FreezeStateView> {
        let mut views: Vec<FreezeStateView> = self
            .states
            .iter()
            .map(|entry| {
                let (key, state) = entry.pair();
                FreezeStateView {
                    feed_id: key.feed_id.clone(),
                    stream_id: key.stream_id.clone(),
                    last_fingerprint: state.last_fingerprint,
                    frozen: state.frozen_since.is_some(),
                    frozen_since: state.frozen_since,
                    idle_secs: state.last_touched.elapsed().as_secs(),
                }
            })
            .collect();
        views.sort_by(|a, b| (&a.feed_id, &a.stream_id).cmp(&(&b.feed_id, &b.stream_id)));
        views
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    const A: Fingerprint = Fingerprint::from_bits(0xAAAA_AAAA_AAAA_AAAA);
    const B: Fingerprint = Fingerprint::from_bits(0x5555_5555_5555_5555);

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn key() -> StreamKey {
        StreamKey::new("s1", "f1")
    }

    #[test]
    fn test_first_observation_never_freezes() {
        let registry = FreezeRegistry::new();
        let outcome = registry.observe(&key(), A, at(0));
        assert_eq!(outcome, FreezeOutcome::default());
        assert!(!registry.is_frozen(&key()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_freeze_sequence() {
        let registry = FreezeRegistry::new();

        let first = registry.observe(&key(), A, at(0));
        assert!(!first.is_freeze_now);

        let second = registry.observe(&key(), A, at(10));
        assert!(second.is_freeze_now);
        assert!(second.freeze_started);
        assert!(registry.is_frozen(&key()));

        let third = registry.observe(&key(), A, at(20));
        assert!(third.is_freeze_now);
        assert!(!third.freeze_started);
        assert_eq!(registry.snapshot()[0].frozen_since, Some(at(10)));

        let fourth = registry.observe(&key(), B, at(35));
        assert!(!fourth.is_freeze_now);
        assert_eq!(fourth.freeze_ended, Some(Duration::from_secs(25)));
        assert!(!registry.is_frozen(&key()));
    }

    #[test]
    fn test_changing_content_never_freezes() {
        let registry = FreezeRegistry::new();
        for (i, fp) in [A, B, A, B].into_iter().enumerate() {
            let outcome = registry.observe(&key(), fp, at(i as i64));
            assert_eq!(outcome, FreezeOutcome::default());
        }
    }

    #[test]
    fn test_keys_are_independent() {
        let registry = FreezeRegistry::new();
        let other = StreamKey::new("s2", "f1");

        registry.observe(&key(), A, at(0));
        registry.observe(&other, A, at(0));
        assert!(registry.observe(&key(), A, at(1)).freeze_started);
        assert!(!registry.is_frozen(&other));
    }

    #[test]
    fn test_out_of_order_end_clamps_to_zero() {
        let registry = FreezeRegistry::new();
        registry.observe(&key(), A, at(10));
        registry.observe(&key(), A, at(20));
        let outcome = registry.observe(&key(), B, at(5));
        assert_eq!(outcome.freeze_ended, Some(Duration::ZERO));
    }

    #[test]
    fn test_tolerance_treats_near_hashes_as_equal() {
        let registry = FreezeRegistry::with_tolerance(2);
        let near = Fingerprint::from_bits(A.bits() ^ 0b11);
        registry.observe(&key(), A, at(0));
        assert!(registry.observe(&key(), near, at(1)).freeze_started);
    }

    #[test]
    fn test_callback_sees_outcome() {
        let registry = FreezeRegistry::new();
        registry.observe(&key(), A, at(0));
        let mut seen = None;
        registry.observe_with(&key(), A, at(1), |outcome| seen = Some(*outcome));
        assert!(seen.unwrap().freeze_started);
    }

    #[test]
    fn test_evict_idle_reports_frozen_keys() {
        let registry = FreezeRegistry::new();
        let other = StreamKey::new("s2", "f1");
        registry.observe(&key(), A, at(0));
        registry.observe(&key(), A, at(1));
        registry.observe(&other, B, at(0));

        assert!(registry.evict_idle(Duration::from_secs(3600)).is_empty());

        std::thread::sleep(Duration::from_millis(5));
        let mut evicted = registry.evict_idle(Duration::ZERO);
        evicted.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(
            evicted,
            vec![
                EvictedStream { key: key(), was_frozen: true },
                EvictedStream { key: other, was_frozen: false },
            ]
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_evict_callback_runs_before_key_is_reused() {
        let registry = Arc::new(FreezeRegistry::new());
        registry.observe(&key(), A, at(0));
        registry.observe(&key(), A, at(1));
        std::thread::sleep(Duration::from_millis(5));

        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        let evictor = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                registry.evict_idle_with(Duration::ZERO, |stream| {
                    entered_tx.send(stream.was_frozen).unwrap();
                    release_rx.recv().unwrap();
                })
            })
        };

        // The evicted stream is still locked, so this frame must wait.
        assert!(entered_rx.recv().unwrap());
        let observer = {
            let registry = registry.clone();
            std::thread::spawn(move || registry.observe(&key(), A, at(100)))
        };
        std::thread::sleep(Duration::from_millis(20));
        assert!(!observer.is_finished());

        release_tx.send(()).unwrap();
        assert_eq!(evictor.join().unwrap().len(), 1);
        // The frame landed after eviction, so it starts a fresh history.
        assert_eq!(observer.join().unwrap(), FreezeOutcome::default());
        assert!(registry.observe(&key(), A, at(101)).freeze_started);
    }

    #[test]
    fn test_concurrent_recovery_ends_episode_once() {
        let registry = Arc::new(FreezeRegistry::new());
        registry.observe(&key(), A, at(0));
        registry.observe(&key(), A, at(1));

        let handles: Vec<_> = (0..8i64)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let fp = Fingerprint::from_bits(0x1000 + i as u64);
                    registry.observe(&key(), fp, at(10 + i))
                })
            })
            .collect();

        let ended = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|outcome| outcome.freeze_ended.is_some())
            .count();
        assert_eq!(ended, 1);
    }
}
