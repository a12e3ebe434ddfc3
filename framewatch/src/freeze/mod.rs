//! Freeze detection.
//!
//! Each `(stream_id, feed_id)` keeps the fingerprint of its last decoded
//! frame. A repeat of that fingerprint marks the stream frozen; the first
//! different fingerprint afterwards ends the episode and reports how long it
//! lasted.

mod registry;

pub use registry::{EvictedStream, FreezeOutcome, FreezeRegistry, FreezeStateView};
