//! framewatch library crate.
//!
//! Thumbnail health monitoring for live streams: every uploaded frame is
//! classified (ok / black / corrupt), compared with the previous frame of its
//! stream to detect freezes, counted in metrics, archived, and alerted on when
//! unhealthy.

pub mod api;
pub mod app;
pub mod archive;
pub mod config;
pub mod domain;
pub mod error;
pub mod freeze;
pub mod ingest;
pub mod logging;
pub mod metrics;
pub mod notification;

pub use error::{Error, Result};
