//! HTTP API: frame uploads, metrics scrape, diagnostics and health.

pub mod envelope;
pub mod error;
pub mod models;
pub mod routes;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use server::{ApiServer, ApiServerConfig, AppState};
