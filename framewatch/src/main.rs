use std::sync::Arc;

use framewatch::api::{ApiServer, AppState};
use framewatch::app::App;
use framewatch::config::AppConfig;
use framewatch::logging;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env_or_default();
    let (logging_config, _log_guard) = logging::init_logging(config.log_dir.as_deref())?;

    let cancel_token = CancellationToken::new();
    logging_config.start_retention_cleanup(cancel_token.clone());

    let app = App::start(&config, cancel_token.clone());
    let state = AppState::new(Arc::clone(&app.ingest)).with_logging(logging_config);
    let server = ApiServer::new(config.api.clone(), state, cancel_token.clone());

    let shutdown = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown signal received");
        shutdown.cancel();
    });

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "framewatch started");
    let result = server.run().await;

    cancel_token.cancel();
    app.join().await;
    result?;

    tracing::info!("framewatch stopped");
    Ok(())
}
