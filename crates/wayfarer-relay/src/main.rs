//! Relay server binary.
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load configuration from the environment
//! 3. Build shared state with the logging contact notifier
//! 4. Serve until Ctrl-C

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use wayfarer_relay::{AppState, LogNotifier, RelayConfig, start_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("wayfarer-relay starting");

    let config = RelayConfig::from_env()?;
    info!(
        host = %config.server.host,
        port = config.server.port,
        broadcast_capacity = config.broadcast_capacity,
        "Configuration loaded"
    );

    let state = Arc::new(AppState::with_notifier(
        config.broadcast_capacity,
        Arc::new(LogNotifier),
    ));

    if let Err(e) = start_server(&config.server, state).await {
        error!(error = %e, "relay server exited with error");
        return Err(e.into());
    }

    info!("wayfarer-relay stopped");
    Ok(())
}
