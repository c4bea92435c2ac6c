//! Gateway entry point.

use std::net::SocketAddr;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fhirgate_server::{router, AppConfig, AppState};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    info!(
        upstream = %config.upstream_base(),
        listen = %config.listen,
        dev_mode = config.dev_mode,
        pool_total = config.max_connection_total,
        pool_per_route = config.max_connection_per_route,
        "Starting gateway"
    );

    let listen = config.listen.clone();
    let state = match AppState::new(config) {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "Failed to initialize");
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(&listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, listen = %listen, "Failed to bind");
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        error!(error = %e, "Server exited with error");
        std::process::exit(1);
    }
}
