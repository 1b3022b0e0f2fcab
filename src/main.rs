mod api;
mod config;
mod engine;
mod error;
mod geo;
mod models;
mod notify;
mod observability;
mod registry;
mod state;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::notify::AWAITING_DELIVERY_TOPIC;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    let config = config::Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let app_state = state::AppState::new(config.dispatch.clone(), config.event_buffer_size);
    let shared_state = Arc::new(app_state);

    let app = api::rest::router(shared_state.clone());

    tokio::spawn(engine::assignment::run_sweeper(shared_state.clone()));

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| error::AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(
        http_port = config.http_port,
        topic = AWAITING_DELIVERY_TOPIC,
        claim_attempts = config.dispatch.claim_attempts,
        "http server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| error::AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
