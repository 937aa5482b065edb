mod analytics;
mod bootstrap;
mod chat;
mod health;
mod scheduler;

use std::time::Duration;

use anyhow::Result;
use ragdesk_core::config::{AppConfig, LoadOptions};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use ragdesk_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let router = chat::router(chat::ChatState::new(
        app.runtime.clone(),
        app.feedback.clone(),
        app.config.server.default_company_id.clone(),
    ))
    .merge(analytics::router(analytics::AnalyticsState::new(
        app.analytics.clone(),
        app.scheduler.clone(),
        app.config.server.default_company_id.clone(),
    )))
    .merge(health::router(app.db_pool.clone()));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    let learning = app.scheduler.spawn();

    info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "ragdesk-server listening"
    );
    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

    info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "ragdesk-server stopping"
    );
    if let Some(handle) = learning {
        handle.abort();
    }
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, app.db_pool.close()).await.is_err() {
        warn!(
            event_name = "system.server.pool_close_timeout",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "database pool did not close within the grace period"
        );
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "failed to listen for shutdown signal"
        );
    }
}
