mod audit;
mod bootstrap;
mod chat;
mod health;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use maitre_agent::runtime::AgentRuntime;
use maitre_core::config::{AppConfig, LoadOptions};
use tokio::time::MissedTickBehavior;

fn init_logging(config: &AppConfig) {
    use maitre_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging comes up before bootstrap so that bootstrap events are visible.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    let router = health::router(app.db_pool.clone(), app.runtime.clone())
        .merge(chat::router(app.runtime.clone()));

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "maitre-server listening"
    );

    let sweeper = tokio::spawn(sweep_idle_sessions(
        app.runtime.clone(),
        Duration::from_secs(app.config.dialogue.session_idle_secs),
    ));

    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;
    sweeper.abort();

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "maitre-server stopping"
    );
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, app.db_pool.close()).await.is_err() {
        tracing::warn!(
            event_name = "system.server.pool_close_timeout",
            correlation_id = "shutdown",
            "database pool did not close within the grace period"
        );
    }

    Ok(())
}

async fn sweep_idle_sessions(runtime: Arc<AgentRuntime>, max_idle: Duration) {
    let mut ticker = tokio::time::interval(max_idle / 2);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        runtime.evict_idle_sessions(max_idle).await;
    }
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "could not listen for shutdown signal"
        );
    }
}
