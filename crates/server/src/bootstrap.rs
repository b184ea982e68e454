use std::sync::Arc;

use maitre_agent::booking::{ConfirmationRenderer, ReservationEngine};
use maitre_agent::bridge::{ActionBridge, BridgeError, HttpActionService};
use maitre_agent::llm::{HttpTextGenerator, TextGenerator, UnconfiguredGenerator};
use maitre_agent::pacing::TracingPresence;
use maitre_agent::{AgentRuntime, AgentServices, RuntimeError, RuntimeSettings};
use maitre_core::audit::AuditSink;
use maitre_core::config::{AppConfig, ConfigError, LoadOptions};
use maitre_core::domain::reservation::RestaurantId;
use maitre_core::reservation::{ReservationValidator, SlotError};
use maitre_db::{
    connect_from_config, migrations, seed_demo_tables, DbPool, RepositoryError,
    SqlReservationRepository, SqlTableRepository,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::audit::TracingAuditSink;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("demo table seeding failed: {0}")]
    Seed(#[source] RepositoryError),
    #[error("invalid service windows: {0}")]
    ServiceWindows(#[from] SlotError),
    #[error("action bridge setup failed: {0}")]
    Bridge(#[from] BridgeError),
    #[error("agent runtime setup failed: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("confirmation templates failed to load: {0}")]
    Templates(String),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let restaurant_id = RestaurantId(config.reservation.restaurant_id.clone());
    let tables = Arc::new(SqlTableRepository::new(db_pool.clone()));
    let reservations = Arc::new(SqlReservationRepository::new(db_pool.clone()));

    if config.database.seed_demo_tables {
        let seeded =
            seed_demo_tables(tables.as_ref(), &restaurant_id).await.map_err(BootstrapError::Seed)?;
        info!(
            event_name = "system.bootstrap.tables_seeded",
            correlation_id = "bootstrap",
            inserted = seeded.inserted.len(),
            skipped = seeded.skipped.len(),
            "demo floor plan ready"
        );
    }

    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
    let renderer = ConfirmationRenderer::new(config.reservation.restaurant_name.clone())
        .map_err(|error| BootstrapError::Templates(error.to_string()))?;
    let engine = ReservationEngine::new(
        reservations,
        tables,
        ReservationValidator::new(config.reservation.grid()?),
        renderer,
        restaurant_id,
        audit.clone(),
    );

    let generator: Arc<dyn TextGenerator> = match HttpTextGenerator::from_config(&config.llm) {
        Ok(generator) => Arc::new(generator),
        Err(error) => {
            warn!(
                event_name = "system.bootstrap.generator_unavailable",
                correlation_id = "bootstrap",
                error = %error,
                "text generator disabled; free conversation will apologise"
            );
            Arc::new(UnconfiguredGenerator::new(error.to_string()))
        }
    };

    let bridge = if config.bridge.enabled {
        let service = HttpActionService::from_config(&config.bridge)?;
        Some(Arc::new(ActionBridge::from_config(&config.bridge, Arc::new(service), audit.clone())))
    } else {
        None
    };
    info!(
        event_name = "system.bootstrap.bridge",
        correlation_id = "bootstrap",
        enabled = bridge.is_some(),
        "action bridge configured"
    );

    let runtime = AgentRuntime::new(
        AgentServices {
            engine: Arc::new(engine),
            generator,
            bridge,
            presence: Arc::new(TracingPresence),
            audit,
        },
        RuntimeSettings::from_config(&config),
    )?;

    Ok(Application { config, db_pool, runtime: Arc::new(runtime) })
}
