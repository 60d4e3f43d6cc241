use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use stockflow_core::attestation::{AttestationClient, AttestationMode, SimulatedAttestationClient};
use stockflow_core::config::{AppConfig, AttestationConfig, ConfigError, LoadOptions};
use stockflow_db::{connect_with_settings, migrations, DbPool};
use stockflow_workflow::{Repositories, RetryPolicy, RetryingAttestationClient, WorkflowServices};
use thiserror::Error;
use tracing::info;

use crate::attestation::{AttestationSetupError, HttpAttestationClient};
use crate::audit::TracingAuditSink;

/// Margin added on top of the retry budget before the recorder gives up.
const DEADLINE_MARGIN: Duration = Duration::from_secs(1);

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub services: WorkflowServices,
    pub attestation_mode: AttestationMode,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Attestation(#[from] AttestationSetupError),
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

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
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

    let (client, deadline) = attestation_client(&config.attestation)?;
    let attestation_mode = client.mode();
    info!(
        event_name = "system.bootstrap.attestation_ready",
        correlation_id = "bootstrap",
        attestation_mode = attestation_mode.as_str(),
        deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
        "attestation client initialized"
    );

    let services = WorkflowServices::new(
        Repositories::sql(db_pool.clone()),
        client,
        Arc::new(TracingAuditSink),
        deadline,
    );

    Ok(Application { config, db_pool, services, attestation_mode })
}

/// Builds the configured sink and the overall deadline the recorder applies to it.
pub fn attestation_client(
    config: &AttestationConfig,
) -> Result<(Arc<dyn AttestationClient>, Duration), AttestationSetupError> {
    let policy = RetryPolicy::from_config(config);
    match config.mode {
        AttestationMode::Simulation => {
            let client = SimulatedAttestationClient::new(config.signing_key.expose_secret());
            Ok((Arc::new(client), policy.attempt_timeout + DEADLINE_MARGIN))
        }
        AttestationMode::Gateway => {
            let gateway = HttpAttestationClient::from_config(config)?;
            let client = RetryingAttestationClient::new(Arc::new(gateway), policy);
            Ok((Arc::new(client), policy.budget() + DEADLINE_MARGIN))
        }
    }
}
