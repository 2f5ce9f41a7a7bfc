use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use secrecy::ExposeSecret;
use thiserror::Error;
use tracing::info;

use courier_core::backoff::BackoffPolicy;
use courier_core::chrono::Duration;
use courier_core::clock::SystemClock;
use courier_core::config::{AppConfig, ConfigError, LoadOptions};
use courier_core::dedupe::DedupeGuard;
use courier_db::repositories::{
    SqlConversationRepository, SqlInboundEventRepository, SqlOutboxRepository, SqlQuotaRepository,
    SqlTenantRepository, SqlTimelineRepository, TenantRepository,
};
use courier_db::{connect_with_settings, migrations, DbPool};
use courier_gateway::{HttpTransport, NoopTransport, TransportClient};
use courier_pipeline::inbound::{InboundFlowHandler, NoReplyProducer, ReplyProducer};
use courier_pipeline::runner::{OutboxRunner, RunnerSettings};

use crate::{admin, health, webhook};

/// Shared handler state. Everything is behind an Arc so the router clones
/// stay cheap.
#[derive(Clone)]
pub struct AppState {
    pub db_pool: DbPool,
    pub runner: Arc<OutboxRunner>,
    pub inbound: Arc<InboundFlowHandler>,
    pub tenants: Arc<dyn TenantRepository>,
    pub transport: Arc<dyn TransportClient>,
    pub admin_token: Option<String>,
}

pub struct Application {
    pub config: AppConfig,
    pub state: AppState,
    pub offline_transport: bool,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("transport initialization failed: {0}")]
    Transport(String),
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/admin/outbox/run", post(admin::run_outbox))
        .route("/admin/outbox/status", get(admin::outbox_status))
        .route("/webhook/inbound", post(webhook::inbound))
        .with_state(state)
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let (transport, offline_transport): (Arc<dyn TransportClient>, bool) =
        match &config.gateway.base_url {
            Some(base_url) => {
                let service_token = config.gateway.api_token.as_ref().ok_or_else(|| {
                    BootstrapError::Transport("gateway.api_token is not configured".to_string())
                })?;
                let transport = HttpTransport::new(
                    base_url.clone(),
                    service_token.expose_secret(),
                    config.gateway.timeout_secs,
                )
                .map_err(|error| BootstrapError::Transport(error.to_string()))?;
                (Arc::new(transport), false)
            }
            None => (Arc::new(NoopTransport), true),
        };

    let clock = Arc::new(SystemClock);
    let runner = Arc::new(OutboxRunner::new(
        Arc::new(SqlOutboxRepository::new(db_pool.clone())),
        Arc::new(SqlQuotaRepository::new(db_pool.clone())),
        Arc::new(SqlConversationRepository::new(db_pool.clone())),
        Arc::new(SqlTimelineRepository::new(db_pool.clone())),
        Arc::new(SqlTenantRepository::new(db_pool.clone())),
        transport.clone(),
        clock.clone(),
        RunnerSettings {
            max_attempts: config.runner.max_attempts,
            backoff: BackoffPolicy {
                base_delay_secs: config.runner.backoff_base_secs,
                max_delay_secs: config.runner.backoff_max_secs,
            },
            claim_timeout: Duration::seconds(config.effective_claim_timeout_secs() as i64),
            default_batch_limit: config.runner.batch_limit,
        },
    ));

    // The automation reply producer is the integration seam for bot logic.
    // The server ships with the silent default; inbound traffic still lands
    // in the ledger and conversation state.
    let producer: Arc<dyn ReplyProducer> = Arc::new(NoReplyProducer);
    let dedupe = Arc::new(DedupeGuard::new(clock.clone(), config.dedupe.capacity as usize));
    let inbound = Arc::new(InboundFlowHandler::new(
        Arc::new(SqlOutboxRepository::new(db_pool.clone())),
        Arc::new(SqlConversationRepository::new(db_pool.clone())),
        Arc::new(SqlTimelineRepository::new(db_pool.clone())),
        Arc::new(SqlInboundEventRepository::new(db_pool.clone())),
        producer,
        dedupe,
        Duration::seconds(config.dedupe.ttl_secs as i64),
        clock,
        config.runner.max_attempts,
    ));

    let state = AppState {
        db_pool: db_pool.clone(),
        runner,
        inbound,
        tenants: Arc::new(SqlTenantRepository::new(db_pool)),
        transport,
        admin_token: config
            .server
            .admin_token
            .as_ref()
            .map(|token| token.expose_secret().to_string()),
    };

    Ok(Application { config, state, offline_transport })
}

#[cfg(test)]
pub(crate) mod tests_support {
    use courier_core::config::{AppConfig, ConfigOverrides, LoadOptions};

    use super::{bootstrap_with_config, AppState};

    /// Handler-test state over a fresh in-memory database with the no-op
    /// transport and no admin token. A single-connection pool keeps the
    /// private `:memory:` database alive and isolated per test.
    pub async fn test_state() -> AppState {
        test_state_with(|_| {}).await
    }

    pub async fn test_state_with(customize: impl FnOnce(&mut AppConfig)) -> AppState {
        let mut config = AppConfig::load(LoadOptions {
            config_path: Some("does-not-exist.toml".into()),
            require_file: false,
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                ..ConfigOverrides::default()
            },
        })
        .expect("test config should load");
        config.database.max_connections = 1;
        customize(&mut config);

        bootstrap_with_config(config).await.expect("test bootstrap should succeed").state
    }
}
