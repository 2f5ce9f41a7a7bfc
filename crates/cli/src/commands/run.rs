use std::sync::Arc;

use secrecy::ExposeSecret;
use serde::Serialize;

use courier_core::backoff::BackoffPolicy;
use courier_core::chrono::Duration;
use courier_core::clock::SystemClock;
use courier_core::config::{AppConfig, LoadOptions};
use courier_core::domain::tenant::TenantId;
use courier_db::repositories::{
    SqlConversationRepository, SqlOutboxRepository, SqlQuotaRepository, SqlTenantRepository,
    SqlTimelineRepository,
};
use courier_db::{connect_with_settings, migrations};
use courier_gateway::{HttpTransport, NoopTransport, TransportClient};
use courier_pipeline::report::RunReport;
use courier_pipeline::runner::{OutboxRunner, RunnerSettings};

use crate::commands::{CommandFailure, CommandResult};

#[derive(Debug, Serialize)]
struct RunOutcome {
    command: &'static str,
    status: &'static str,
    dry_run: bool,
    report: RunReport,
}

/// One drain cycle from the command line. Exit code 0 means the cycle
/// finished with no failed items; skips alone do not fail the run.
pub fn run(tenant: Option<&str>, limit: Option<u32>, dry_run: bool) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "run",
                CommandFailure::new(
                    "config_validation",
                    2,
                    format!("configuration issue: {error}"),
                ),
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "run",
                CommandFailure::new(
                    "runtime_init",
                    3,
                    format!("failed to initialize async runtime: {error}"),
                ),
            );
        }
    };

    let tenant_id = tenant.map(|tenant| TenantId(tenant.to_string()));
    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| CommandFailure::new("db_connectivity", 4, error.to_string()))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| CommandFailure::new("migration", 5, error.to_string()))?;

        let transport =
            build_transport(&config).map_err(|error| CommandFailure::new("transport", 6, error))?;
        let runner = OutboxRunner::new(
            Arc::new(SqlOutboxRepository::new(pool.clone())),
            Arc::new(SqlQuotaRepository::new(pool.clone())),
            Arc::new(SqlConversationRepository::new(pool.clone())),
            Arc::new(SqlTimelineRepository::new(pool.clone())),
            Arc::new(SqlTenantRepository::new(pool.clone())),
            transport,
            Arc::new(SystemClock),
            RunnerSettings {
                max_attempts: config.runner.max_attempts,
                backoff: BackoffPolicy {
                    base_delay_secs: config.runner.backoff_base_secs,
                    max_delay_secs: config.runner.backoff_max_secs,
                },
                claim_timeout: Duration::seconds(config.effective_claim_timeout_secs() as i64),
                default_batch_limit: config.runner.batch_limit,
            },
        );

        let report = runner
            .drain(tenant_id.as_ref(), limit, dry_run)
            .await
            .map_err(|error| CommandFailure::new("drain", 7, error.to_string()))?;
        pool.close().await;
        Ok::<RunReport, CommandFailure>(report)
    });

    match result {
        Ok(report) => {
            let exit_code = if report.ok { 0 } else { 1 };
            let status = if report.ok { "ok" } else { "failed" };
            let outcome = RunOutcome { command: "run", status, dry_run, report };
            let output = serde_json::to_string(&outcome)
                .unwrap_or_else(|error| format!("{{\"command\":\"run\",\"status\":\"error\",\"message\":\"{error}\"}}"));
            CommandResult { exit_code, output }
        }
        Err(failure) => CommandResult::failure("run", failure),
    }
}

fn build_transport(config: &AppConfig) -> Result<Arc<dyn TransportClient>, String> {
    match &config.gateway.base_url {
        Some(base_url) => {
            let service_token = config
                .gateway
                .api_token
                .as_ref()
                .ok_or_else(|| "gateway.api_token is not configured".to_string())?;
            let transport = HttpTransport::new(
                base_url.clone(),
                service_token.expose_secret(),
                config.gateway.timeout_secs,
            )
            .map_err(|error| error.to_string())?;
            Ok(Arc::new(transport))
        }
        None => Ok(Arc::new(NoopTransport)),
    }
}
