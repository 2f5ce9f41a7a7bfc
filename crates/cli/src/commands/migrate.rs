use courier_core::config::{AppConfig, LoadOptions};
use courier_db::{connect_with_settings, migrations};

use crate::commands::{CommandFailure, CommandResult};

/// Applies pending schema migrations and exits. `run` migrates on startup
/// as well; this command covers deploy pipelines that want the schema step
/// on its own.
pub fn run() -> CommandResult {
    match apply() {
        Ok(summary) => CommandResult::success("migrate", summary),
        Err(failure) => CommandResult::failure("migrate", failure),
    }
}

fn apply() -> Result<String, CommandFailure> {
    let config = AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandFailure::new("config_validation", 2, format!("configuration issue: {error}"))
    })?;

    let runtime =
        tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
            CommandFailure::new(
                "runtime_init",
                3,
                format!("failed to initialize async runtime: {error}"),
            )
        })?;

    runtime.block_on(async {
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

        pool.close().await;
        Ok("applied pending migrations".to_string())
    })
}
