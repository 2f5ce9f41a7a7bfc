pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "courier",
    about = "Courier operator CLI",
    long_about = "Operate Courier outbox draining, migrations, config inspection, and readiness checks.",
    after_help = "Examples:\n  courier run --dry-run\n  courier run --tenant acme --limit 20\n  courier doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Drain queued outbox messages through quota, handoff, and the transport")]
    Run {
        #[arg(long, help = "Drain only this tenant's queued messages")]
        tenant: Option<String>,
        #[arg(long, help = "Maximum number of items to drain this cycle")]
        limit: Option<u32>,
        #[arg(long, help = "Preview the cycle without claiming, reserving, or sending")]
        dry_run: bool,
    },
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Validate config, gateway readiness, and DB connectivity checks")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run { tenant, limit, dry_run } => {
            commands::run::run(tenant.as_deref(), limit, dry_run)
        }
        Command::Migrate => commands::migrate::run(),
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
