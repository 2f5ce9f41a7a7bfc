use std::env;
use std::sync::{Mutex, OnceLock};

use courier_cli::commands::{migrate, run};
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("COURIER_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_reports_config_failure_with_invalid_env() {
    with_env(&[("COURIER_DATABASE_URL", "postgres://localhost/courier")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn run_on_an_empty_outbox_reports_ok_with_zero_counts() {
    with_env(&[("COURIER_DATABASE_URL", "sqlite::memory:")], || {
        let result = run::run(None, None, false);
        assert_eq!(result.exit_code, 0, "expected successful empty drain");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "run");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["report"]["processed"], 0);
        assert_eq!(payload["report"]["sent"], 0);
    });
}

#[test]
fn dry_run_is_reflected_in_the_output() {
    with_env(&[("COURIER_DATABASE_URL", "sqlite::memory:")], || {
        let result = run::run(Some("acme"), Some(10), true);
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["dry_run"], true);
        assert_eq!(payload["report"]["ok"], true);
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).unwrap_or_else(|error| {
        panic!("command output should be JSON, got `{output}`: {error}");
    })
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "COURIER_DATABASE_URL",
        "COURIER_DATABASE_MAX_CONNECTIONS",
        "COURIER_DATABASE_TIMEOUT_SECS",
        "COURIER_GATEWAY_BASE_URL",
        "COURIER_GATEWAY_API_TOKEN",
        "COURIER_GATEWAY_TIMEOUT_SECS",
        "COURIER_RUNNER_BATCH_LIMIT",
        "COURIER_RUNNER_MAX_ATTEMPTS",
        "COURIER_RUNNER_BACKOFF_BASE_SECS",
        "COURIER_RUNNER_BACKOFF_MAX_SECS",
        "COURIER_RUNNER_CLAIM_TIMEOUT_SECS",
        "COURIER_DEDUPE_TTL_SECS",
        "COURIER_DEDUPE_CAPACITY",
        "COURIER_SERVER_BIND_ADDRESS",
        "COURIER_SERVER_PORT",
        "COURIER_SERVER_ADMIN_TOKEN",
        "COURIER_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "COURIER_LOGGING_LEVEL",
        "COURIER_LOGGING_FORMAT",
        "COURIER_LOG_LEVEL",
        "COURIER_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
