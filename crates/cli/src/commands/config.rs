use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use courier_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    let mut push = |key: &str, value: &str, env_key: Option<&str>| {
        lines.push(render_line(
            key,
            value,
            field_source(key, env_key, config_file_doc.as_ref(), config_file_path.as_deref()),
        ));
    };

    push("database.url", &config.database.url, Some("COURIER_DATABASE_URL"));
    push(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        Some("COURIER_DATABASE_MAX_CONNECTIONS"),
    );
    push(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        Some("COURIER_DATABASE_TIMEOUT_SECS"),
    );

    push(
        "gateway.base_url",
        config.gateway.base_url.as_deref().unwrap_or("<unset>"),
        Some("COURIER_GATEWAY_BASE_URL"),
    );
    let api_token = config
        .gateway
        .api_token
        .as_ref()
        .map(|token| redact_token(token.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());
    push("gateway.api_token", &api_token, Some("COURIER_GATEWAY_API_TOKEN"));
    push(
        "gateway.timeout_secs",
        &config.gateway.timeout_secs.to_string(),
        Some("COURIER_GATEWAY_TIMEOUT_SECS"),
    );

    push(
        "runner.batch_limit",
        &config.runner.batch_limit.to_string(),
        Some("COURIER_RUNNER_BATCH_LIMIT"),
    );
    push(
        "runner.max_attempts",
        &config.runner.max_attempts.to_string(),
        Some("COURIER_RUNNER_MAX_ATTEMPTS"),
    );
    push(
        "runner.backoff_base_secs",
        &config.runner.backoff_base_secs.to_string(),
        Some("COURIER_RUNNER_BACKOFF_BASE_SECS"),
    );
    push(
        "runner.backoff_max_secs",
        &config.runner.backoff_max_secs.to_string(),
        Some("COURIER_RUNNER_BACKOFF_MAX_SECS"),
    );
    push(
        "runner.claim_timeout_secs",
        &config
            .runner
            .claim_timeout_secs
            .map(|secs| secs.to_string())
            .unwrap_or_else(|| format!("<derived: {}>", config.effective_claim_timeout_secs())),
        Some("COURIER_RUNNER_CLAIM_TIMEOUT_SECS"),
    );

    push("dedupe.ttl_secs", &config.dedupe.ttl_secs.to_string(), Some("COURIER_DEDUPE_TTL_SECS"));
    push("dedupe.capacity", &config.dedupe.capacity.to_string(), Some("COURIER_DEDUPE_CAPACITY"));

    push("server.bind_address", &config.server.bind_address, Some("COURIER_SERVER_BIND_ADDRESS"));
    push("server.port", &config.server.port.to_string(), Some("COURIER_SERVER_PORT"));
    let admin_token = if config.server.admin_token.is_some() { "<redacted>" } else { "<unset>" };
    push("server.admin_token", admin_token, Some("COURIER_SERVER_ADMIN_TOKEN"));
    push(
        "server.graceful_shutdown_secs",
        &config.server.graceful_shutdown_secs.to_string(),
        Some("COURIER_SERVER_GRACEFUL_SHUTDOWN_SECS"),
    );

    push("logging.level", &config.logging.level, Some("COURIER_LOGGING_LEVEL"));
    push("logging.format", &format!("{:?}", config.logging.format), Some("COURIER_LOGGING_FORMAT"));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("courier.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/courier.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
