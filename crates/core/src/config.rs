use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub runner: RunnerConfig,
    pub dedupe: DedupeConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Base URL of the channel provider API. Empty selects the no-op
    /// transport (offline mode).
    pub base_url: Option<String>,
    pub api_token: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct RunnerConfig {
    pub batch_limit: u32,
    pub max_attempts: u32,
    pub backoff_base_secs: i64,
    pub backoff_max_secs: i64,
    /// Items stuck in `sending` longer than this are reclaimed. Defaults to
    /// three transport timeouts when unset.
    pub claim_timeout_secs: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct DedupeConfig {
    pub ttl_secs: u64,
    pub capacity: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub admin_token: Option<SecretString>,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::InvalidEnvOverride {
                key: "logging.format".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub gateway_base_url: Option<String>,
    pub gateway_api_token: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://courier.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            gateway: GatewayConfig { base_url: None, api_token: None, timeout_secs: 15 },
            runner: RunnerConfig {
                batch_limit: 50,
                max_attempts: 5,
                backoff_base_secs: 30,
                backoff_max_secs: 3600,
                claim_timeout_secs: None,
            },
            dedupe: DedupeConfig { ttl_secs: 900, capacity: 4096 },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                admin_token: None,
                graceful_shutdown_secs: 10,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    gateway: Option<GatewayPatch>,
    runner: Option<RunnerPatch>,
    dedupe: Option<DedupePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct GatewayPatch {
    base_url: Option<String>,
    api_token: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RunnerPatch {
    batch_limit: Option<u32>,
    max_attempts: Option<u32>,
    backoff_base_secs: Option<i64>,
    backoff_max_secs: Option<i64>,
    claim_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct DedupePatch {
    ttl_secs: Option<u64>,
    capacity: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    admin_token: Option<String>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

impl AppConfig {
    /// Layered load: defaults, then `courier.toml` (or the explicit path),
    /// then `COURIER_*` environment variables, then programmatic overrides.
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let resolved = resolve_config_path(options.config_path.as_deref());
        match (&resolved, options.require_file, options.config_path) {
            (None, true, Some(path)) => return Err(ConfigError::MissingConfigFile(path)),
            (None, true, None) => {
                return Err(ConfigError::MissingConfigFile(PathBuf::from("courier.toml")))
            }
            _ => {}
        }

        if let Some(path) = resolved {
            config.apply_patch(read_patch(&path)?);
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;
        Ok(config)
    }

    /// Stale-claim cutoff with the documented default of three transport
    /// timeouts.
    pub fn effective_claim_timeout_secs(&self) -> u64 {
        self.runner.claim_timeout_secs.unwrap_or(self.gateway.timeout_secs.saturating_mul(3))
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(gateway) = patch.gateway {
            if let Some(base_url) = gateway.base_url {
                self.gateway.base_url = Some(base_url);
            }
            if let Some(api_token) = gateway.api_token {
                self.gateway.api_token = Some(secret_value(api_token));
            }
            if let Some(timeout_secs) = gateway.timeout_secs {
                self.gateway.timeout_secs = timeout_secs;
            }
        }

        if let Some(runner) = patch.runner {
            if let Some(batch_limit) = runner.batch_limit {
                self.runner.batch_limit = batch_limit;
            }
            if let Some(max_attempts) = runner.max_attempts {
                self.runner.max_attempts = max_attempts;
            }
            if let Some(backoff_base_secs) = runner.backoff_base_secs {
                self.runner.backoff_base_secs = backoff_base_secs;
            }
            if let Some(backoff_max_secs) = runner.backoff_max_secs {
                self.runner.backoff_max_secs = backoff_max_secs;
            }
            if let Some(claim_timeout_secs) = runner.claim_timeout_secs {
                self.runner.claim_timeout_secs = Some(claim_timeout_secs);
            }
        }

        if let Some(dedupe) = patch.dedupe {
            if let Some(ttl_secs) = dedupe.ttl_secs {
                self.dedupe.ttl_secs = ttl_secs;
            }
            if let Some(capacity) = dedupe.capacity {
                self.dedupe.capacity = capacity;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(admin_token) = server.admin_token {
                self.server.admin_token = Some(secret_value(admin_token));
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("COURIER_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("COURIER_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("COURIER_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("COURIER_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("COURIER_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("COURIER_GATEWAY_BASE_URL") {
            self.gateway.base_url = Some(value);
        }
        if let Some(value) = read_env("COURIER_GATEWAY_API_TOKEN") {
            self.gateway.api_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("COURIER_GATEWAY_TIMEOUT_SECS") {
            self.gateway.timeout_secs = parse_u64("COURIER_GATEWAY_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("COURIER_RUNNER_BATCH_LIMIT") {
            self.runner.batch_limit = parse_u32("COURIER_RUNNER_BATCH_LIMIT", &value)?;
        }
        if let Some(value) = read_env("COURIER_RUNNER_MAX_ATTEMPTS") {
            self.runner.max_attempts = parse_u32("COURIER_RUNNER_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("COURIER_RUNNER_BACKOFF_BASE_SECS") {
            self.runner.backoff_base_secs =
                parse_i64("COURIER_RUNNER_BACKOFF_BASE_SECS", &value)?;
        }
        if let Some(value) = read_env("COURIER_RUNNER_BACKOFF_MAX_SECS") {
            self.runner.backoff_max_secs = parse_i64("COURIER_RUNNER_BACKOFF_MAX_SECS", &value)?;
        }
        if let Some(value) = read_env("COURIER_RUNNER_CLAIM_TIMEOUT_SECS") {
            self.runner.claim_timeout_secs =
                Some(parse_u64("COURIER_RUNNER_CLAIM_TIMEOUT_SECS", &value)?);
        }

        if let Some(value) = read_env("COURIER_DEDUPE_TTL_SECS") {
            self.dedupe.ttl_secs = parse_u64("COURIER_DEDUPE_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("COURIER_DEDUPE_CAPACITY") {
            self.dedupe.capacity = parse_u32("COURIER_DEDUPE_CAPACITY", &value)?;
        }

        if let Some(value) = read_env("COURIER_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("COURIER_SERVER_PORT") {
            self.server.port = parse_u16("COURIER_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("COURIER_SERVER_ADMIN_TOKEN") {
            self.server.admin_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("COURIER_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("COURIER_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("COURIER_LOGGING_LEVEL").or_else(|| read_env("COURIER_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("COURIER_LOGGING_FORMAT").or_else(|| read_env("COURIER_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(base_url) = overrides.gateway_base_url {
            self.gateway.base_url = Some(base_url);
        }
        if let Some(api_token) = overrides.gateway_api_token {
            self.gateway.api_token = Some(secret_value(api_token));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_gateway(&self.gateway)?;
        validate_runner(&self.runner)?;
        validate_dedupe(&self.dedupe)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("courier.toml"), PathBuf::from("config/courier.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_gateway(gateway: &GatewayConfig) -> Result<(), ConfigError> {
    if let Some(base_url) = &gateway.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "gateway.base_url must be an http(s) URL".to_string(),
            ));
        }
        let token_missing = gateway
            .api_token
            .as_ref()
            .map(|token| token.expose_secret().is_empty())
            .unwrap_or(true);
        if token_missing {
            return Err(ConfigError::Validation(
                "gateway.api_token is required when gateway.base_url is set".to_string(),
            ));
        }
    }

    if gateway.timeout_secs == 0 || gateway.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "gateway.timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    Ok(())
}

fn validate_runner(runner: &RunnerConfig) -> Result<(), ConfigError> {
    if runner.batch_limit == 0 {
        return Err(ConfigError::Validation(
            "runner.batch_limit must be greater than zero".to_string(),
        ));
    }
    if runner.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "runner.max_attempts must be greater than zero".to_string(),
        ));
    }
    if runner.backoff_base_secs <= 0 || runner.backoff_max_secs < runner.backoff_base_secs {
        return Err(ConfigError::Validation(
            "runner backoff requires 0 < backoff_base_secs <= backoff_max_secs".to_string(),
        ));
    }
    if let Some(claim_timeout_secs) = runner.claim_timeout_secs {
        if claim_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "runner.claim_timeout_secs must be greater than zero when set".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_dedupe(dedupe: &DedupeConfig) -> Result<(), ConfigError> {
    if dedupe.ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "dedupe.ttl_secs must be greater than zero".to_string(),
        ));
    }
    if dedupe.capacity == 0 {
        return Err(ConfigError::Validation(
            "dedupe.capacity must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation(
            "server.bind_address must not be empty".to_string(),
        ));
    }
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be non-zero".to_string()));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
    if !LEVELS.contains(&logging.level.to_ascii_lowercase().as_str()) {
        return Err(ConfigError::Validation(format!(
            "logging.level must be one of {LEVELS:?}, got `{}`",
            logging.level
        )));
    }
    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn secret_value(value: String) -> SecretString {
    SecretString::from(value)
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.parse::<i64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use secrecy::ExposeSecret;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    #[test]
    fn defaults_validate() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_claim_timeout_is_three_transport_timeouts() {
        let config = AppConfig::default();
        assert_eq!(config.effective_claim_timeout_secs(), config.gateway.timeout_secs * 3);
    }

    #[test]
    fn explicit_claim_timeout_wins_over_the_derived_default() {
        let mut config = AppConfig::default();
        config.runner.claim_timeout_secs = Some(600);
        assert_eq!(config.effective_claim_timeout_secs(), 600);
    }

    #[test]
    fn file_patch_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "[database]\nurl = \"sqlite://custom.db\"\n\n[runner]\nmax_attempts = 7\n\n[logging]\nformat = \"json\""
        )
        .expect("write config");

        let config = AppConfig::load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            require_file: true,
            overrides: ConfigOverrides::default(),
        })
        .expect("load config");

        assert_eq!(config.database.url, "sqlite://custom.db");
        assert_eq!(config.runner.max_attempts, 7);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn missing_required_file_is_an_error() {
        let result = AppConfig::load(LoadOptions {
            config_path: Some("does-not-exist.toml".into()),
            require_file: true,
            overrides: ConfigOverrides::default(),
        });

        assert!(matches!(result, Err(ConfigError::MissingConfigFile(_))));
    }

    #[test]
    fn programmatic_overrides_apply_last() {
        let config = AppConfig::load(LoadOptions {
            config_path: Some("does-not-exist.toml".into()),
            require_file: false,
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                log_level: Some("debug".to_string()),
                gateway_base_url: Some("https://gateway.example".to_string()),
                gateway_api_token: Some("token-1".to_string()),
            },
        })
        .expect("load config");

        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.gateway.base_url.as_deref(), Some("https://gateway.example"));
        assert_eq!(
            config.gateway.api_token.as_ref().map(|token| token.expose_secret().to_string()),
            Some("token-1".to_string())
        );
    }

    #[test]
    fn gateway_base_url_without_token_fails_validation() {
        let mut config = AppConfig::default();
        config.gateway.base_url = Some("https://gateway.example".to_string());
        config.gateway.api_token = None;

        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn non_sqlite_database_url_fails_validation() {
        let mut config = AppConfig::default();
        config.database.url = "postgres://localhost/courier".to_string();

        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }
}
