//! Operator configuration loading from file and environment variables.

use podmark_db::DbRuntimeSettings;
use serde::Deserialize;
use thiserror::Error;

const SQLITE_URL_PREFIX: &str = "sqlite://";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    pub path: String,
    pub busy_timeout_ms: u64,
    /// Connections opened at startup.
    pub pool_min_size: u32,
    /// Upper bound on live connections.
    pub pool_max_size: u32,
    /// How long `acquire` waits for a free connection.
    pub acquire_timeout_ms: u64,
    /// Per-statement deadline; unset means statements may run indefinitely.
    pub statement_timeout_ms: Option<u64>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "podmark_db=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let settings = DbRuntimeSettings::default();
        Self {
            path: "podmark.db".to_string(),
            busy_timeout_ms: settings.busy_timeout_ms,
            pool_min_size: settings.pool_min_size,
            pool_max_size: settings.pool_max_size,
            acquire_timeout_ms: settings.acquire_timeout_ms,
            statement_timeout_ms: settings.statement_timeout_ms,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl DatabaseConfig {
    /// Pool and connection settings for [`podmark_db::create_pool`].
    pub fn runtime_settings(&self) -> DbRuntimeSettings {
        DbRuntimeSettings {
            busy_timeout_ms: self.busy_timeout_ms,
            pool_min_size: self.pool_min_size,
            pool_max_size: self.pool_max_size,
            acquire_timeout_ms: self.acquire_timeout_ms,
            statement_timeout_ms: self.statement_timeout_ms,
            ..DbRuntimeSettings::default()
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// An override variable holds a value of the wrong shape.
    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv {
        /// Variable name.
        name: &'static str,
        /// Rejected value.
        value: String,
    },

    /// `DATABASE_URL` names a store other than SQLite.
    #[error("unsupported DATABASE_URL (expected sqlite://<path>): {0}")]
    UnsupportedUrl(String),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `DATABASE_URL` (`sqlite://<path>`) overrides `database.path`
/// - `PODMARK_DB_PATH` overrides `database.path`, taking precedence over `DATABASE_URL`
/// - `PODMARK_DB_POOL_MIN` / `PODMARK_DB_POOL_MAX` override the pool bounds
/// - `PODMARK_DB_ACQUIRE_TIMEOUT_MS` overrides `database.acquire_timeout_ms`
/// - `PODMARK_DB_STATEMENT_TIMEOUT_MS` overrides `database.statement_timeout_ms`
/// - `PODMARK_LOG_LEVEL` overrides `logging.level`
/// - `PODMARK_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed,
/// or if an override is malformed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    load_config_with_env(path, |name| std::env::var(name).ok())
}

/// [`load_config`] with an explicit variable lookup.
///
/// # Errors
///
/// Same as [`load_config`].
pub fn load_config_with_env<F>(path: Option<&str>, env: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    if let Some(url) = env("DATABASE_URL") {
        config.database.path = url
            .strip_prefix(SQLITE_URL_PREFIX)
            .filter(|path| !path.is_empty())
            .ok_or_else(|| ConfigError::UnsupportedUrl(url.clone()))?
            .to_string();
    }
    if let Some(db_path) = env("PODMARK_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(min) = parse_env(&env, "PODMARK_DB_POOL_MIN")? {
        config.database.pool_min_size = min;
    }
    if let Some(max) = parse_env(&env, "PODMARK_DB_POOL_MAX")? {
        config.database.pool_max_size = max;
    }
    if let Some(ms) = parse_env(&env, "PODMARK_DB_ACQUIRE_TIMEOUT_MS")? {
        config.database.acquire_timeout_ms = ms;
    }
    if let Some(ms) = parse_env(&env, "PODMARK_DB_STATEMENT_TIMEOUT_MS")? {
        config.database.statement_timeout_ms = Some(ms);
    }
    if let Some(level) = env("PODMARK_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = env("PODMARK_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    Ok(config)
}

fn parse_env<F, T>(env: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match env(name) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { name, value }),
        None => Ok(None),
    }
}
