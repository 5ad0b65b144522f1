//! Controller configuration loading from file and environment variables.

use std::collections::BTreeMap;
use std::time::Duration;

use meshd_db::{DbRuntimeSettings, SyncMode};
use meshd_dispatch::{DispatcherSettings, EventHandlerConfig, DEFAULT_FLUSH_QUIESCENCE};
use serde::Deserialize;
use thiserror::Error;

/// Top-level controller configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Event handlers keyed by handler id.
    #[serde(default)]
    pub events: BTreeMap<String, EventHandlerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Identity of this controller, stamped on every event it emits.
    #[serde(default = "default_ctrl_id")]
    pub ctrl_id: String,

    /// Quiet period after the last commit before the entity change log is
    /// compacted, in milliseconds.
    #[serde(default = "default_flush_quiescence_ms")]
    pub flush_quiescence_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,

    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// `full` or `normal`.
    #[serde(default)]
    pub synchronous: SyncMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "meshd_dispatch=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_ctrl_id() -> String {
    "ctrl".to_string()
}

fn default_flush_quiescence_ms() -> u64 {
    DEFAULT_FLUSH_QUIESCENCE.as_millis() as u64
}

fn default_db_path() -> String {
    "meshd.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    DbRuntimeSettings::default().busy_timeout_ms
}

fn default_pool_max_size() -> u32 {
    DbRuntimeSettings::default().pool_max_size
}

fn default_connection_timeout_ms() -> u64 {
    DbRuntimeSettings::default().connection_timeout_ms
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ctrl_id: default_ctrl_id(),
            flush_quiescence_ms: default_flush_quiescence_ms(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
            connection_timeout_ms: default_connection_timeout_ms(),
            synchronous: SyncMode::default(),
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

impl Config {
    pub fn dispatcher_settings(&self) -> DispatcherSettings {
        DispatcherSettings {
            ctrl_id: self.server.ctrl_id.clone(),
            flush_quiescence: Duration::from_millis(self.server.flush_quiescence_ms),
            ..Default::default()
        }
    }

    pub fn db_settings(&self) -> DbRuntimeSettings {
        DbRuntimeSettings {
            busy_timeout_ms: self.database.busy_timeout_ms,
            pool_max_size: self.database.pool_max_size,
            connection_timeout_ms: self.database.connection_timeout_ms,
            synchronous: self.database.synchronous,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `MESHD_CTRL_ID` overrides `server.ctrl_id`
/// - `MESHD_FLUSH_QUIESCENCE_MS` overrides `server.flush_quiescence_ms`
/// - `MESHD_DB_PATH` overrides `database.path`
/// - `MESHD_LOG_LEVEL` overrides `logging.level`
/// - `MESHD_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
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

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies `MESHD_*` overrides, reading variables through `var`.
pub fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(ctrl_id) = var("MESHD_CTRL_ID") {
        config.server.ctrl_id = ctrl_id;
    }
    if let Some(ms) = var("MESHD_FLUSH_QUIESCENCE_MS") {
        if let Ok(parsed) = ms.parse() {
            config.server.flush_quiescence_ms = parsed;
        }
    }
    if let Some(db_path) = var("MESHD_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = var("MESHD_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("MESHD_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let mut config = load_config(path.to_str()).unwrap();
        apply_env_overrides(&mut config, |_| None);

        assert_eq!(config.server.ctrl_id, "ctrl");
        assert_eq!(config.server.flush_quiescence_ms, 5_000);
        assert_eq!(config.database.path, "meshd.db");
        assert!(config.events.is_empty());
    }

    #[test]
    fn parses_event_handlers() {
        let config: Config = toml::from_str(
            r#"
            [server]
            ctrl_id = "ctrl-east"

            [database]
            pool_max_size = 1
            synchronous = "normal"

            [logging]
            level = "debug"

            [events.jsonLogger.handler]
            type = "file"
            format = "json"
            path = "/var/log/meshd/events.json"

            [[events.jsonLogger.subscriptions]]
            type = "entityChange"
            include = "service"

            [[events.jsonLogger.subscriptions]]
            type = "metrics"
            sourceFilter = "^router-"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.ctrl_id, "ctrl-east");
        assert_eq!(config.logging.level, "debug");
        let db = config.db_settings();
        assert_eq!(db.pool_max_size, 1);
        assert_eq!(db.synchronous, SyncMode::Normal);
        assert_eq!(db.connection_timeout_ms, 30_000);
        let logger = &config.events["jsonLogger"];
        assert_eq!(logger.handler.handler_type, "file");
        assert_eq!(logger.subscriptions.len(), 2);
        assert_eq!(logger.subscriptions[1].options["sourceFilter"], "^router-");
        assert_eq!(config.dispatcher_settings().ctrl_id, "ctrl-east");
    }

    #[test]
    fn env_overrides_win() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("MESHD_CTRL_ID", "ctrl-west"),
            ("MESHD_FLUSH_QUIESCENCE_MS", "250"),
            ("MESHD_DB_PATH", "/data/meshd.db"),
            ("MESHD_LOG_JSON", "1"),
        ]);
        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.ctrl_id, "ctrl-west");
        assert_eq!(
            config.dispatcher_settings().flush_quiescence,
            Duration::from_millis(250)
        );
        assert_eq!(config.database.path, "/data/meshd.db");
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[server\nctrl_id = ").unwrap();
        assert!(matches!(
            load_config(path.to_str()),
            Err(ConfigError::Parse(_))
        ));
    }
}
