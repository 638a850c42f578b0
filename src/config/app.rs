//! Application configuration structures.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::storage::BackendKind;

use super::validation::{ConfigError, expand_env_vars, parse_duration};

// =============================================================================
// Constants
// =============================================================================

/// Default backend name.
pub const DEFAULT_BACKEND: &str = "duckdb";

/// Default database file.
pub const DEFAULT_CONNECTION: &str = "novadb.duckdb";

/// Default connection pool size.
pub const DEFAULT_POOL_SIZE: u32 = 4;

/// Default time to wait for a pooled connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

fn default_backend() -> String {
    DEFAULT_BACKEND.to_string()
}

fn default_connection() -> String {
    DEFAULT_CONNECTION.to_string()
}

fn default_pool_size() -> u32 {
    DEFAULT_POOL_SIZE
}

fn default_connect_timeout() -> String {
    humantime::format_duration(DEFAULT_CONNECT_TIMEOUT).to_string()
}

// =============================================================================
// Database Configuration
// =============================================================================

/// Database configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Backend name, case-insensitive (default: "duckdb").
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Run backend calls on a worker thread pool (default: false).
    #[serde(default)]
    pub use_tpool: bool,

    /// Database file path or `:memory:`. `${VAR:-default}` is expanded.
    #[serde(default = "default_connection")]
    pub connection: String,

    /// Read replica used when a caller asks for `use_slave`.
    #[serde(default)]
    pub slave_connection: Option<String>,

    /// Connection pool size (default: 4).
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Worker threads for the pool. Defaults to available CPUs.
    #[serde(default)]
    pub tpool_workers: Option<usize>,

    /// Pending jobs before submitters wait. Defaults to 1024.
    #[serde(default)]
    pub tpool_queue_capacity: Option<usize>,

    /// Connection acquire timeout (default: "30s").
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            use_tpool: false,
            connection: default_connection(),
            slave_connection: None,
            pool_size: DEFAULT_POOL_SIZE,
            tpool_workers: None,
            tpool_queue_capacity: None,
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl DatabaseConfig {
    /// Resolve the configured backend name.
    pub fn backend_kind(&self) -> Result<BackendKind, ConfigError> {
        BackendKind::from_name(&self.backend)
    }

    /// Parsed connect timeout.
    pub fn connect_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.connect_timeout)
            .map_err(|e| ConfigError::ValidationError(format!("database connect_timeout: {e}")))
    }

    /// Connection string with environment references expanded.
    pub fn expanded_connection(&self) -> String {
        expand_env_vars(&self.connection)
    }

    /// Replica connection string with environment references expanded.
    pub fn expanded_slave_connection(&self) -> Option<String> {
        self.slave_connection.as_deref().map(expand_env_vars)
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::UnknownBackend` for an unrecognised backend and
    /// `ConfigError::ValidationError` for any other invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let db = &self.database;
        db.backend_kind()?;

        if db.pool_size == 0 {
            return Err(ConfigError::ValidationError(
                "database pool_size must be positive".to_string(),
            ));
        }

        if db.tpool_workers == Some(0) {
            return Err(ConfigError::ValidationError(
                "database tpool_workers must be positive".to_string(),
            ));
        }

        if db.tpool_queue_capacity == Some(0) {
            return Err(ConfigError::ValidationError(
                "database tpool_queue_capacity must be positive".to_string(),
            ));
        }

        if db.connection.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "database connection must not be empty".to_string(),
            ));
        }

        if db.connect_timeout()?.is_zero() {
            return Err(ConfigError::ValidationError(
                "database connect_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
