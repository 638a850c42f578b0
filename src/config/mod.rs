//! Configuration module for novadb.
//!
//! Provides YAML-based configuration loading and validation for the database
//! section: backend selection, worker pool and connection settings.

mod app;
mod validation;

pub use app::{AppConfig, DatabaseConfig};
pub use validation::{ConfigError, expand_env_vars, parse_duration};

// Re-export constants
pub use app::{DEFAULT_BACKEND, DEFAULT_CONNECT_TIMEOUT, DEFAULT_CONNECTION, DEFAULT_POOL_SIZE};
