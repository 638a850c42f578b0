//! Storage-specific error types.
//!
//! All storage operations return [`StorageError`] on failure, which can be
//! matched to determine the underlying cause (missing row, duplicate id,
//! database, pool, worker pool, etc.). The facade never rewrites these: what
//! a backend returns is what the caller sees.

use strum_macros::{AsRefStr, Display};
use thiserror::Error;

use crate::config::ConfigError;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Kind of record an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Resource {
    Image,
    Volume,
    Snapshot,
    Instance,
    BlockDeviceMapping,
}

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No row matched the lookup.
    #[error("{resource} {id} could not be found")]
    NotFound { resource: Resource, id: String },

    /// A unique column already holds this value.
    #[error("{resource} with {field} {value} already exists")]
    Duplicate {
        resource: Resource,
        field: &'static str,
        value: String,
    },

    /// Id outside `1..=MAX_INT`.
    #[error("invalid {resource} id: {id}")]
    InvalidId { resource: Resource, id: i64 },

    /// Invalid data in database (e.g., unknown enum value).
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    /// Could not check a connection out of the pool.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The pooled executor has been shut down.
    #[error("worker pool is closed")]
    WorkerPoolClosed,

    /// Internal error (e.g., a worker job panicked).
    #[error("internal error: {0}")]
    Internal(String),

    /// Backend selection or settings were invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl StorageError {
    pub(crate) fn not_found(resource: Resource, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Whether this error means the requested row does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
