//! Connection pool using r2d2.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use duckdb::DuckdbConnectionManager;
use r2d2::{Pool, PooledConnection};

use crate::config::{ConfigError, DEFAULT_CONNECT_TIMEOUT, DEFAULT_POOL_SIZE};
use crate::storage::StorageError;
use crate::storage::schema::init_schema;

/// Connection string selecting a private in-memory database.
pub const MEMORY_CONNECTION: &str = ":memory:";

/// Pool sizing and timeouts.
#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    pub size: u32,
    pub connect_timeout: Duration,
}

impl PoolOptions {
    /// Reject sizes r2d2 would refuse with a panic.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.size == 0 {
            return Err(ConfigError::ValidationError(
                "database pool_size must be positive".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "database connect_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            size: DEFAULT_POOL_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Pool of connections sharing one DuckDB database instance.
pub struct ConnectionPool {
    pool: Pool<DuckdbConnectionManager>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("size", &self.pool.max_size())
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    /// Open `connection` (a file path or `:memory:`) and initialize the schema.
    ///
    /// Creates the parent directory of a file database if it doesn't exist.
    pub fn open(connection: &str, options: PoolOptions) -> Result<Arc<Self>, StorageError> {
        options.validate()?;

        let manager = if connection == MEMORY_CONNECTION {
            DuckdbConnectionManager::memory()?
        } else {
            create_parent_dir(Path::new(connection))?;
            DuckdbConnectionManager::file(connection)?
        };

        let pool = Pool::builder()
            .max_size(options.size)
            .connection_timeout(options.connect_timeout)
            .build(manager)?;

        {
            let conn = pool.get()?;
            init_schema(&conn)?;
        }

        tracing::debug!(connection, size = options.size, "Connection pool opened");
        Ok(Arc::new(Self { pool }))
    }

    /// Get a connection from the pool.
    pub fn get(&self) -> Result<PooledConnection<DuckdbConnectionManager>, StorageError> {
        Ok(self.pool.get()?)
    }
}

fn create_parent_dir(path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            StorageError::Internal(format!(
                "Failed to create database directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_pool_creation() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("test.duckdb");

        let pool = ConnectionPool::open(db_path.to_str().unwrap(), PoolOptions::default()).unwrap();
        assert!(db_path.exists());

        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = 'instances'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_memory_pool_connections_share_database() {
        let pool = ConnectionPool::open(MEMORY_CONNECTION, PoolOptions::default()).unwrap();

        let writer = pool.get().unwrap();
        writer
            .execute(
                "INSERT INTO s3_images (id, uuid, created_at) VALUES (1, 'x', 0)",
                [],
            )
            .unwrap();

        let reader = pool.get().unwrap();
        let count: i64 = reader
            .query_row("SELECT COUNT(*) FROM s3_images", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_open_rejects_zero_size_and_timeout() {
        let zero_size = PoolOptions {
            size: 0,
            ..Default::default()
        };
        let err = ConnectionPool::open(MEMORY_CONNECTION, zero_size).unwrap_err();
        assert!(matches!(
            err,
            StorageError::Config(ConfigError::ValidationError(ref msg)) if msg.contains("pool_size")
        ));

        let zero_timeout = PoolOptions {
            connect_timeout: Duration::ZERO,
            ..Default::default()
        };
        let err = ConnectionPool::open(MEMORY_CONNECTION, zero_timeout).unwrap_err();
        assert!(matches!(
            err,
            StorageError::Config(ConfigError::ValidationError(ref msg)) if msg.contains("connect_timeout")
        ));
    }
}
