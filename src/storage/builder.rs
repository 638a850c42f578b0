//! Storage builder.
//!
//! Resolves the configured backend, constructs it exactly once and wraps it
//! in a [`NovaDb`] facade with the selected executor.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_CONNECTION, DEFAULT_POOL_SIZE, DatabaseConfig};
use crate::storage::actor::{DEFAULT_QUEUE_CAPACITY, default_worker_count};
use crate::storage::backend::{BackendKind, DbBackend};
use crate::storage::db::DuckDbBackend;
use crate::storage::error::StorageResult;
use crate::storage::facades::NovaDb;
use crate::storage::memory::MemoryBackend;
use crate::storage::pool::PoolOptions;

/// Builder for constructing the database facade.
#[derive(Debug, Clone)]
pub struct StorageBuilder {
    backend: BackendKind,
    use_tpool: bool,
    connection: String,
    slave_connection: Option<String>,
    pool_size: u32,
    tpool_workers: usize,
    tpool_queue_capacity: usize,
    connect_timeout: Duration,
}

impl StorageBuilder {
    /// Create a builder for `backend` with direct execution.
    ///
    /// Worker count defaults to the number of available CPUs (clamped to 2-32).
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            use_tpool: false,
            connection: DEFAULT_CONNECTION.to_string(),
            slave_connection: None,
            pool_size: DEFAULT_POOL_SIZE,
            tpool_workers: default_worker_count(),
            tpool_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Create a builder from the `database` config section.
    ///
    /// Fails with a configuration error for an unknown backend name.
    pub fn from_config(config: &DatabaseConfig) -> StorageResult<Self> {
        let mut builder = Self::new(config.backend_kind()?)
            .use_tpool(config.use_tpool)
            .connection(config.expanded_connection())
            .pool_size(config.pool_size)
            .connect_timeout(config.connect_timeout()?);

        builder.slave_connection = config.expanded_slave_connection();
        if let Some(workers) = config.tpool_workers {
            builder = builder.tpool_workers(workers);
        }
        if let Some(capacity) = config.tpool_queue_capacity {
            builder = builder.tpool_queue_capacity(capacity);
        }
        Ok(builder)
    }

    /// Select the backend.
    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Run backend calls on a worker thread pool.
    pub fn use_tpool(mut self, enabled: bool) -> Self {
        self.use_tpool = enabled;
        self
    }

    /// Set the database path (or `:memory:`).
    pub fn connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = connection.into();
        self
    }

    /// Set the read replica used for `use_slave` reads.
    pub fn slave_connection(mut self, connection: impl Into<String>) -> Self {
        self.slave_connection = Some(connection.into());
        self
    }

    /// Set the connection pool size.
    pub fn pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the number of worker threads.
    pub fn tpool_workers(mut self, workers: usize) -> Self {
        self.tpool_workers = workers;
        self
    }

    /// Set how many jobs may wait for a worker.
    pub fn tpool_queue_capacity(mut self, capacity: usize) -> Self {
        self.tpool_queue_capacity = capacity;
        self
    }

    /// Set the connection acquire timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Construct the backend and return the facade.
    ///
    /// A zero pool size or connect timeout is a configuration error.
    pub fn build(self) -> StorageResult<NovaDb> {
        let backend: Arc<dyn DbBackend> = match self.backend {
            BackendKind::DuckDb => {
                let options = PoolOptions {
                    size: self.pool_size,
                    connect_timeout: self.connect_timeout,
                };
                let mut duckdb = DuckDbBackend::open(&self.connection, options)?;
                if let Some(ref replica) = self.slave_connection {
                    duckdb = duckdb.with_replica(replica, options)?;
                }
                Arc::new(duckdb)
            }
            BackendKind::Memory => Arc::new(MemoryBackend::new()),
        };

        tracing::info!(
            backend = %self.backend,
            use_tpool = self.use_tpool,
            "Database backend constructed"
        );
        self.build_with(backend)
    }

    /// Wrap an already constructed backend with the configured executor.
    pub fn build_with(self, backend: Arc<dyn DbBackend>) -> StorageResult<NovaDb> {
        if self.use_tpool {
            NovaDb::pooled(backend, self.tpool_workers, self.tpool_queue_capacity)
        } else {
            Ok(NovaDb::new(backend))
        }
    }
}
