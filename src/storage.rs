//! Storage Layer
//!
//! EC2 id mappings and the instance records the EC2 API reads, behind one
//! facade with pluggable backends:
//! - **Backends**: DuckDB (r2d2 pool, optional read replica) or in-memory
//! - **Executors**: direct calls, or a worker thread pool for blocking work
//!
//! # Components
//!
//! - [`DbBackend`]: The operations every backend provides
//! - [`NovaDb`]: Async facade forwarding each call to the backend unchanged
//! - [`WorkerPool`]: Fixed-size thread pool used by the pooled executor
//! - [`StorageBuilder`]: Backend selection and construction

mod actor;
mod backend;
mod builder;
pub mod db;
mod error;
mod facades;
mod memory;
mod pool;
mod schema;
mod types;

pub use actor::{DEFAULT_QUEUE_CAPACITY, WorkerPool, default_worker_count};
pub use backend::{BackendKind, DbBackend};
pub use builder::StorageBuilder;
pub use error::{Resource, StorageError, StorageResult};
pub use facades::NovaDb;
pub use memory::MemoryBackend;
pub use pool::{MEMORY_CONNECTION, PoolOptions};
pub use types::{
    BlockDeviceMapping, DestinationType, IdMapping, Instance, InstanceIdMapping, InstanceJoin,
    MappingKind, S3Image, SnapshotIdMapping, SourceType, VolumeIdMapping,
};
