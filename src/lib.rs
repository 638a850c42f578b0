//! novadb - EC2 id mapping database API
//!
//! This crate provides the database layer used by an EC2-compatible API:
//! mappings between EC2-style integer ids (`i-0000000a`, `vol-00000001`) and
//! internal UUIDs, plus the instance and block device reads that API needs.
//! It can be used as a library, or driven from the `novadb` binary.
//!
//! # Architecture
//!
//! - **Storage**: [`NovaDb`] facade over a pluggable [`DbBackend`]
//! - **Backends**: DuckDB-based persistence or an in-memory store
//! - **Config**: YAML configuration with environment overrides
//!
//! # Example
//!
//! ```rust,ignore
//! use novadb::{RequestContext, StorageBuilder, BackendKind};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = StorageBuilder::new(BackendKind::DuckDb)
//!         .connection("./novadb.duckdb")
//!         .use_tpool(true)
//!         .build()?;
//!
//!     let ctx = RequestContext::admin();
//!     let mapping = db.ec2_volume_create(&ctx, volume_uuid, None).await?;
//!     println!("{}", mapping.ec2_id(Ec2Prefix::Vol));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod ec2_id;
pub mod storage;

pub use context::{ReadDeleted, RequestContext};
pub use ec2_id::{Ec2Prefix, ec2_id_to_id, id_to_ec2_id};
pub use storage::{BackendKind, DbBackend, NovaDb, StorageBuilder, StorageError, StorageResult};
