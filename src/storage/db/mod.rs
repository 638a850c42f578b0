//! Persistent database backends.
//!
//! Currently supports DuckDB through an r2d2 connection pool, with an
//! optional read replica that serves `use_slave` queries.
//!
//! # Example
//!
//! ```ignore
//! let backend = DuckDbBackend::open("data/novadb.duckdb", PoolOptions::default())?;
//! let image = backend.s3_image_create(&RequestContext::admin(), image_uuid)?;
//! ```

mod duckdb_backend;

pub use duckdb_backend::DuckDbBackend;
