//! Database backend trait definition.
//!
//! [`DbBackend`] lists every operation a backend must provide. The facade
//! ([`NovaDb`](crate::storage::NovaDb)) forwards each of its operations to the
//! same-named method here, with identical arguments, and returns the result
//! unchanged.
//!
//! Backends are blocking: calls may hold a database connection for their full
//! duration. Callers that must not block an async runtime select the pooled
//! executor (`use_tpool`).
//!
//! # Implementing a Backend
//!
//! 1. Implement [`DbBackend`]
//! 2. Enforce the mapping rules with [`check_forced_id`] and [`next_id`]
//! 3. Map backend-specific errors to [`StorageError`]
//! 4. Add a [`BackendKind`] variant and wire it into the builder

use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::config::ConfigError;
use crate::context::RequestContext;
use crate::ec2_id::MAX_INT;
use crate::storage::error::{Resource, StorageError, StorageResult};
use crate::storage::types::{
    BlockDeviceMapping, Instance, InstanceIdMapping, InstanceJoin, S3Image, SnapshotIdMapping,
    VolumeIdMapping,
};

/// Known backend implementations, selected by `database.backend`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BackendKind {
    /// Persistent DuckDB database.
    DuckDb,
    /// In-process maps, for tests and development.
    Memory,
}

impl BackendKind {
    /// Resolve a configured backend name.
    ///
    /// # Errors
    /// Returns [`ConfigError::UnknownBackend`] for any name not in the static set.
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        name.trim()
            .parse()
            .map_err(|_| ConfigError::UnknownBackend(name.to_string()))
    }
}

/// Operations every database backend implements.
///
/// | Group | Methods |
/// |-------|---------|
/// | S3 images | `s3_image_get`, `s3_image_get_by_uuid`, `s3_image_create` |
/// | Volumes | `get_ec2_volume_id_by_uuid`, `get_volume_uuid_by_ec2_id`, `ec2_volume_create` |
/// | Snapshots | `get_snapshot_uuid_by_ec2_id`, `get_ec2_snapshot_id_by_uuid`, `ec2_snapshot_create` |
/// | Instance ids | `get_ec2_instance_id_by_uuid`, `get_instance_uuid_by_ec2_id`, `ec2_instance_create`, `ec2_instance_get_by_uuid`, `ec2_instance_get_by_id` |
/// | Instances | `instance_get_by_uuid`, `block_device_mapping_get_all_by_instance` |
pub trait DbBackend: Send + Sync {
    /// Find the local S3 image with the given integer id.
    fn s3_image_get(&self, ctx: &RequestContext, image_id: i64) -> StorageResult<S3Image>;

    /// Find the local S3 image for the given image UUID.
    fn s3_image_get_by_uuid(&self, ctx: &RequestContext, image_uuid: Uuid)
    -> StorageResult<S3Image>;

    /// Create the local S3 image for `image_uuid`, assigning the next id.
    fn s3_image_create(&self, ctx: &RequestContext, image_uuid: Uuid) -> StorageResult<S3Image>;

    fn get_ec2_volume_id_by_uuid(&self, ctx: &RequestContext, volume_id: Uuid)
    -> StorageResult<i64>;

    fn get_volume_uuid_by_ec2_id(&self, ctx: &RequestContext, ec2_id: i64) -> StorageResult<Uuid>;

    /// Map `volume_id` to `forced_id`, or to the next free id.
    fn ec2_volume_create(
        &self,
        ctx: &RequestContext,
        volume_id: Uuid,
        forced_id: Option<i64>,
    ) -> StorageResult<VolumeIdMapping>;

    fn get_snapshot_uuid_by_ec2_id(&self, ctx: &RequestContext, ec2_id: i64)
    -> StorageResult<Uuid>;

    fn get_ec2_snapshot_id_by_uuid(
        &self,
        ctx: &RequestContext,
        snapshot_id: Uuid,
    ) -> StorageResult<i64>;

    /// Map `snapshot_id` to `forced_id`, or to the next free id.
    fn ec2_snapshot_create(
        &self,
        ctx: &RequestContext,
        snapshot_id: Uuid,
        forced_id: Option<i64>,
    ) -> StorageResult<SnapshotIdMapping>;

    fn get_ec2_instance_id_by_uuid(
        &self,
        ctx: &RequestContext,
        instance_id: Uuid,
    ) -> StorageResult<i64>;

    fn get_instance_uuid_by_ec2_id(&self, ctx: &RequestContext, ec2_id: i64)
    -> StorageResult<Uuid>;

    /// Create the EC2 id mapping for an instance on first reference.
    fn ec2_instance_create(
        &self,
        ctx: &RequestContext,
        instance_uuid: Uuid,
        id: Option<i64>,
    ) -> StorageResult<InstanceIdMapping>;

    fn ec2_instance_get_by_uuid(
        &self,
        ctx: &RequestContext,
        instance_uuid: Uuid,
    ) -> StorageResult<InstanceIdMapping>;

    fn ec2_instance_get_by_id(
        &self,
        ctx: &RequestContext,
        instance_id: i64,
    ) -> StorageResult<InstanceIdMapping>;

    /// Get an instance or fail with `NotFound`.
    ///
    /// `columns_to_join = None` loads metadata and system metadata.
    /// `use_slave` reads from the replica when the backend has one.
    fn instance_get_by_uuid(
        &self,
        ctx: &RequestContext,
        uuid: Uuid,
        columns_to_join: Option<&[InstanceJoin]>,
        use_slave: bool,
    ) -> StorageResult<Instance>;

    /// All block device mappings of an instance, ordered by id.
    fn block_device_mapping_get_all_by_instance(
        &self,
        ctx: &RequestContext,
        instance_uuid: Uuid,
        use_slave: bool,
    ) -> StorageResult<Vec<BlockDeviceMapping>>;

    /// Lightweight availability probe.
    fn health_check(&self) -> StorageResult<()>;
}

/// Reject forced ids outside `1..=MAX_INT`.
pub fn check_forced_id(resource: Resource, id: i64) -> StorageResult<()> {
    if (1..=MAX_INT).contains(&id) {
        Ok(())
    } else {
        Err(StorageError::InvalidId { resource, id })
    }
}

/// Next auto-assigned id after the current largest one.
///
/// Allocating past the largest id keeps ids monotonic and skips any
/// previously forced ids.
pub fn next_id(resource: Resource, current_max: Option<i64>) -> StorageResult<i64> {
    let next = current_max.unwrap_or(0).max(0) + 1;
    if next > MAX_INT {
        return Err(StorageError::InvalidId { resource, id: next });
    }
    Ok(next)
}
