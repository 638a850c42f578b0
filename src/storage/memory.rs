//! In-memory database backend.
//!
//! [`MemoryBackend`] keeps every table in `parking_lot::RwLock`-guarded maps.
//! It follows the same mapping rules as the DuckDB backend and is used by
//! tests and for development. Data is lost when the process exits.
//!
//! Cloning is cheap; all clones share the same tables.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::storage::backend::{DbBackend, check_forced_id, next_id};
use crate::storage::error::{Resource, StorageError, StorageResult};
use crate::storage::types::{
    BlockDeviceMapping, IdMapping, Instance, InstanceIdMapping, InstanceJoin, MappingKind,
    S3Image, SnapshotIdMapping, VolumeIdMapping,
};

/// One id-mapping table: rows by id plus a uuid index.
#[derive(Default)]
struct MappingTable {
    by_id: BTreeMap<i64, IdMapping>,
    by_uuid: HashMap<Uuid, i64>,
}

#[derive(Default)]
struct Tables {
    mappings: HashMap<MappingKind, MappingTable>,
    instances: HashMap<Uuid, Instance>,
    block_devices: BTreeMap<i64, BlockDeviceMapping>,
}

/// In-memory backend.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    tables: Arc<RwLock<Tables>>,
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend").finish_non_exhaustive()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an instance row.
    pub fn instance_create(&self, instance: Instance) -> StorageResult<()> {
        let mut tables = self.tables.write();
        if tables.instances.contains_key(&instance.uuid) {
            return Err(StorageError::Duplicate {
                resource: Resource::Instance,
                field: "uuid",
                value: instance.uuid.to_string(),
            });
        }
        if tables.instances.values().any(|row| row.id == instance.id) {
            return Err(StorageError::Duplicate {
                resource: Resource::Instance,
                field: "id",
                value: instance.id.to_string(),
            });
        }
        tables.instances.insert(instance.uuid, instance);
        Ok(())
    }

    /// Insert a block device mapping row.
    pub fn block_device_mapping_create(&self, bdm: BlockDeviceMapping) -> StorageResult<()> {
        let mut tables = self.tables.write();
        if tables.block_devices.contains_key(&bdm.id) {
            return Err(StorageError::Duplicate {
                resource: Resource::BlockDeviceMapping,
                field: "id",
                value: bdm.id.to_string(),
            });
        }
        tables.block_devices.insert(bdm.id, bdm);
        Ok(())
    }

    fn mapping_by_id(&self, kind: MappingKind, id: i64) -> StorageResult<IdMapping> {
        self.tables
            .read()
            .mappings
            .get(&kind)
            .and_then(|t| t.by_id.get(&id))
            .cloned()
            .ok_or_else(|| StorageError::not_found(kind.resource(), id))
    }

    fn mapping_by_uuid(&self, kind: MappingKind, uuid: Uuid) -> StorageResult<IdMapping> {
        let tables = self.tables.read();
        tables
            .mappings
            .get(&kind)
            .and_then(|t| t.by_uuid.get(&uuid).and_then(|id| t.by_id.get(id)))
            .cloned()
            .ok_or_else(|| StorageError::not_found(kind.resource(), uuid))
    }

    fn mapping_create(
        &self,
        kind: MappingKind,
        uuid: Uuid,
        forced_id: Option<i64>,
    ) -> StorageResult<IdMapping> {
        let resource = kind.resource();
        if let Some(id) = forced_id {
            check_forced_id(resource, id)?;
        }

        let mut tables = self.tables.write();
        let table = tables.mappings.entry(kind).or_default();

        if table.by_uuid.contains_key(&uuid) {
            return Err(StorageError::Duplicate {
                resource,
                field: "uuid",
                value: uuid.to_string(),
            });
        }

        let id = match forced_id {
            Some(id) if table.by_id.contains_key(&id) => {
                return Err(StorageError::Duplicate {
                    resource,
                    field: "id",
                    value: id.to_string(),
                });
            }
            Some(id) => id,
            None => next_id(resource, table.by_id.keys().next_back().copied())?,
        };

        let mapping = IdMapping::new(id, uuid);
        table.by_id.insert(id, mapping.clone());
        table.by_uuid.insert(uuid, id);

        tracing::debug!(kind = %kind, id, %uuid, "Id mapping created");
        Ok(mapping)
    }
}

impl DbBackend for MemoryBackend {
    fn s3_image_get(&self, _ctx: &RequestContext, image_id: i64) -> StorageResult<S3Image> {
        self.mapping_by_id(MappingKind::S3Image, image_id)
    }

    fn s3_image_get_by_uuid(
        &self,
        _ctx: &RequestContext,
        image_uuid: Uuid,
    ) -> StorageResult<S3Image> {
        self.mapping_by_uuid(MappingKind::S3Image, image_uuid)
    }

    fn s3_image_create(&self, _ctx: &RequestContext, image_uuid: Uuid) -> StorageResult<S3Image> {
        self.mapping_create(MappingKind::S3Image, image_uuid, None)
    }

    fn get_ec2_volume_id_by_uuid(
        &self,
        _ctx: &RequestContext,
        volume_id: Uuid,
    ) -> StorageResult<i64> {
        Ok(self.mapping_by_uuid(MappingKind::Volume, volume_id)?.id)
    }

    fn get_volume_uuid_by_ec2_id(&self, _ctx: &RequestContext, ec2_id: i64) -> StorageResult<Uuid> {
        Ok(self.mapping_by_id(MappingKind::Volume, ec2_id)?.uuid)
    }

    fn ec2_volume_create(
        &self,
        _ctx: &RequestContext,
        volume_id: Uuid,
        forced_id: Option<i64>,
    ) -> StorageResult<VolumeIdMapping> {
        self.mapping_create(MappingKind::Volume, volume_id, forced_id)
    }

    fn get_snapshot_uuid_by_ec2_id(
        &self,
        _ctx: &RequestContext,
        ec2_id: i64,
    ) -> StorageResult<Uuid> {
        Ok(self.mapping_by_id(MappingKind::Snapshot, ec2_id)?.uuid)
    }

    fn get_ec2_snapshot_id_by_uuid(
        &self,
        _ctx: &RequestContext,
        snapshot_id: Uuid,
    ) -> StorageResult<i64> {
        Ok(self.mapping_by_uuid(MappingKind::Snapshot, snapshot_id)?.id)
    }

    fn ec2_snapshot_create(
        &self,
        _ctx: &RequestContext,
        snapshot_id: Uuid,
        forced_id: Option<i64>,
    ) -> StorageResult<SnapshotIdMapping> {
        self.mapping_create(MappingKind::Snapshot, snapshot_id, forced_id)
    }

    fn get_ec2_instance_id_by_uuid(
        &self,
        _ctx: &RequestContext,
        instance_id: Uuid,
    ) -> StorageResult<i64> {
        Ok(self.mapping_by_uuid(MappingKind::Instance, instance_id)?.id)
    }

    fn get_instance_uuid_by_ec2_id(
        &self,
        _ctx: &RequestContext,
        ec2_id: i64,
    ) -> StorageResult<Uuid> {
        Ok(self.mapping_by_id(MappingKind::Instance, ec2_id)?.uuid)
    }

    fn ec2_instance_create(
        &self,
        _ctx: &RequestContext,
        instance_uuid: Uuid,
        id: Option<i64>,
    ) -> StorageResult<InstanceIdMapping> {
        self.mapping_create(MappingKind::Instance, instance_uuid, id)
    }

    fn ec2_instance_get_by_uuid(
        &self,
        _ctx: &RequestContext,
        instance_uuid: Uuid,
    ) -> StorageResult<InstanceIdMapping> {
        self.mapping_by_uuid(MappingKind::Instance, instance_uuid)
    }

    fn ec2_instance_get_by_id(
        &self,
        _ctx: &RequestContext,
        instance_id: i64,
    ) -> StorageResult<InstanceIdMapping> {
        self.mapping_by_id(MappingKind::Instance, instance_id)
    }

    fn instance_get_by_uuid(
        &self,
        ctx: &RequestContext,
        uuid: Uuid,
        columns_to_join: Option<&[InstanceJoin]>,
        _use_slave: bool,
    ) -> StorageResult<Instance> {
        let tables = self.tables.read();
        tables
            .instances
            .get(&uuid)
            .filter(|i| ctx.read_deleted.allows(i.deleted) && ctx.can_see_project(&i.project_id))
            .cloned()
            .map(|i| i.project_joins(columns_to_join))
            .ok_or_else(|| StorageError::not_found(Resource::Instance, uuid))
    }

    fn block_device_mapping_get_all_by_instance(
        &self,
        ctx: &RequestContext,
        instance_uuid: Uuid,
        _use_slave: bool,
    ) -> StorageResult<Vec<BlockDeviceMapping>> {
        let tables = self.tables.read();
        Ok(tables
            .block_devices
            .values()
            .filter(|b| b.instance_uuid == instance_uuid && ctx.read_deleted.allows(b.deleted))
            .cloned()
            .collect())
    }

    fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ReadDeleted;
    use crate::ec2_id::MAX_INT;

    fn ctx() -> RequestContext {
        RequestContext::admin()
    }

    #[test]
    fn test_s3_image_ids_are_monotonic() {
        let backend = MemoryBackend::new();
        let a = backend.s3_image_create(&ctx(), Uuid::new_v4()).unwrap();
        let b = backend.s3_image_create(&ctx(), Uuid::new_v4()).unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);

        assert_eq!(backend.s3_image_get(&ctx(), 2).unwrap(), b);
        assert_eq!(backend.s3_image_get_by_uuid(&ctx(), a.uuid).unwrap(), a);
    }

    #[test]
    fn test_s3_image_not_found() {
        let backend = MemoryBackend::new();
        let err = backend.s3_image_get(&ctx(), 7).unwrap_err();
        assert!(matches!(
            err,
            StorageError::NotFound { resource: Resource::Image, ref id } if id == "7"
        ));
    }

    #[test]
    fn test_volume_forced_id() {
        let backend = MemoryBackend::new();
        let uuid = Uuid::new_v4();
        let mapping = backend.ec2_volume_create(&ctx(), uuid, Some(100)).unwrap();
        assert_eq!(mapping.id, 100);
        assert_eq!(backend.get_ec2_volume_id_by_uuid(&ctx(), uuid).unwrap(), 100);
        assert_eq!(backend.get_volume_uuid_by_ec2_id(&ctx(), 100).unwrap(), uuid);

        // Auto-assigned ids continue past the forced one.
        let next = backend.ec2_volume_create(&ctx(), Uuid::new_v4(), None).unwrap();
        assert_eq!(next.id, 101);
    }

    #[test]
    fn test_volume_forced_id_must_be_unique() {
        let backend = MemoryBackend::new();
        backend
            .ec2_volume_create(&ctx(), Uuid::new_v4(), Some(5))
            .unwrap();
        let err = backend
            .ec2_volume_create(&ctx(), Uuid::new_v4(), Some(5))
            .unwrap_err();
        assert!(matches!(err, StorageError::Duplicate { field: "id", .. }));
    }

    #[test]
    fn test_uuid_mapped_once() {
        let backend = MemoryBackend::new();
        let uuid = Uuid::new_v4();
        backend.ec2_snapshot_create(&ctx(), uuid, None).unwrap();
        let err = backend.ec2_snapshot_create(&ctx(), uuid, None).unwrap_err();
        assert!(matches!(err, StorageError::Duplicate { field: "uuid", .. }));
    }

    #[test]
    fn test_forced_id_out_of_range() {
        let backend = MemoryBackend::new();
        for bad in [0, -3, MAX_INT + 1] {
            let err = backend
                .ec2_snapshot_create(&ctx(), Uuid::new_v4(), Some(bad))
                .unwrap_err();
            assert!(matches!(err, StorageError::InvalidId { .. }));
        }
    }

    #[test]
    fn test_tables_are_independent() {
        let backend = MemoryBackend::new();
        let uuid = Uuid::new_v4();
        backend.ec2_volume_create(&ctx(), uuid, None).unwrap();
        backend.ec2_snapshot_create(&ctx(), uuid, None).unwrap();

        assert!(backend.get_ec2_instance_id_by_uuid(&ctx(), uuid).is_err());
        assert_eq!(backend.get_ec2_snapshot_id_by_uuid(&ctx(), uuid).unwrap(), 1);
    }

    #[test]
    fn test_instance_mapping_lookups() {
        let backend = MemoryBackend::new();
        let uuid = Uuid::new_v4();
        let created = backend.ec2_instance_create(&ctx(), uuid, None).unwrap();

        assert_eq!(backend.ec2_instance_get_by_uuid(&ctx(), uuid).unwrap(), created);
        assert_eq!(backend.ec2_instance_get_by_id(&ctx(), created.id).unwrap(), created);
        assert_eq!(backend.get_instance_uuid_by_ec2_id(&ctx(), created.id).unwrap(), uuid);
        assert!(
            backend
                .get_ec2_instance_id_by_uuid(&ctx(), Uuid::new_v4())
                .unwrap_err()
                .is_not_found()
        );
    }

    #[test]
    fn test_instance_create_reports_conflicting_column() {
        let backend = MemoryBackend::new();
        let uuid = Uuid::new_v4();
        backend.instance_create(Instance::new(1, uuid, "p", "u")).unwrap();

        let err = backend
            .instance_create(Instance::new(2, uuid, "p", "u"))
            .unwrap_err();
        assert!(matches!(err, StorageError::Duplicate { field: "uuid", .. }));

        let err = backend
            .instance_create(Instance::new(1, Uuid::new_v4(), "p", "u"))
            .unwrap_err();
        assert!(matches!(err, StorageError::Duplicate { field: "id", .. }));
    }

    #[test]
    fn test_instance_project_scoping_and_read_deleted() {
        let backend = MemoryBackend::new();
        let uuid = Uuid::new_v4();
        let mut instance = Instance::new(1, uuid, "proj-a", "alice");
        instance.deleted = true;
        backend.instance_create(instance).unwrap();

        let owner = RequestContext::new("alice", "proj-a");
        assert!(backend.instance_get_by_uuid(&owner, uuid, None, false).is_err());

        let owner = owner.with_read_deleted(ReadDeleted::Yes);
        assert!(backend.instance_get_by_uuid(&owner, uuid, None, false).is_ok());

        let stranger =
            RequestContext::new("bob", "proj-b").with_read_deleted(ReadDeleted::Yes);
        assert!(
            backend
                .instance_get_by_uuid(&stranger, uuid, None, false)
                .unwrap_err()
                .is_not_found()
        );
    }

    #[test]
    fn test_block_device_mappings() {
        let backend = MemoryBackend::new();
        let instance = Uuid::new_v4();
        let other = Uuid::new_v4();

        backend
            .block_device_mapping_create(
                BlockDeviceMapping::volume(2, instance, Uuid::new_v4()).with_device_name("/dev/vdb"),
            )
            .unwrap();
        backend
            .block_device_mapping_create(
                BlockDeviceMapping::volume(1, instance, Uuid::new_v4())
                    .with_device_name("/dev/vda")
                    .with_boot_index(0),
            )
            .unwrap();
        backend
            .block_device_mapping_create(BlockDeviceMapping::volume(3, other, Uuid::new_v4()))
            .unwrap();

        let bdms = backend
            .block_device_mapping_get_all_by_instance(&ctx(), instance, false)
            .unwrap();
        let ids: Vec<i64> = bdms.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![1, 2]);

        let none = backend
            .block_device_mapping_get_all_by_instance(&ctx(), Uuid::new_v4(), true)
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_clones_share_tables() {
        let backend = MemoryBackend::new();
        let clone = backend.clone();
        let image = backend.s3_image_create(&ctx(), Uuid::new_v4()).unwrap();
        assert_eq!(clone.s3_image_get(&ctx(), image.id).unwrap(), image);
    }
}
