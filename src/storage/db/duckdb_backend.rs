//! DuckDB backend implementation.
//!
//! Reads check a connection out of the pool per call. Id-mapping creation is
//! serialized by a write lock and runs inside a transaction, so the duplicate
//! check, id allocation and insert are atomic with respect to each other.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use duckdb::params;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::context::{ReadDeleted, RequestContext};
use crate::storage::backend::{DbBackend, check_forced_id, next_id};
use crate::storage::error::{Resource, StorageError, StorageResult};
use crate::storage::pool::{ConnectionPool, MEMORY_CONNECTION, PoolOptions};
use crate::storage::types::{
    BlockDeviceMapping, DestinationType, IdMapping, Instance, InstanceIdMapping, InstanceJoin,
    MappingKind, S3Image, SnapshotIdMapping, SourceType, VolumeIdMapping, now,
};

const INSTANCE_COLUMNS: &str = "id, uuid, project_id, user_id, hostname, display_name, vm_state, \
     image_ref, created_at, launched_at, deleted, metadata_json, system_metadata_json";

const BDM_COLUMNS: &str = "id, instance_uuid, device_name, source_type, destination_type, \
     volume_id, snapshot_id, image_id, volume_size, boot_index, delete_on_termination, \
     no_device, deleted, created_at";

/// DuckDB-backed implementation of [`DbBackend`].
pub struct DuckDbBackend {
    primary: Arc<ConnectionPool>,
    replica: Option<Arc<ConnectionPool>>,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for DuckDbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDbBackend")
            .field("replica", &self.replica.is_some())
            .finish_non_exhaustive()
    }
}

impl DuckDbBackend {
    /// Open (or create) the database at `connection`.
    pub fn open(connection: &str, options: PoolOptions) -> StorageResult<Self> {
        let primary = ConnectionPool::open(connection, options)?;
        tracing::info!(connection, "DuckDB backend opened");
        Ok(Self {
            primary,
            replica: None,
            write_lock: Mutex::new(()),
        })
    }

    /// Private in-memory database.
    pub fn in_memory() -> StorageResult<Self> {
        Self::open(MEMORY_CONNECTION, PoolOptions::default())
    }

    /// Serve `use_slave` reads from a replica database.
    pub fn with_replica(mut self, connection: &str, options: PoolOptions) -> StorageResult<Self> {
        self.replica = Some(ConnectionPool::open(connection, options)?);
        tracing::info!(connection, "DuckDB read replica attached");
        Ok(self)
    }

    fn reader(&self, use_slave: bool) -> &ConnectionPool {
        match (&self.replica, use_slave) {
            (Some(replica), true) => replica,
            _ => &self.primary,
        }
    }

    /// Insert an instance row.
    pub fn instance_create(&self, instance: Instance) -> StorageResult<()> {
        let metadata = serde_json::to_string(&instance.metadata.unwrap_or_default())?;
        let system_metadata =
            serde_json::to_string(&instance.system_metadata.unwrap_or_default())?;

        let _guard = self.write_lock.lock();
        let conn = self.primary.get()?;
        let uuid_taken: i64 = conn.query_row(
            "SELECT COUNT(*) FROM instances WHERE uuid = ?",
            params![instance.uuid.to_string()],
            |row| row.get(0),
        )?;
        if uuid_taken > 0 {
            return Err(StorageError::Duplicate {
                resource: Resource::Instance,
                field: "uuid",
                value: instance.uuid.to_string(),
            });
        }
        let id_taken: i64 = conn.query_row(
            "SELECT COUNT(*) FROM instances WHERE id = ?",
            params![instance.id],
            |row| row.get(0),
        )?;
        if id_taken > 0 {
            return Err(StorageError::Duplicate {
                resource: Resource::Instance,
                field: "id",
                value: instance.id.to_string(),
            });
        }

        conn.execute(
            &format!(
                "INSERT INTO instances ({INSTANCE_COLUMNS})
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                instance.id,
                instance.uuid.to_string(),
                &instance.project_id,
                &instance.user_id,
                instance.hostname.as_deref(),
                instance.display_name.as_deref(),
                &instance.vm_state,
                instance.image_ref.as_deref(),
                instance.created_at.timestamp_micros(),
                instance.launched_at.map(|t| t.timestamp_micros()),
                instance.deleted,
                metadata,
                system_metadata,
            ],
        )?;
        Ok(())
    }

    /// Insert a block device mapping row.
    pub fn block_device_mapping_create(&self, bdm: BlockDeviceMapping) -> StorageResult<()> {
        let _guard = self.write_lock.lock();
        let conn = self.primary.get()?;
        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM block_device_mapping WHERE id = ?",
            [bdm.id],
            |row| row.get(0),
        )?;
        if exists > 0 {
            return Err(StorageError::Duplicate {
                resource: Resource::BlockDeviceMapping,
                field: "id",
                value: bdm.id.to_string(),
            });
        }

        conn.execute(
            &format!(
                "INSERT INTO block_device_mapping ({BDM_COLUMNS})
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                bdm.id,
                bdm.instance_uuid.to_string(),
                bdm.device_name.as_deref(),
                bdm.source_type.as_ref(),
                bdm.destination_type.as_ref(),
                bdm.volume_id.map(|u| u.to_string()),
                bdm.snapshot_id.map(|u| u.to_string()),
                bdm.image_id.map(|u| u.to_string()),
                bdm.volume_size,
                bdm.boot_index,
                bdm.delete_on_termination,
                bdm.no_device,
                bdm.deleted,
                bdm.created_at.timestamp_micros(),
            ],
        )?;
        Ok(())
    }

    // =========================================================================
    // Id mappings
    // =========================================================================

    fn mapping_by_id(&self, kind: MappingKind, id: i64) -> StorageResult<IdMapping> {
        let conn = self.primary.get()?;
        let row = optional(conn.query_row(
            &format!("SELECT id, uuid, created_at FROM {} WHERE id = ?", kind.table()),
            [id],
            mapping_row,
        ))?;
        match row {
            Some(raw) => mapping_from_row(raw),
            None => Err(StorageError::not_found(kind.resource(), id)),
        }
    }

    fn mapping_by_uuid(&self, kind: MappingKind, uuid: Uuid) -> StorageResult<IdMapping> {
        let conn = self.primary.get()?;
        let row = optional(conn.query_row(
            &format!("SELECT id, uuid, created_at FROM {} WHERE uuid = ?", kind.table()),
            [uuid.to_string()],
            mapping_row,
        ))?;
        match row {
            Some(raw) => mapping_from_row(raw),
            None => Err(StorageError::not_found(kind.resource(), uuid)),
        }
    }

    fn mapping_create(
        &self,
        kind: MappingKind,
        uuid: Uuid,
        forced_id: Option<i64>,
    ) -> StorageResult<IdMapping> {
        let resource = kind.resource();
        let table = kind.table();
        if let Some(id) = forced_id {
            check_forced_id(resource, id)?;
        }

        let _guard = self.write_lock.lock();
        let mut conn = self.primary.get()?;
        let tx = conn.transaction()?;

        let uuid_taken: i64 = tx.query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE uuid = ?"),
            [uuid.to_string()],
            |row| row.get(0),
        )?;
        if uuid_taken > 0 {
            return Err(StorageError::Duplicate {
                resource,
                field: "uuid",
                value: uuid.to_string(),
            });
        }

        let id = match forced_id {
            Some(id) => {
                let id_taken: i64 = tx.query_row(
                    &format!("SELECT COUNT(*) FROM {table} WHERE id = ?"),
                    [id],
                    |row| row.get(0),
                )?;
                if id_taken > 0 {
                    return Err(StorageError::Duplicate {
                        resource,
                        field: "id",
                        value: id.to_string(),
                    });
                }
                id
            }
            None => {
                let max: Option<i64> =
                    tx.query_row(&format!("SELECT MAX(id) FROM {table}"), [], |row| {
                        row.get(0)
                    })?;
                next_id(resource, max)?
            }
        };

        let mapping = IdMapping {
            id,
            uuid,
            created_at: now(),
        };
        tx.execute(
            &format!("INSERT INTO {table} (id, uuid, created_at) VALUES (?, ?, ?)"),
            params![mapping.id, mapping.uuid.to_string(), mapping.created_at.timestamp_micros()],
        )?;
        tx.commit()?;

        tracing::debug!(kind = %kind, id, %uuid, "Id mapping created");
        Ok(mapping)
    }
}

impl DbBackend for DuckDbBackend {
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
        use_slave: bool,
    ) -> StorageResult<Instance> {
        let mut sql = format!("SELECT {INSTANCE_COLUMNS} FROM instances WHERE uuid = ?");
        let mut params: Vec<Box<dyn duckdb::ToSql>> = vec![Box::new(uuid.to_string())];

        push_read_deleted(&mut sql, ctx.read_deleted);
        if !ctx.is_admin
            && let Some(ref project_id) = ctx.project_id
        {
            sql.push_str(" AND project_id = ?");
            params.push(Box::new(project_id.clone()));
        }

        let param_refs: Vec<&dyn duckdb::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let conn = self.reader(use_slave).get()?;
        let row = optional(conn.query_row(&sql, param_refs.as_slice(), |row| {
            Ok(InstanceRow {
                id: row.get(0)?,
                uuid: row.get(1)?,
                project_id: row.get(2)?,
                user_id: row.get(3)?,
                hostname: row.get(4)?,
                display_name: row.get(5)?,
                vm_state: row.get(6)?,
                image_ref: row.get(7)?,
                created_at: row.get(8)?,
                launched_at: row.get(9)?,
                deleted: row.get(10)?,
                metadata_json: row.get(11)?,
                system_metadata_json: row.get(12)?,
            })
        }))?;

        match row {
            Some(row) => Ok(row.into_instance()?.project_joins(columns_to_join)),
            None => Err(StorageError::not_found(Resource::Instance, uuid)),
        }
    }

    fn block_device_mapping_get_all_by_instance(
        &self,
        ctx: &RequestContext,
        instance_uuid: Uuid,
        use_slave: bool,
    ) -> StorageResult<Vec<BlockDeviceMapping>> {
        let mut sql =
            format!("SELECT {BDM_COLUMNS} FROM block_device_mapping WHERE instance_uuid = ?");
        push_read_deleted(&mut sql, ctx.read_deleted);
        sql.push_str(" ORDER BY id");

        let conn = self.reader(use_slave).get()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([instance_uuid.to_string()], |row| {
                Ok(BdmRow {
                    id: row.get(0)?,
                    instance_uuid: row.get(1)?,
                    device_name: row.get(2)?,
                    source_type: row.get(3)?,
                    destination_type: row.get(4)?,
                    volume_id: row.get(5)?,
                    snapshot_id: row.get(6)?,
                    image_id: row.get(7)?,
                    volume_size: row.get(8)?,
                    boot_index: row.get(9)?,
                    delete_on_termination: row.get(10)?,
                    no_device: row.get(11)?,
                    deleted: row.get(12)?,
                    created_at: row.get(13)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(BdmRow::into_bdm).collect()
    }

    fn health_check(&self) -> StorageResult<()> {
        let conn = self.primary.get()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

// =============================================================================
// Row conversion
// =============================================================================

struct InstanceRow {
    id: i64,
    uuid: String,
    project_id: String,
    user_id: String,
    hostname: Option<String>,
    display_name: Option<String>,
    vm_state: String,
    image_ref: Option<String>,
    created_at: i64,
    launched_at: Option<i64>,
    deleted: bool,
    metadata_json: Option<String>,
    system_metadata_json: Option<String>,
}

impl InstanceRow {
    fn into_instance(self) -> StorageResult<Instance> {
        Ok(Instance {
            id: self.id,
            uuid: parse_uuid(&self.uuid)?,
            project_id: self.project_id,
            user_id: self.user_id,
            hostname: self.hostname,
            display_name: self.display_name,
            vm_state: self.vm_state,
            image_ref: self.image_ref,
            created_at: from_micros(self.created_at),
            launched_at: self.launched_at.map(from_micros),
            deleted: self.deleted,
            metadata: Some(parse_map(self.metadata_json.as_deref())?),
            system_metadata: Some(parse_map(self.system_metadata_json.as_deref())?),
        })
    }
}

struct BdmRow {
    id: i64,
    instance_uuid: String,
    device_name: Option<String>,
    source_type: String,
    destination_type: String,
    volume_id: Option<String>,
    snapshot_id: Option<String>,
    image_id: Option<String>,
    volume_size: Option<i64>,
    boot_index: Option<i64>,
    delete_on_termination: bool,
    no_device: bool,
    deleted: bool,
    created_at: i64,
}

impl BdmRow {
    fn into_bdm(self) -> StorageResult<BlockDeviceMapping> {
        Ok(BlockDeviceMapping {
            id: self.id,
            instance_uuid: parse_uuid(&self.instance_uuid)?,
            device_name: self.device_name,
            source_type: SourceType::from_str(&self.source_type).map_err(|_| {
                StorageError::InvalidData(format!("unknown source_type '{}'", self.source_type))
            })?,
            destination_type: DestinationType::from_str(&self.destination_type).map_err(|_| {
                StorageError::InvalidData(format!(
                    "unknown destination_type '{}'",
                    self.destination_type
                ))
            })?,
            volume_id: self.volume_id.as_deref().map(parse_uuid).transpose()?,
            snapshot_id: self.snapshot_id.as_deref().map(parse_uuid).transpose()?,
            image_id: self.image_id.as_deref().map(parse_uuid).transpose()?,
            volume_size: self.volume_size,
            boot_index: self.boot_index,
            delete_on_termination: self.delete_on_termination,
            no_device: self.no_device,
            deleted: self.deleted,
            created_at: from_micros(self.created_at),
        })
    }
}

fn mapping_row(row: &duckdb::Row<'_>) -> duckdb::Result<(i64, String, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn mapping_from_row((id, uuid, created_at): (i64, String, i64)) -> StorageResult<IdMapping> {
    Ok(IdMapping {
        id,
        uuid: parse_uuid(&uuid)?,
        created_at: from_micros(created_at),
    })
}

fn push_read_deleted(sql: &mut String, read_deleted: ReadDeleted) {
    match read_deleted {
        ReadDeleted::No => sql.push_str(" AND deleted = false"),
        ReadDeleted::Only => sql.push_str(" AND deleted = true"),
        ReadDeleted::Yes => {}
    }
}

/// Map "no rows" to `None`.
fn optional<T>(result: Result<T, duckdb::Error>) -> StorageResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StorageError::from(e)),
    }
}

fn parse_uuid(s: &str) -> StorageResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| StorageError::InvalidData(format!("bad uuid '{s}': {e}")))
}

fn parse_map(s: Option<&str>) -> StorageResult<BTreeMap<String, String>> {
    match s {
        None | Some("") | Some("{}") => Ok(BTreeMap::new()),
        Some(json) => Ok(serde_json::from_str(json)?),
    }
}

fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or(DateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ec2_id::MAX_INT;
    use tempfile::tempdir;

    fn ctx() -> RequestContext {
        RequestContext::admin()
    }

    #[test]
    fn test_s3_image_roundtrip() {
        let backend = DuckDbBackend::in_memory().unwrap();
        let uuid = Uuid::new_v4();

        let created = backend.s3_image_create(&ctx(), uuid).unwrap();
        assert_eq!(created.id, 1);
        assert_eq!(backend.s3_image_get(&ctx(), 1).unwrap(), created);
        assert_eq!(backend.s3_image_get_by_uuid(&ctx(), uuid).unwrap(), created);

        let second = backend.s3_image_create(&ctx(), Uuid::new_v4()).unwrap();
        assert_eq!(second.id, 2);
    }

    #[test]
    fn test_lookup_missing_rows() {
        let backend = DuckDbBackend::in_memory().unwrap();
        assert!(backend.s3_image_get(&ctx(), 1).unwrap_err().is_not_found());
        assert!(
            backend
                .get_volume_uuid_by_ec2_id(&ctx(), 1)
                .unwrap_err()
                .is_not_found()
        );
        let err = backend
            .get_ec2_snapshot_id_by_uuid(&ctx(), Uuid::new_v4())
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::NotFound {
                resource: Resource::Snapshot,
                ..
            }
        ));
    }

    #[test]
    fn test_volume_forced_id_then_auto() {
        let backend = DuckDbBackend::in_memory().unwrap();
        let forced = Uuid::new_v4();
        let mapping = backend.ec2_volume_create(&ctx(), forced, Some(40)).unwrap();
        assert_eq!(mapping.id, 40);
        assert_eq!(backend.get_ec2_volume_id_by_uuid(&ctx(), forced).unwrap(), 40);
        assert_eq!(backend.get_volume_uuid_by_ec2_id(&ctx(), 40).unwrap(), forced);

        let auto = backend.ec2_volume_create(&ctx(), Uuid::new_v4(), None).unwrap();
        assert_eq!(auto.id, 41);
    }

    #[test]
    fn test_duplicate_and_invalid_ids() {
        let backend = DuckDbBackend::in_memory().unwrap();
        let uuid = Uuid::new_v4();
        backend.ec2_snapshot_create(&ctx(), uuid, Some(3)).unwrap();

        let dup_id = backend
            .ec2_snapshot_create(&ctx(), Uuid::new_v4(), Some(3))
            .unwrap_err();
        assert!(matches!(dup_id, StorageError::Duplicate { field: "id", .. }));

        let dup_uuid = backend.ec2_snapshot_create(&ctx(), uuid, None).unwrap_err();
        assert!(matches!(dup_uuid, StorageError::Duplicate { field: "uuid", .. }));

        let invalid = backend
            .ec2_snapshot_create(&ctx(), Uuid::new_v4(), Some(MAX_INT + 1))
            .unwrap_err();
        assert!(matches!(invalid, StorageError::InvalidId { .. }));
    }

    #[test]
    fn test_instance_mapping() {
        let backend = DuckDbBackend::in_memory().unwrap();
        let uuid = Uuid::new_v4();
        let created = backend.ec2_instance_create(&ctx(), uuid, None).unwrap();

        assert_eq!(backend.get_ec2_instance_id_by_uuid(&ctx(), uuid).unwrap(), created.id);
        assert_eq!(backend.get_instance_uuid_by_ec2_id(&ctx(), created.id).unwrap(), uuid);
        assert_eq!(backend.ec2_instance_get_by_uuid(&ctx(), uuid).unwrap(), created);
        assert_eq!(backend.ec2_instance_get_by_id(&ctx(), created.id).unwrap(), created);
    }

    #[test]
    fn test_instance_get_by_uuid_joins_and_scoping() {
        let backend = DuckDbBackend::in_memory().unwrap();
        let uuid = Uuid::new_v4();
        let instance = Instance::new(7, uuid, "proj-a", "alice")
            .with_metadata("role", "db")
            .with_system_metadata("image_os", "linux");
        backend.instance_create(instance.clone()).unwrap();

        let owner = RequestContext::new("alice", "proj-a");
        let fetched = backend.instance_get_by_uuid(&owner, uuid, None, false).unwrap();
        assert_eq!(fetched.id, 7);
        assert_eq!(fetched.created_at, instance.created_at);
        assert_eq!(
            fetched.metadata.as_ref().and_then(|m| m.get("role")).map(String::as_str),
            Some("db")
        );
        assert!(fetched.system_metadata.is_some());

        let bare = backend
            .instance_get_by_uuid(&owner, uuid, Some(&[] as &[InstanceJoin]), false)
            .unwrap();
        assert!(bare.metadata.is_none());
        assert!(bare.system_metadata.is_none());

        let stranger = RequestContext::new("bob", "proj-b");
        assert!(
            backend
                .instance_get_by_uuid(&stranger, uuid, None, false)
                .unwrap_err()
                .is_not_found()
        );
    }

    #[test]
    fn test_deleted_instance_needs_read_deleted() {
        let backend = DuckDbBackend::in_memory().unwrap();
        let uuid = Uuid::new_v4();
        let mut instance = Instance::new(1, uuid, "p", "u");
        instance.deleted = true;
        backend.instance_create(instance.clone()).unwrap();

        assert!(backend.instance_get_by_uuid(&ctx(), uuid, None, false).is_err());
        let only = ctx().with_read_deleted(ReadDeleted::Only);
        assert!(backend.instance_get_by_uuid(&only, uuid, None, false).is_ok());
    }

    #[test]
    fn test_instance_create_reports_conflicting_column() {
        let backend = DuckDbBackend::in_memory().unwrap();
        let uuid = Uuid::new_v4();
        backend.instance_create(Instance::new(1, uuid, "p", "u")).unwrap();

        let err = backend
            .instance_create(Instance::new(2, uuid, "p", "u"))
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Duplicate { field: "uuid", ref value, .. } if *value == uuid.to_string()
        ));

        let err = backend
            .instance_create(Instance::new(1, Uuid::new_v4(), "p", "u"))
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Duplicate { field: "id", ref value, .. } if value == "1"
        ));
    }

    #[test]
    fn test_block_device_mappings_ordered() {
        let backend = DuckDbBackend::in_memory().unwrap();
        let instance = Uuid::new_v4();
        let volume = Uuid::new_v4();

        backend
            .block_device_mapping_create(
                BlockDeviceMapping::volume(9, instance, Uuid::new_v4()).with_device_name("/dev/vdb"),
            )
            .unwrap();
        backend
            .block_device_mapping_create(
                BlockDeviceMapping::volume(4, instance, volume)
                    .with_device_name("/dev/vda")
                    .with_boot_index(0),
            )
            .unwrap();
        let mut gone = BlockDeviceMapping::volume(5, instance, Uuid::new_v4());
        gone.deleted = true;
        backend.block_device_mapping_create(gone).unwrap();

        let bdms = backend
            .block_device_mapping_get_all_by_instance(&ctx(), instance, false)
            .unwrap();
        assert_eq!(bdms.iter().map(|b| b.id).collect::<Vec<_>>(), vec![4, 9]);
        assert_eq!(bdms[0].volume_id, Some(volume));
        assert_eq!(bdms[0].boot_index, Some(0));
        assert_eq!(bdms[0].source_type, SourceType::Volume);

        let all = ctx().with_read_deleted(ReadDeleted::Yes);
        assert_eq!(
            backend
                .block_device_mapping_get_all_by_instance(&all, instance, false)
                .unwrap()
                .len(),
            3
        );
    }

    #[test]
    fn test_use_slave_reads_replica() {
        let dir = tempdir().unwrap();
        let primary_path = dir.path().join("primary.duckdb");
        let replica_path = dir.path().join("replica.duckdb");
        let uuid = Uuid::new_v4();

        {
            let seed =
                DuckDbBackend::open(replica_path.to_str().unwrap(), PoolOptions::default())
                    .unwrap();
            seed.instance_create(Instance::new(1, uuid, "p", "u")).unwrap();
        }

        let backend = DuckDbBackend::open(primary_path.to_str().unwrap(), PoolOptions::default())
            .unwrap()
            .with_replica(replica_path.to_str().unwrap(), PoolOptions::default())
            .unwrap();

        assert!(backend.instance_get_by_uuid(&ctx(), uuid, None, true).is_ok());
        assert!(backend.instance_get_by_uuid(&ctx(), uuid, None, false).is_err());
    }

    #[test]
    fn test_data_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("novadb.duckdb");
        let uuid = Uuid::new_v4();

        {
            let backend =
                DuckDbBackend::open(path.to_str().unwrap(), PoolOptions::default()).unwrap();
            backend.ec2_volume_create(&ctx(), uuid, Some(12)).unwrap();
        }

        let backend = DuckDbBackend::open(path.to_str().unwrap(), PoolOptions::default()).unwrap();
        assert_eq!(backend.get_ec2_volume_id_by_uuid(&ctx(), uuid).unwrap(), 12);
        backend.health_check().unwrap();
    }
}
