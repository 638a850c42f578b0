//! Database schema definitions.

use duckdb::Connection;

use crate::storage::StorageError;
use crate::storage::types::MappingKind;

/// Id-mapping table: EC2 integer id <-> UUID, both unique.
///
/// Ids are allocated by the backend (largest + 1) rather than a sequence so
/// that forced ids never collide with later automatic ones.
fn mapping_table_ddl(table: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
    id          BIGINT PRIMARY KEY,
    uuid        VARCHAR NOT NULL UNIQUE,
    created_at  BIGINT NOT NULL
);
"#
    )
}

/// SQL statement for creating the instances table.
///
/// Metadata maps are stored as JSON strings.
pub const INSTANCES_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS instances (
    id                    BIGINT PRIMARY KEY,
    uuid                  VARCHAR NOT NULL UNIQUE,
    project_id            VARCHAR NOT NULL,
    user_id               VARCHAR NOT NULL,
    hostname              VARCHAR,
    display_name          VARCHAR,
    vm_state              VARCHAR NOT NULL,
    image_ref             VARCHAR,
    created_at            BIGINT NOT NULL,
    launched_at           BIGINT,
    deleted               BOOLEAN NOT NULL DEFAULT false,
    metadata_json         VARCHAR DEFAULT '{}',
    system_metadata_json  VARCHAR DEFAULT '{}'
);
"#;

/// SQL statement for creating the block_device_mapping table.
pub const BLOCK_DEVICE_MAPPING_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS block_device_mapping (
    id                     BIGINT PRIMARY KEY,
    instance_uuid          VARCHAR NOT NULL,
    device_name            VARCHAR,
    source_type            VARCHAR NOT NULL,
    destination_type       VARCHAR NOT NULL,
    volume_id              VARCHAR,
    snapshot_id            VARCHAR,
    image_id               VARCHAR,
    volume_size            BIGINT,
    boot_index             BIGINT,
    delete_on_termination  BOOLEAN NOT NULL DEFAULT false,
    no_device              BOOLEAN NOT NULL DEFAULT false,
    deleted                BOOLEAN NOT NULL DEFAULT false,
    created_at             BIGINT NOT NULL
);
CREATE INDEX IF NOT EXISTS block_device_mapping_instance_uuid_idx
    ON block_device_mapping (instance_uuid);
"#;

/// Initialize the database schema.
///
/// Creates all tables if they don't exist.
pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    for kind in MappingKind::ALL {
        conn.execute_batch(&mapping_table_ddl(kind.table()))?;
    }
    conn.execute_batch(INSTANCES_TABLE_DDL)?;
    conn.execute_batch(BLOCK_DEVICE_MAPPING_TABLE_DDL)?;

    tracing::debug!("Database schema initialized");
    Ok(())
}
