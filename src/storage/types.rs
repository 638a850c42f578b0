//! Core data types for the storage layer.
//!
//! - [`IdMapping`]: EC2 integer id <-> UUID pair, shared by images, volumes,
//!   snapshots and instances
//! - [`Instance`]: read-only view of a compute instance
//! - [`BlockDeviceMapping`]: a device attached to an instance

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::ec2_id::{Ec2IdError, Ec2Prefix, id_to_ec2_id, parse_ec2_id_with};
use crate::storage::error::Resource;

/// An EC2 integer id mapped to an internal UUID.
///
/// One table per [`MappingKind`]; both columns are unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMapping {
    /// EC2 integer id, `1..=MAX_INT`.
    pub id: i64,
    /// Internal UUID.
    pub uuid: Uuid,
    /// Creation timestamp (UTC).
    pub created_at: DateTime<Utc>,
}

impl IdMapping {
    pub fn new(id: i64, uuid: Uuid) -> Self {
        Self {
            id,
            uuid,
            created_at: now(),
        }
    }

    /// Render the id as an EC2 id with the given prefix.
    pub fn ec2_id(&self, prefix: Ec2Prefix) -> String {
        id_to_ec2_id(self.id, prefix)
    }
}

/// Current time truncated to the microsecond precision the database stores.
pub(crate) fn now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}

/// Local S3 image record.
pub type S3Image = IdMapping;
/// Volume id mapping.
pub type VolumeIdMapping = IdMapping;
/// Snapshot id mapping.
pub type SnapshotIdMapping = IdMapping;
/// Instance id mapping.
pub type InstanceIdMapping = IdMapping;

/// Which id-mapping table an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum MappingKind {
    S3Image,
    Volume,
    Snapshot,
    Instance,
}

impl MappingKind {
    pub const ALL: [MappingKind; 4] = [
        MappingKind::S3Image,
        MappingKind::Volume,
        MappingKind::Snapshot,
        MappingKind::Instance,
    ];

    pub fn table(self) -> &'static str {
        match self {
            Self::S3Image => "s3_images",
            Self::Volume => "volume_id_mappings",
            Self::Snapshot => "snapshot_id_mappings",
            Self::Instance => "instance_id_mappings",
        }
    }

    pub fn resource(self) -> Resource {
        match self {
            Self::S3Image => Resource::Image,
            Self::Volume => Resource::Volume,
            Self::Snapshot => Resource::Snapshot,
            Self::Instance => Resource::Instance,
        }
    }

    /// Default EC2 prefix; images may also use `aki`/`ari`.
    pub fn prefix(self) -> Ec2Prefix {
        match self {
            Self::S3Image => Ec2Prefix::Ami,
            Self::Volume => Ec2Prefix::Vol,
            Self::Snapshot => Ec2Prefix::Snap,
            Self::Instance => Ec2Prefix::I,
        }
    }

    /// Prefixes accepted when parsing ids of this kind.
    pub fn prefixes(self) -> &'static [Ec2Prefix] {
        match self {
            Self::S3Image => &[Ec2Prefix::Ami, Ec2Prefix::Aki, Ec2Prefix::Ari],
            Self::Volume => &[Ec2Prefix::Vol],
            Self::Snapshot => &[Ec2Prefix::Snap],
            Self::Instance => &[Ec2Prefix::I],
        }
    }

    /// Parse a decimal or EC2 id, rejecting prefixes of other kinds.
    pub fn parse_id(self, s: &str) -> Result<i64, Ec2IdError> {
        parse_ec2_id_with(s, self.prefixes())
    }
}

/// Extra columns loaded by `instance_get_by_uuid`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum InstanceJoin {
    Metadata,
    SystemMetadata,
}

impl InstanceJoin {
    /// Joined when the caller does not name any columns.
    pub const DEFAULT: [InstanceJoin; 2] = [InstanceJoin::Metadata, InstanceJoin::SystemMetadata];
}

/// A compute instance as seen by the EC2 layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: i64,
    pub uuid: Uuid,
    pub project_id: String,
    pub user_id: String,
    pub hostname: Option<String>,
    pub display_name: Option<String>,
    /// e.g. `active`, `stopped`, `error`.
    pub vm_state: String,
    pub image_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub launched_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    /// User metadata; `None` unless joined.
    pub metadata: Option<BTreeMap<String, String>>,
    /// System metadata; `None` unless joined.
    pub system_metadata: Option<BTreeMap<String, String>>,
}

impl Instance {
    pub fn new(
        id: i64,
        uuid: Uuid,
        project_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            id,
            uuid,
            project_id: project_id.into(),
            user_id: user_id.into(),
            hostname: None,
            display_name: None,
            vm_state: "active".to_string(),
            image_ref: None,
            created_at: now(),
            launched_at: None,
            deleted: false,
            metadata: None,
            system_metadata: None,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_system_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.system_metadata
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Keep only the joined columns, the way a joined query would return them.
    pub(crate) fn project_joins(mut self, columns_to_join: Option<&[InstanceJoin]>) -> Self {
        let joins = columns_to_join.unwrap_or(&InstanceJoin::DEFAULT[..]);
        self.metadata = if joins.contains(&InstanceJoin::Metadata) {
            Some(self.metadata.unwrap_or_default())
        } else {
            None
        };
        self.system_metadata = if joins.contains(&InstanceJoin::SystemMetadata) {
            Some(self.system_metadata.unwrap_or_default())
        } else {
            None
        };
        self
    }
}

/// Where a block device's content comes from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SourceType {
    Blank,
    Snapshot,
    Image,
    Volume,
}

/// Where a block device lives.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DestinationType {
    Local,
    Volume,
}

/// A block device attached to an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDeviceMapping {
    pub id: i64,
    pub instance_uuid: Uuid,
    /// e.g. `/dev/vda`.
    pub device_name: Option<String>,
    pub source_type: SourceType,
    pub destination_type: DestinationType,
    pub volume_id: Option<Uuid>,
    pub snapshot_id: Option<Uuid>,
    pub image_id: Option<Uuid>,
    /// Size in GiB.
    pub volume_size: Option<i64>,
    pub boot_index: Option<i64>,
    pub delete_on_termination: bool,
    pub no_device: bool,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl BlockDeviceMapping {
    /// A volume-backed device.
    pub fn volume(id: i64, instance_uuid: Uuid, volume_id: Uuid) -> Self {
        Self {
            id,
            instance_uuid,
            device_name: None,
            source_type: SourceType::Volume,
            destination_type: DestinationType::Volume,
            volume_id: Some(volume_id),
            snapshot_id: None,
            image_id: None,
            volume_size: None,
            boot_index: None,
            delete_on_termination: false,
            no_device: false,
            deleted: false,
            created_at: now(),
        }
    }

    #[must_use]
    pub fn with_device_name(mut self, device_name: impl Into<String>) -> Self {
        self.device_name = Some(device_name.into());
        self
    }

    #[must_use]
    pub fn with_boot_index(mut self, boot_index: i64) -> Self {
        self.boot_index = Some(boot_index);
        self
    }
}
