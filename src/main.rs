//! novadb Binary Entry Point
//!
//! Loads configuration, builds the database facade and runs one lookup or
//! create command, printing the result as JSON on stdout.

use std::path::Path;

use clap::{Args, Parser, Subcommand};
use novadb::{
    NovaDb, RequestContext,
    config::AppConfig,
    context::ReadDeleted,
    ec2_id::id_to_ec2_id,
    storage::{IdMapping, InstanceJoin, MappingKind, StorageBuilder},
};
use serde_json::{Value, json};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// novadb - EC2 id mapping database
#[derive(Parser, Debug)]
#[command(name = "novadb", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/novadb.yaml",
        env = "NOVADB_CONFIG"
    )]
    config: String,

    /// Database backend (overrides config file)
    #[arg(long, env = "NOVADB_DB_BACKEND")]
    backend: Option<String>,

    /// Database connection (overrides config file)
    #[arg(long, env = "NOVADB_DB_CONNECTION")]
    connection: Option<String>,

    /// Run backend calls on the worker pool (overrides config file)
    #[arg(long, env = "NOVADB_USE_TPOOL")]
    use_tpool: Option<bool>,

    #[command(flatten)]
    context: ContextArgs,

    #[command(subcommand)]
    command: Command,
}

/// Caller identity. Without `--project-id` commands run as admin.
#[derive(Args, Debug)]
struct ContextArgs {
    /// Project the caller belongs to
    #[arg(long, global = true)]
    project_id: Option<String>,

    /// User making the request
    #[arg(long, global = true, default_value = "novadb")]
    user_id: String,

    /// Deleted row visibility: no, yes, only
    #[arg(long, global = true, default_value = "no")]
    read_deleted: ReadDeleted,
}

impl ContextArgs {
    fn to_context(&self) -> RequestContext {
        let ctx = match self.project_id {
            Some(ref project) => RequestContext::new(&self.user_id, project),
            None => RequestContext::admin(),
        };
        ctx.with_read_deleted(self.read_deleted)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// S3 image mappings
    #[command(subcommand)]
    Image(ImageCommand),
    /// Volume mappings
    #[command(subcommand)]
    Volume(VolumeCommand),
    /// Snapshot mappings
    #[command(subcommand)]
    Snapshot(SnapshotCommand),
    /// Instance mappings and records
    #[command(subcommand)]
    Instance(InstanceCommand),
    /// Block device mappings of an instance
    Bdm {
        instance_uuid: Uuid,
        #[arg(long)]
        use_slave: bool,
    },
    /// Check that the backend is reachable
    Health,
}

#[derive(Subcommand, Debug)]
enum ImageCommand {
    /// Look up by EC2 id (`ami-0000000a` or `10`)
    Get {
        #[arg(value_parser = parse_image_id)]
        id: i64,
    },
    /// Look up by UUID
    GetByUuid { uuid: Uuid },
    /// Allocate an EC2 id for an image UUID
    Create { uuid: Uuid },
}

#[derive(Subcommand, Debug)]
enum VolumeCommand {
    /// EC2 id of a volume UUID
    Id { uuid: Uuid },
    /// Volume UUID of an EC2 id (`vol-0000000a` or `10`)
    Uuid {
        #[arg(value_parser = parse_volume_id)]
        id: i64,
    },
    /// Allocate an EC2 id for a volume UUID
    Create {
        uuid: Uuid,
        #[arg(long, value_parser = parse_volume_id)]
        id: Option<i64>,
    },
}

#[derive(Subcommand, Debug)]
enum SnapshotCommand {
    /// EC2 id of a snapshot UUID
    Id { uuid: Uuid },
    /// Snapshot UUID of an EC2 id (`snap-0000000a` or `10`)
    Uuid {
        #[arg(value_parser = parse_snapshot_id)]
        id: i64,
    },
    /// Allocate an EC2 id for a snapshot UUID
    Create {
        uuid: Uuid,
        #[arg(long, value_parser = parse_snapshot_id)]
        id: Option<i64>,
    },
}

#[derive(Subcommand, Debug)]
enum InstanceCommand {
    /// EC2 id of an instance UUID
    Id { uuid: Uuid },
    /// Instance UUID of an EC2 id (`i-0000000a` or `10`)
    Uuid {
        #[arg(value_parser = parse_instance_id)]
        id: i64,
    },
    /// Allocate an EC2 id for an instance UUID
    Create {
        uuid: Uuid,
        #[arg(long, value_parser = parse_instance_id)]
        id: Option<i64>,
    },
    /// Mapping row by UUID
    Mapping { uuid: Uuid },
    /// Mapping row by EC2 id
    MappingById {
        #[arg(value_parser = parse_instance_id)]
        id: i64,
    },
    /// Instance record by UUID
    Get {
        uuid: Uuid,
        /// Columns to join (metadata, system_metadata); defaults to both
        #[arg(long, value_delimiter = ',')]
        join: Option<Vec<InstanceJoin>>,
        /// Join nothing
        #[arg(long, conflicts_with = "join")]
        no_join: bool,
        #[arg(long)]
        use_slave: bool,
    },
}

/// Accept either an EC2 id of the given kind (`vol-0000000a`) or a
/// positive integer.
fn parse_id(kind: MappingKind, s: &str) -> Result<i64, String> {
    kind.parse_id(s).map_err(|e| e.to_string())
}

fn parse_image_id(s: &str) -> Result<i64, String> {
    parse_id(MappingKind::S3Image, s)
}

fn parse_volume_id(s: &str) -> Result<i64, String> {
    parse_id(MappingKind::Volume, s)
}

fn parse_snapshot_id(s: &str) -> Result<i64, String> {
    parse_id(MappingKind::Snapshot, s)
}

fn parse_instance_id(s: &str) -> Result<i64, String> {
    parse_id(MappingKind::Instance, s)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing; stdout is reserved for command output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,novadb=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = if Path::new(&cli.config).exists() {
        tracing::info!("Loading configuration from: {}", cli.config);
        AppConfig::load(&cli.config)?
    } else {
        tracing::warn!("Config file {} not found, using defaults", cli.config);
        AppConfig::default()
    };

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(backend) = cli.backend {
        config.database.backend = backend;
    }
    if let Some(connection) = cli.connection {
        config.database.connection = connection;
    }
    if let Some(use_tpool) = cli.use_tpool {
        config.database.use_tpool = use_tpool;
    }
    config.validate()?;

    tracing::info!(
        backend = %config.database.backend,
        connection = %config.database.connection,
        use_tpool = config.database.use_tpool,
        "Database configured"
    );

    let db = StorageBuilder::from_config(&config.database)?.build()?;
    let ctx = cli.context.to_context();

    let result = execute(&db, &ctx, cli.command).await;
    db.close().await?;

    let output = result?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn execute(
    db: &NovaDb,
    ctx: &RequestContext,
    command: Command,
) -> Result<Value, Box<dyn std::error::Error>> {
    let value = match command {
        Command::Image(cmd) => match cmd {
            ImageCommand::Get { id } => {
                mapping_json(&db.s3_image_get(ctx, id).await?, MappingKind::S3Image)
            }
            ImageCommand::GetByUuid { uuid } => {
                mapping_json(&db.s3_image_get_by_uuid(ctx, uuid).await?, MappingKind::S3Image)
            }
            ImageCommand::Create { uuid } => {
                mapping_json(&db.s3_image_create(ctx, uuid).await?, MappingKind::S3Image)
            }
        },
        Command::Volume(cmd) => match cmd {
            VolumeCommand::Id { uuid } => {
                id_json(db.get_ec2_volume_id_by_uuid(ctx, uuid).await?, MappingKind::Volume)
            }
            VolumeCommand::Uuid { id } => json!({
                "uuid": db.get_volume_uuid_by_ec2_id(ctx, id).await?,
            }),
            VolumeCommand::Create { uuid, id } => {
                mapping_json(&db.ec2_volume_create(ctx, uuid, id).await?, MappingKind::Volume)
            }
        },
        Command::Snapshot(cmd) => match cmd {
            SnapshotCommand::Id { uuid } => {
                id_json(db.get_ec2_snapshot_id_by_uuid(ctx, uuid).await?, MappingKind::Snapshot)
            }
            SnapshotCommand::Uuid { id } => json!({
                "uuid": db.get_snapshot_uuid_by_ec2_id(ctx, id).await?,
            }),
            SnapshotCommand::Create { uuid, id } => {
                mapping_json(&db.ec2_snapshot_create(ctx, uuid, id).await?, MappingKind::Snapshot)
            }
        },
        Command::Instance(cmd) => match cmd {
            InstanceCommand::Id { uuid } => {
                id_json(db.get_ec2_instance_id_by_uuid(ctx, uuid).await?, MappingKind::Instance)
            }
            InstanceCommand::Uuid { id } => json!({
                "uuid": db.get_instance_uuid_by_ec2_id(ctx, id).await?,
            }),
            InstanceCommand::Create { uuid, id } => {
                mapping_json(&db.ec2_instance_create(ctx, uuid, id).await?, MappingKind::Instance)
            }
            InstanceCommand::Mapping { uuid } => {
                mapping_json(&db.ec2_instance_get_by_uuid(ctx, uuid).await?, MappingKind::Instance)
            }
            InstanceCommand::MappingById { id } => {
                mapping_json(&db.ec2_instance_get_by_id(ctx, id).await?, MappingKind::Instance)
            }
            InstanceCommand::Get {
                uuid,
                join,
                no_join,
                use_slave,
            } => {
                let columns: Option<Vec<InstanceJoin>> = if no_join { Some(Vec::new()) } else { join };
                let instance = db
                    .instance_get_by_uuid(ctx, uuid, columns.as_deref(), use_slave)
                    .await?;
                serde_json::to_value(instance)?
            }
        },
        Command::Bdm {
            instance_uuid,
            use_slave,
        } => {
            let bdms = db
                .block_device_mapping_get_all_by_instance(ctx, instance_uuid, use_slave)
                .await?;
            serde_json::to_value(bdms)?
        }
        Command::Health => {
            db.run(|backend| backend.health_check()).await?;
            json!({ "status": "ok" })
        }
    };
    Ok(value)
}

fn mapping_json(mapping: &IdMapping, kind: MappingKind) -> Value {
    json!({
        "id": mapping.id,
        "ec2_id": mapping.ec2_id(kind.prefix()),
        "uuid": mapping.uuid,
        "created_at": mapping.created_at,
    })
}

fn id_json(id: i64, kind: MappingKind) -> Value {
    json!({
        "id": id,
        "ec2_id": id_to_ec2_id(id, kind.prefix()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_args_accept_matching_prefix_or_integer() {
        assert_eq!(parse_instance_id("i-0000000a"), Ok(10));
        assert_eq!(parse_instance_id("10"), Ok(10));
        assert_eq!(parse_volume_id("vol-000000ff"), Ok(255));
        assert_eq!(parse_image_id("aki-00000001"), Ok(1));
    }

    #[test]
    fn test_id_args_reject_negative_and_foreign_prefix() {
        assert!(parse_volume_id("-5").is_err());
        assert!(parse_instance_id("0").is_err());

        let err = parse_instance_id("vol-0000000a").unwrap_err();
        assert!(err.contains("expected a i- id"), "{err}");
        assert!(parse_snapshot_id("ami-00000001").is_err());
    }

    #[test]
    fn test_cli_rejects_mismatched_prefix() {
        let parsed = Cli::try_parse_from(["novadb", "instance", "uuid", "vol-0000000a"]);
        assert!(parsed.is_err());

        let cli = Cli::try_parse_from([
            "novadb",
            "volume",
            "create",
            "--id",
            "vol-00000064",
            "8f14e45f-ceea-467f-a0e6-7f1c2b3c4d5e",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Command::Volume(VolumeCommand::Create { id: Some(100), .. })
        ));
    }
}
