//! User-facing database facade.
//!
//! [`NovaDb`] exposes the EC2 mapping operations as async methods. Each one
//! forwards its arguments unchanged to the same-named [`DbBackend`]
//! operation and returns the backend's result unchanged, either directly on
//! the calling task or through a [`WorkerPool`].

use std::sync::Arc;

use uuid::Uuid;

use crate::context::RequestContext;
use crate::storage::actor::WorkerPool;
use crate::storage::backend::DbBackend;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{
    BlockDeviceMapping, Instance, InstanceIdMapping, InstanceJoin, S3Image, SnapshotIdMapping,
    VolumeIdMapping,
};

/// How backend calls are executed.
#[derive(Clone)]
enum Executor {
    /// On the calling task.
    Direct,
    /// On a worker thread.
    Pooled(Arc<WorkerPool>),
}

/// Database API handle.
///
/// Cheap to clone; clones share the backend and the executor.
#[derive(Clone)]
pub struct NovaDb {
    backend: Arc<dyn DbBackend>,
    executor: Executor,
}

impl std::fmt::Debug for NovaDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let executor = match &self.executor {
            Executor::Direct => "direct",
            Executor::Pooled(_) => "pooled",
        };
        f.debug_struct("NovaDb")
            .field("executor", &executor)
            .finish_non_exhaustive()
    }
}

impl NovaDb {
    /// Facade that calls the backend on the calling task.
    pub fn new(backend: Arc<dyn DbBackend>) -> Self {
        Self {
            backend,
            executor: Executor::Direct,
        }
    }

    /// Facade that runs every call on a pool of `workers` threads.
    pub fn pooled(
        backend: Arc<dyn DbBackend>,
        workers: usize,
        queue_capacity: usize,
    ) -> StorageResult<Self> {
        let pool = WorkerPool::spawn(Arc::clone(&backend), workers, queue_capacity)?;
        Ok(Self {
            backend,
            executor: Executor::Pooled(Arc::new(pool)),
        })
    }

    /// The backend every call is forwarded to.
    pub fn backend(&self) -> &Arc<dyn DbBackend> {
        &self.backend
    }

    pub fn is_pooled(&self) -> bool {
        matches!(self.executor, Executor::Pooled(_))
    }

    /// Run an arbitrary backend call through this facade's executor.
    ///
    /// Reaches backend capabilities that have no dedicated method here.
    pub async fn run<T, F>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&dyn DbBackend) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        match &self.executor {
            Executor::Direct => f(self.backend.as_ref()),
            Executor::Pooled(pool) => pool.submit(f).await,
        }
    }

    /// Stop the worker pool, if any. Pooled calls made afterwards fail with
    /// [`StorageError::WorkerPoolClosed`].
    ///
    /// Blocks the calling thread until the workers have drained the queue.
    /// Inside a runtime use [`close`](Self::close) instead. Dropping the last
    /// clone of a pooled facade blocks the same way.
    pub fn shutdown(&self) {
        if let Executor::Pooled(pool) = &self.executor {
            pool.shutdown();
        }
    }

    /// Async [`shutdown`](Self::shutdown): the workers are joined on the
    /// runtime's blocking thread pool.
    pub async fn close(&self) -> StorageResult<()> {
        if let Executor::Pooled(pool) = &self.executor {
            let pool = Arc::clone(pool);
            tokio::task::spawn_blocking(move || pool.shutdown())
                .await
                .map_err(|e| StorageError::Internal(format!("worker pool shutdown failed: {e}")))?;
        }
        Ok(())
    }

    // =========================================================================
    // S3 images
    // =========================================================================

    pub async fn s3_image_get(&self, ctx: &RequestContext, image_id: i64) -> StorageResult<S3Image> {
        let ctx = ctx.clone();
        self.run(move |db| db.s3_image_get(&ctx, image_id)).await
    }

    pub async fn s3_image_get_by_uuid(
        &self,
        ctx: &RequestContext,
        image_uuid: Uuid,
    ) -> StorageResult<S3Image> {
        let ctx = ctx.clone();
        self.run(move |db| db.s3_image_get_by_uuid(&ctx, image_uuid))
            .await
    }

    pub async fn s3_image_create(
        &self,
        ctx: &RequestContext,
        image_uuid: Uuid,
    ) -> StorageResult<S3Image> {
        let ctx = ctx.clone();
        self.run(move |db| db.s3_image_create(&ctx, image_uuid)).await
    }

    // =========================================================================
    // Volumes
    // =========================================================================

    pub async fn get_ec2_volume_id_by_uuid(
        &self,
        ctx: &RequestContext,
        volume_id: Uuid,
    ) -> StorageResult<i64> {
        let ctx = ctx.clone();
        self.run(move |db| db.get_ec2_volume_id_by_uuid(&ctx, volume_id))
            .await
    }

    pub async fn get_volume_uuid_by_ec2_id(
        &self,
        ctx: &RequestContext,
        ec2_id: i64,
    ) -> StorageResult<Uuid> {
        let ctx = ctx.clone();
        self.run(move |db| db.get_volume_uuid_by_ec2_id(&ctx, ec2_id))
            .await
    }

    pub async fn ec2_volume_create(
        &self,
        ctx: &RequestContext,
        volume_id: Uuid,
        forced_id: Option<i64>,
    ) -> StorageResult<VolumeIdMapping> {
        let ctx = ctx.clone();
        self.run(move |db| db.ec2_volume_create(&ctx, volume_id, forced_id))
            .await
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    pub async fn get_snapshot_uuid_by_ec2_id(
        &self,
        ctx: &RequestContext,
        ec2_id: i64,
    ) -> StorageResult<Uuid> {
        let ctx = ctx.clone();
        self.run(move |db| db.get_snapshot_uuid_by_ec2_id(&ctx, ec2_id))
            .await
    }

    pub async fn get_ec2_snapshot_id_by_uuid(
        &self,
        ctx: &RequestContext,
        snapshot_id: Uuid,
    ) -> StorageResult<i64> {
        let ctx = ctx.clone();
        self.run(move |db| db.get_ec2_snapshot_id_by_uuid(&ctx, snapshot_id))
            .await
    }

    pub async fn ec2_snapshot_create(
        &self,
        ctx: &RequestContext,
        snapshot_id: Uuid,
        forced_id: Option<i64>,
    ) -> StorageResult<SnapshotIdMapping> {
        let ctx = ctx.clone();
        self.run(move |db| db.ec2_snapshot_create(&ctx, snapshot_id, forced_id))
            .await
    }

    // =========================================================================
    // Instances
    // =========================================================================

    pub async fn get_ec2_instance_id_by_uuid(
        &self,
        ctx: &RequestContext,
        instance_id: Uuid,
    ) -> StorageResult<i64> {
        let ctx = ctx.clone();
        self.run(move |db| db.get_ec2_instance_id_by_uuid(&ctx, instance_id))
            .await
    }

    pub async fn get_instance_uuid_by_ec2_id(
        &self,
        ctx: &RequestContext,
        ec2_id: i64,
    ) -> StorageResult<Uuid> {
        let ctx = ctx.clone();
        self.run(move |db| db.get_instance_uuid_by_ec2_id(&ctx, ec2_id))
            .await
    }

    pub async fn ec2_instance_create(
        &self,
        ctx: &RequestContext,
        instance_uuid: Uuid,
        id: Option<i64>,
    ) -> StorageResult<InstanceIdMapping> {
        let ctx = ctx.clone();
        self.run(move |db| db.ec2_instance_create(&ctx, instance_uuid, id))
            .await
    }

    pub async fn ec2_instance_get_by_uuid(
        &self,
        ctx: &RequestContext,
        instance_uuid: Uuid,
    ) -> StorageResult<InstanceIdMapping> {
        let ctx = ctx.clone();
        self.run(move |db| db.ec2_instance_get_by_uuid(&ctx, instance_uuid))
            .await
    }

    pub async fn ec2_instance_get_by_id(
        &self,
        ctx: &RequestContext,
        instance_id: i64,
    ) -> StorageResult<InstanceIdMapping> {
        let ctx = ctx.clone();
        self.run(move |db| db.ec2_instance_get_by_id(&ctx, instance_id))
            .await
    }

    /// Fetch an instance record.
    ///
    /// `columns_to_join = None` joins metadata and system metadata.
    pub async fn instance_get_by_uuid(
        &self,
        ctx: &RequestContext,
        uuid: Uuid,
        columns_to_join: Option<&[InstanceJoin]>,
        use_slave: bool,
    ) -> StorageResult<Instance> {
        let ctx = ctx.clone();
        let columns_to_join = columns_to_join.map(<[InstanceJoin]>::to_vec);
        self.run(move |db| {
            db.instance_get_by_uuid(&ctx, uuid, columns_to_join.as_deref(), use_slave)
        })
        .await
    }

    // =========================================================================
    // Block devices
    // =========================================================================

    pub async fn block_device_mapping_get_all_by_instance(
        &self,
        ctx: &RequestContext,
        instance_uuid: Uuid,
        use_slave: bool,
    ) -> StorageResult<Vec<BlockDeviceMapping>> {
        let ctx = ctx.clone();
        self.run(move |db| db.block_device_mapping_get_all_by_instance(&ctx, instance_uuid, use_slave))
            .await
    }
}
