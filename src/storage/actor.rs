//! Worker pool that runs blocking backend calls off the async runtime.
//!
//! A fixed set of OS threads share one bounded job queue. Submitting awaits
//! queue space, the job runs on whichever worker picks it up, and the result
//! comes back over a oneshot channel.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::storage::StorageError;
use crate::storage::backend::DbBackend;
use crate::storage::error::StorageResult;

// =============================================================================
// Constants
// =============================================================================

/// Default number of queued jobs before submitters wait.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1_024;

/// Minimum worker count.
const MIN_WORKERS: usize = 2;

/// Maximum worker count.
const MAX_WORKERS: usize = 32;

/// Default worker count: available CPUs, clamped to 2-32.
pub fn default_worker_count() -> usize {
    thread::available_parallelism()
        .map(|p| p.get().clamp(MIN_WORKERS, MAX_WORKERS))
        .unwrap_or(4)
}

// =============================================================================
// Jobs
// =============================================================================

type Job = Box<dyn FnOnce(&dyn DbBackend) + Send + 'static>;

// =============================================================================
// Pool
// =============================================================================

/// Fixed-size pool of worker threads bound to one backend.
pub struct WorkerPool {
    tx: Mutex<Option<mpsc::Sender<Job>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    workers: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl WorkerPool {
    /// Spawn `workers` threads sharing a queue of `queue_capacity` jobs.
    ///
    /// Both values are raised to at least 1.
    pub fn spawn(
        backend: Arc<dyn DbBackend>,
        workers: usize,
        queue_capacity: usize,
    ) -> StorageResult<Self> {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel::<Job>(queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let rx = Arc::clone(&rx);
            let backend = Arc::clone(&backend);
            let handle = thread::Builder::new()
                .name(format!("novadb-tpool-{index}"))
                .spawn(move || worker_loop(index, rx, backend))
                .map_err(|e| StorageError::Internal(format!("Failed to spawn worker: {e}")))?;
            handles.push(handle);
        }

        tracing::info!(workers, queue_capacity, "WorkerPool started");
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            handles: Mutex::new(handles),
            workers,
        })
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }

    /// Run `f` on a worker and wait for its result.
    ///
    /// Waits for queue space when the queue is full. A panic inside `f` is
    /// reported as [`StorageError::Internal`].
    pub async fn submit<T, F>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&dyn DbBackend) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let tx = self
            .tx
            .lock()
            .clone()
            .ok_or(StorageError::WorkerPoolClosed)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |backend: &dyn DbBackend| {
            let result = match panic::catch_unwind(AssertUnwindSafe(|| f(backend))) {
                Ok(result) => result,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::error!(panic = %message, "Worker job panicked");
                    Err(StorageError::Internal(format!("worker job panicked: {message}")))
                }
            };
            // Receiver may have given up waiting.
            let _ = reply_tx.send(result);
        });

        tx.send(job)
            .await
            .map_err(|_| StorageError::WorkerPoolClosed)?;
        drop(tx);

        reply_rx.await.map_err(|_| StorageError::WorkerPoolClosed)?
    }

    /// Close the queue and wait for the workers to drain it.
    ///
    /// Joins the worker threads, so this blocks. Later submissions fail with
    /// [`StorageError::WorkerPoolClosed`].
    pub fn shutdown(&self) {
        let Some(tx) = self.tx.lock().take() else {
            return;
        };
        drop(tx);

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if handle.join().is_err() {
                tracing::warn!("Worker thread exited abnormally");
            }
        }
        tracing::info!(workers = self.workers, "WorkerPool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    index: usize,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    backend: Arc<dyn DbBackend>,
) {
    tracing::debug!(worker = index, "Worker started");

    loop {
        let job = {
            let mut rx = rx.lock();
            rx.blocking_recv()
        };
        match job {
            Some(job) => job(backend.as_ref()),
            None => break,
        }
    }

    tracing::debug!(worker = index, "Worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestContext;
    use crate::storage::memory::MemoryBackend;
    use uuid::Uuid;

    fn pool(workers: usize, capacity: usize) -> WorkerPool {
        WorkerPool::spawn(Arc::new(MemoryBackend::new()), workers, capacity).unwrap()
    }

    #[tokio::test]
    async fn test_submit_runs_on_worker_thread() {
        let pool = pool(2, 8);
        let name = pool
            .submit(|_| Ok(thread::current().name().map(str::to_string)))
            .await
            .unwrap();
        assert!(name.unwrap().starts_with("novadb-tpool-"));
    }

    #[tokio::test]
    async fn test_submit_reaches_backend() {
        let pool = pool(2, 8);
        let uuid = Uuid::new_v4();
        let created = pool
            .submit(move |db| db.s3_image_create(&RequestContext::admin(), uuid))
            .await
            .unwrap();
        let fetched = pool
            .submit(move |db| db.s3_image_get_by_uuid(&RequestContext::admin(), uuid))
            .await
            .unwrap();
        assert_eq!(created, fetched);
    }

    #[tokio::test]
    async fn test_errors_pass_through() {
        let pool = pool(1, 1);
        let err = pool
            .submit(|db| db.s3_image_get(&RequestContext::admin(), 99))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_pool_survives_panicking_job() {
        let pool = pool(1, 4);
        let err = pool
            .submit(|_| -> StorageResult<()> { panic!("boom") })
            .await
            .unwrap_err();
        match err {
            StorageError::Internal(msg) => assert!(msg.contains("boom")),
            other => panic!("unexpected error: {other:?}"),
        }

        let value = pool.submit(|_| Ok(7)).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_many_concurrent_jobs_with_small_queue() {
        let pool = Arc::new(pool(3, 2));
        let mut tasks = Vec::new();
        for i in 0..50u64 {
            let pool = Arc::clone(&pool);
            tasks.push(tokio::spawn(async move { pool.submit(move |_| Ok(i * 2)).await }));
        }
        let mut sum = 0;
        for task in tasks {
            sum += task.await.unwrap().unwrap();
        }
        assert_eq!(sum, (0..50u64).map(|i| i * 2).sum::<u64>());
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_fails() {
        let pool = pool(2, 4);
        pool.shutdown();
        assert!(pool.is_closed());

        let err = pool.submit(|_| Ok(())).await.unwrap_err();
        assert!(matches!(err, StorageError::WorkerPoolClosed));

        // Second shutdown is a no-op.
        pool.shutdown();
    }

    #[test]
    fn test_default_worker_count_within_bounds() {
        let count = default_worker_count();
        assert!((MIN_WORKERS..=MAX_WORKERS).contains(&count));
    }

    #[test]
    fn test_zero_sizes_are_raised() {
        let pool = pool(0, 0);
        assert_eq!(pool.workers(), 1);
    }
}
