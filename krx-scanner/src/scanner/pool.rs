//! Bounded worker pool shared across scans.
//!
//! The pool only owns admission: a semaphore caps how many ticker tasks run
//! at once. Each scan brings its own `JoinSet` and drains it before
//! returning, so nothing spawned by one scan outlives it.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Create a pool admitting `size` concurrent tasks (at least one).
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Permits not currently held by a running task.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Spawn `task` into `set`; it starts once a permit is free.
    ///
    /// The task yields `None` without running if the pool is closed before
    /// it is admitted.
    pub fn spawn<F, T>(&self, set: &mut JoinSet<Option<T>>, task: F)
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permits = self.permits.clone();
        set.spawn(async move {
            let _permit = permits.acquire_owned().await.ok()?;
            Some(task.await)
        });
    }

    /// Stop admitting tasks. Running tasks finish normally.
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }
}
