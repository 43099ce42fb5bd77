//! Per-stage concurrency pools.

use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting semaphore for one pipeline stage. Waiters queue FIFO.
pub struct StageSemaphore {
    name: String,
    permits: usize,
    inner: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
}

/// Held while a stage call runs; the permit returns to the pool on drop,
/// whichever way the call exits.
pub struct StagePermit {
    _permit: Option<OwnedSemaphorePermit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageStats {
    pub available: usize,
    pub waiting: usize,
    pub in_use: usize,
}

struct WaitGuard(Arc<AtomicUsize>);

impl Drop for WaitGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StageSemaphore {
    pub fn new(name: impl Into<String>, permits: usize) -> Self {
        Self {
            name: name.into(),
            permits,
            inner: Arc::new(Semaphore::new(permits)),
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn permits(&self) -> usize {
        self.permits
    }

    pub fn available(&self) -> usize {
        self.inner.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.permits.saturating_sub(self.available())
    }

    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub async fn acquire(&self) -> StagePermit {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let _guard = WaitGuard(self.waiting.clone());
        // The pool is never closed, so acquisition only fails on shutdown.
        let permit = self.inner.clone().acquire_owned().await.ok();
        StagePermit { _permit: permit }
    }

    /// Runs `f` while holding a permit.
    pub async fn with_permit<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self.acquire().await;
        f().await
    }

    pub fn stats(&self) -> StageStats {
        StageStats {
            available: self.available(),
            waiting: self.waiting(),
            in_use: self.in_use(),
        }
    }
}
