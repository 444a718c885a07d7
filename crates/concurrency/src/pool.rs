//! Bounded concurrency limiter for build/merge subprocesses.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

struct Inner {
    available: Mutex<usize>,
    freed: Condvar,
}

/// A counting-semaphore-style worker pool.
///
/// `buildFilesInBackground` launches up to `compress_workers` per-domain
/// builds at a time; `mergeFiles` bounds per-domain merges the same
/// way. `BuildMissedIndices` additionally accepts an externally-owned
/// [`WorkerPool`] (an `Arc` clone) so a caller can share one CPU budget
/// across subsystems instead of each one picking its own limit.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

impl WorkerPool {
    /// A pool admitting up to `capacity` concurrent permits.
    /// `capacity` is floored at 1.
    pub fn new(capacity: usize) -> Self {
        WorkerPool {
            inner: Arc::new(Inner {
                available: Mutex::new(capacity.max(1)),
                freed: Condvar::new(),
            }),
        }
    }

    /// Block until a permit is available, then hold it until the
    /// returned guard is dropped.
    pub fn acquire(&self) -> PermitGuard {
        let mut available = self.inner.available.lock();
        while *available == 0 {
            self.inner.freed.wait(&mut available);
        }
        *available -= 1;
        PermitGuard {
            inner: self.inner.clone(),
        }
    }

    /// Try to acquire a permit without blocking.
    pub fn try_acquire(&self) -> Option<PermitGuard> {
        let mut available = self.inner.available.lock();
        if *available == 0 {
            return None;
        }
        *available -= 1;
        Some(PermitGuard {
            inner: self.inner.clone(),
        })
    }
}

/// RAII permit; releases back to the pool on drop.
pub struct PermitGuard {
    inner: Arc<Inner>,
}

impl Drop for PermitGuard {
    fn drop(&mut self) {
        let mut available = self.inner.available.lock();
        *available += 1;
        self.inner.freed.notify_one();
    }
}
