//! Wait-group tracking spawned background work, for `Close()`.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

struct Inner {
    active: Mutex<usize>,
    drained: Condvar,
}

/// Tracks outstanding background jobs (build, merge, optional-index,
/// warmup subtasks) so that `Close()` can wait for all of them to
/// finish before tearing down shared state.
///
/// Mirrors the lock-before-notify discipline used elsewhere in this
/// codebase's background scheduler: the counter is always mutated and
/// checked under the same mutex the condvar is parked on, so a
/// `done()` call can never race a `wait()` call into a lost wakeup.
#[derive(Clone)]
pub struct WaitGroup {
    inner: Arc<Inner>,
}

impl WaitGroup {
    /// A wait-group with zero outstanding jobs.
    pub fn new() -> Self {
        WaitGroup {
            inner: Arc::new(Inner {
                active: Mutex::new(0),
                drained: Condvar::new(),
            }),
        }
    }

    /// Register one outstanding job. Pair with [`JobHandle`]'s drop
    /// (returned by [`WaitGroup::spawn_guard`]) or call
    /// [`WaitGroup::done`] manually.
    pub fn add(&self) {
        *self.inner.active.lock() += 1;
    }

    /// Mark one outstanding job as finished, waking any `wait()`ers if
    /// the count reaches zero.
    pub fn done(&self) {
        let mut active = self.inner.active.lock();
        debug_assert!(*active > 0, "done() called more times than add()");
        *active = active.saturating_sub(1);
        if *active == 0 {
            self.inner.drained.notify_all();
        }
    }

    /// An RAII guard that calls `add()` now and `done()` on drop
    /// (including on panic-unwind), so a panicking job still releases
    /// `Close()` waiters.
    pub fn spawn_guard(&self) -> JobHandle {
        self.add();
        JobHandle { wg: self.clone() }
    }

    /// Block until the outstanding count reaches zero.
    pub fn wait(&self) {
        let mut active = self.inner.active.lock();
        while *active > 0 {
            self.inner.drained.wait(&mut active);
        }
    }

    /// Block until the outstanding count reaches zero or `timeout`
    /// elapses. Returns `true` iff drained before the timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut active = self.inner.active.lock();
        if *active == 0 {
            return true;
        }
        let result = self.inner.drained.wait_for(&mut active, timeout);
        !result.timed_out() && *active == 0
    }

    /// Current outstanding count.
    pub fn count(&self) -> usize {
        *self.inner.active.lock()
    }
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII handle returned by [`WaitGroup::spawn_guard`].
pub struct JobHandle {
    wg: WaitGroup,
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        self.wg.done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn wait_returns_immediately_when_empty() {
        let wg = WaitGroup::new();
        wg.wait();
    }

    #[test]
    fn spawn_guard_drop_releases_waiter() {
        let wg = WaitGroup::new();
        let guard = wg.spawn_guard();
        assert_eq!(wg.count(), 1);
        let wg2 = wg.clone();
        let handle = thread::spawn(move || wg2.wait());
        drop(guard);
        handle.join().unwrap();
        assert_eq!(wg.count(), 0);
    }

    #[test]
    fn wait_timeout_reports_not_drained() {
        let wg = WaitGroup::new();
        let _guard = wg.spawn_guard();
        assert!(!wg.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn panicking_job_still_releases_guard() {
        let wg = WaitGroup::new();
        let wg2 = wg.clone();
        let handle = thread::spawn(move || {
            let _guard = wg2.spawn_guard();
            panic!("boom");
        });
        let _ = handle.join();
        assert_eq!(wg.count(), 0);
    }
}
