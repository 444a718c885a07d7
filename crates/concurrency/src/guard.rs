//! Compare-and-swap singleton guard.
//!
//! Backs the orchestrator's four independent "only one job of this kind
//! at a time" booleans (`working`, `workingMerge`,
//! `workingOptionalIndices`, `warmupWorking`). A naive
//! load-then-spawn-sets-true sequence leaves a narrow window where two
//! callers can both observe `false` and both proceed; `try_acquire`
//! closes that window with a single `compare_exchange`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A singleton re-entrancy guard: at most one [`GuardHandle`] can be
/// held at a time. A second `try_acquire` while one is outstanding
/// returns `None` (silent no-op re-entry, matching the reference
/// design rather than an error).
#[derive(Clone, Default)]
pub struct SingletonGuard {
    working: Arc<AtomicBool>,
}

impl SingletonGuard {
    /// A new, unclaimed guard.
    pub fn new() -> Self {
        SingletonGuard {
            working: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attempt to acquire the guard. Returns `Some(handle)` on success;
    /// the handle releases the guard on drop. Returns `None` if already
    /// held.
    pub fn try_acquire(&self) -> Option<GuardHandle> {
        self.working
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GuardHandle {
                working: self.working.clone(),
            })
    }

    /// True if currently held by some caller. Racy by nature (the
    /// guard may be released concurrently); useful only for reporting.
    pub fn is_working(&self) -> bool {
        self.working.load(Ordering::Acquire)
    }
}

/// RAII handle for a held [`SingletonGuard`]. Releases on drop,
/// including on panic-unwind, so a panicking build/merge job never
/// wedges the guard permanently.
pub struct GuardHandle {
    working: Arc<AtomicBool>,
}

impl Drop for GuardHandle {
    fn drop(&mut self) {
        self.working.store(false, Ordering::Release);
    }
}
