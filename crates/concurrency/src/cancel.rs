//! Cooperative cancellation token with child derivations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct Inner {
    cancelled: AtomicBool,
    parent: Option<Arc<Inner>>,
}

impl Inner {
    fn is_cancelled(&self) -> bool {
        // Relaxed is enough: cancellation only ever flips one way, and
        // callers poll this on every loop iteration rather than relying
        // on it to synchronize other memory.
        self.cancelled.load(Ordering::Relaxed)
            || self
                .parent
                .as_ref()
                .map(|p| p.is_cancelled())
                .unwrap_or(false)
    }
}

/// A single root cancellation token with child derivations.
///
/// All long-running public methods on the orchestrator accept a
/// reference to a token. Cancelling a parent cancels every child
/// transitively; cancelling a child never affects its parent or
/// siblings. This lets `Close()` cancel the aggregator-wide root while
/// a caller-supplied child token scopes a single request (e.g. one
/// `PruneWithTimeout` call).
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// A new, uncancelled root token.
    pub fn new() -> Self {
        CancellationToken {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                parent: None,
            }),
        }
    }

    /// Derive a child token. The child observes cancellation of every
    /// ancestor in addition to its own.
    pub fn child(&self) -> Self {
        CancellationToken {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                parent: Some(self.inner.clone()),
            }),
        }
    }

    /// Cancel this token. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Relaxed);
    }

    /// True if this token or any ancestor has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
