//! Background-lifecycle primitives for the aggregation engine
//!
//! This crate implements the cross-cutting concurrency primitives the
//! orchestrator is built on:
//! - [`CancellationToken`]: a single root token with child derivations
//! - [`SingletonGuard`]: compare-and-swap re-entrancy guard for the
//!   `working` / `workingMerge` / `workingOptionalIndices` /
//!   `warmupWorking` booleans
//! - [`WaitGroup`]: tracks spawned background work for `Close()`
//! - [`BackgroundResult`]: `Has()/Set(err)/GetAndReset()` indicator
//! - [`WorkerPool`]: a bounded concurrency limiter for `buildFiles` /
//!   `mergeFiles` subprocesses

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod guard;
pub mod pool;
pub mod result;
pub mod waitgroup;

pub use cancel::CancellationToken;
pub use guard::{GuardHandle, SingletonGuard};
pub use pool::WorkerPool;
pub use result::BackgroundResult;
pub use waitgroup::WaitGroup;
