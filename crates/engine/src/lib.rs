//! Orchestration layer for the aggregation engine.
//!
//! This crate drives the domain handles defined in `aggstate-storage`:
//!
//! - [`registry`]: binds each of the seven domains to its concrete
//!   handle and exposes an object-safe fan-out view for admin/reporting
//!   code that doesn't care about history vs. inverted-index kind.
//! - [`step_view`]: per-step, cross-domain read views
//!   ([`AggregatorStep`]/[`make_steps`]).
//! - [`query_context`]: a pinned, refcounted snapshot of every domain's
//!   shard set, isolating a long-lived read from concurrent merges and
//!   prunes.
//! - [`scheduler`]: the priority-ordered worker pool background
//!   build/merge/prune work runs on.
//! - [`aggregator`]: [`Aggregator`], the top-level orchestrator tying
//!   all of the above together with the writer's txnum cursor and the
//!   four build/merge/prune/warmup re-entrancy guards.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregator;
pub mod query_context;
pub mod registry;
pub mod scheduler;
pub mod step_view;

pub use aggregator::{Aggregator, WARMUP_MIN_LIMIT};
pub use query_context::QueryContext;
pub use registry::{DomainFileStats, DomainRegistry};
pub use scheduler::{AggregatorScheduler, BackpressureError, SchedulerStats, TaskPriority};
pub use step_view::{make_steps, AggregatorStep};
