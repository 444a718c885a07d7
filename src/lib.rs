//! # aggstate
//!
//! A historical state aggregation engine: collate, build, merge, and
//! prune versioned state into range-indexed, immutable snapshots.
//!
//! Writes accumulate into per-step [`Collation`]s; [`Aggregator::build_step`]
//! freezes a step's collation into a [`Shard`] per domain; background
//! merges fold adjacent shards into larger ones as they age; pruning
//! drops shards that fall outside the retention window. A
//! [`QueryContext`] pins a refcounted snapshot of every domain's shard
//! set so a long-lived read stays consistent across concurrent merges.
//!
//! # Quick Start
//!
//! ```no_run
//! use aggstate::{Aggregator, AggregatorConfig, DomainKind, MemDb, TxNum};
//! use std::sync::Arc;
//!
//! let agg = Aggregator::new(AggregatorConfig::new(4), Arc::new(MemDb::new()));
//!
//! agg.set_tx(TxNum(0));
//! agg.add_account_prev(b"acct1", b"previous-balance").unwrap();
//! agg.build_step(TxNum(0), TxNum(4)).unwrap();
//!
//! let ctx = agg.query();
//! let prior = ctx
//!     .get_no_state(DomainKind::Accounts, b"acct1", TxNum(2))
//!     .unwrap();
//! assert_eq!(prior, Some(b"previous-balance".to_vec()));
//! ```
//!
//! # Domains
//!
//! Seven domains are tracked: three history domains (accounts, storage,
//! code) answering "what was the value just before txnum T", and four
//! inverted-index domains (log addresses, log topics, trace-from,
//! trace-to) answering "which txnums did this key occur in".
//!
//! Internal crates (`aggstate-core`, `aggstate-storage`,
//! `aggstate-concurrency`) are not exposed directly; this crate's
//! public surface, re-exported from `aggstate-engine`, is the stable
//! API.

#![warn(missing_docs)]

pub use aggstate_engine::*;

pub use aggstate_core::config::{AggregatorConfig, ReadAheadMode};
pub use aggstate_core::error::{AggError, AggResult};
pub use aggstate_core::kv::{Db, MemDb, ReadTx, TableId, WriteTx};
pub use aggstate_core::txnum::{Step, TxNum};

pub use aggstate_storage::{
    Bitset, Collation, DomainKind, DomainOps, HistoryDomain, InvertedIndexDomain, LocalityIndex,
    RangeRead, Shard, ShardData, ShardSet, TimeTravelRead,
};
