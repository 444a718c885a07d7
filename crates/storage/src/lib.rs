//! Storage layer for the aggregation engine
//!
//! This crate owns the on-disk-artifact model: immutable, step-bounded
//! shards and the transient collations that become them, organized per
//! domain into an ordered, refcounted shard set. It has no knowledge of
//! the writer pipeline or background build/merge/prune scheduling —
//! that orchestration lives in `aggstate-engine`, which drives this
//! crate's domain handles.
//!
//! - [`bitset`]: the `u64`-word bitset backing both inverted-index
//!   collations and the locality index's per-key membership bitmaps.
//! - [`domain`]: the seven domains and their filename/table-name
//!   bindings.
//! - [`filename`]: shard and locality filename construction/parsing.
//! - [`shard`]/[`collation`]: the immutable artifact and the transient
//!   accumulation that produces it.
//! - [`domain_ops`]/[`history_domain`]/[`invidx_domain`]: the domain
//!   handle contract and its two concrete implementations.
//! - [`merge`]: merge-range selection over a domain's shard set.
//! - [`locality`]: the key -> frozen-shard-bitmap index.
//! - [`prune`]: `keepInDB` retention-window eligibility.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bitset;
pub mod collation;
pub mod domain;
pub mod domain_ops;
pub mod filename;
pub mod history_domain;
pub mod invidx_domain;
pub mod locality;
pub mod merge;
pub mod prune;
pub mod shard;

pub use bitset::Bitset;
pub use collation::Collation;
pub use domain::DomainKind;
pub use domain_ops::{DomainOps, RangeRead, TimeTravelRead};
pub use filename::{
    locality_filename, locality_files_to_remove, parse_locality_name, parse_name, path_in,
    shard_filename, ParsedName, EXT_HISTORY_DATA, EXT_HISTORY_IDX, EXT_INVERTED_INDEX_DATA,
    EXT_INVERTED_INDEX_IDX, EXT_LOCALITY_BITMAPS, EXT_LOCALITY_PHF,
};
pub use history_domain::{
    get_no_state_over, get_no_state_with_recent_over, history_idx_range_over,
    history_iterate_changed_over, historical_state_range_over, HistoryDomain,
};
pub use invidx_domain::{index_range_over, InvertedIndexDomain};
pub use locality::{LocalityIndex, MAX_TRACKED_SHARDS};
pub use merge::{find_merge_range, merge_shard_data, MergeRange};
pub use prune::prune_cutoff;
pub use shard::{Shard, ShardData, ShardSet};
