//! Collations: the transient, per-step accumulation that a build step
//! turns into a frozen [`crate::shard::Shard`].

use crate::bitset::Bitset;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

/// The writer-side accumulation for one domain over one step's worth of
/// txnums, before it is written out as a shard.
///
/// A `Collation` is built incrementally as the writer processes
/// transactions in txnum order, then consumed exactly once by the build
/// step that turns it into a [`crate::shard::ShardData`].
#[derive(Debug, Clone)]
pub enum Collation {
    /// History: accumulate the previous value seen at each txnum, per
    /// key, so the eventual shard can answer "what was the value just
    /// before txnum T".
    History(FxHashMap<Vec<u8>, BTreeMap<u64, Vec<u8>>>),
    /// Inverted index: accumulate the set of txnums (relative to the
    /// collation's own step start) at which each key occurred.
    InvertedIndex(FxHashMap<Vec<u8>, Bitset>),
}

impl Collation {
    /// A new, empty history collation.
    pub fn new_history() -> Self {
        Collation::History(FxHashMap::default())
    }

    /// A new, empty inverted-index collation.
    pub fn new_inverted_index() -> Self {
        Collation::InvertedIndex(FxHashMap::default())
    }

    /// Record that `key` had `prev_value` overwritten at `tx_num`
    /// (absolute txnum; callers normalize to a shard-relative offset at
    /// build time). Panics if called on an inverted-index collation —
    /// callers choose the right constructor for their domain kind and
    /// never mix the two.
    pub fn record_history(&mut self, key: Vec<u8>, tx_num: u64, prev_value: Vec<u8>) {
        match self {
            Collation::History(m) => {
                m.entry(key).or_default().insert(tx_num, prev_value);
            }
            Collation::InvertedIndex(_) => {
                panic!("record_history called on an inverted-index collation")
            }
        }
    }

    /// Record that `key` occurred at `tx_num_offset` (offset from the
    /// collation's step start).
    pub fn record_occurrence(&mut self, key: Vec<u8>, tx_num_offset: u64) {
        match self {
            Collation::InvertedIndex(m) => {
                m.entry(key).or_default().set(tx_num_offset);
            }
            Collation::History(_) => panic!("record_occurrence called on a history collation"),
        }
    }

    /// Number of distinct keys touched so far.
    pub fn key_count(&self) -> usize {
        match self {
            Collation::History(m) => m.len(),
            Collation::InvertedIndex(m) => m.len(),
        }
    }

    /// True iff nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.key_count() == 0
    }

    /// Merge `other` into `self` in place (used when a single step's
    /// writes arrive in more than one batch before the build step
    /// runs). Panics on a history/inverted-index kind mismatch.
    pub fn merge(&mut self, other: Collation) {
        match (self, other) {
            (Collation::History(a), Collation::History(b)) => {
                for (k, entries) in b {
                    a.entry(k).or_default().extend(entries);
                }
            }
            (Collation::InvertedIndex(a), Collation::InvertedIndex(b)) => {
                for (k, bits) in b {
                    a.entry(k).or_default().union_with(&bits);
                }
            }
            _ => panic!("cannot merge a history collation with an inverted-index collation"),
        }
    }
}
