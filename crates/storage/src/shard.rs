//! Shards (`filesItem`): immutable on-disk-artifact stand-ins, and the
//! ordered, refcounted set of shards a domain owns.

use crate::bitset::Bitset;
use aggstate_core::error::AggError;
use aggstate_core::txnum::TxNum;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The in-memory payload a shard carries.
///
/// The real per-domain `History`/`InvertedIndex` wire formats
/// (compression, on-disk layout, cursor iteration) are an out-of-scope
/// external collaborator; this is a faithful in-memory stand-in that
/// preserves every read/merge semantic the orchestrator and query
/// context depend on.
#[derive(Debug, Clone)]
pub enum ShardData {
    /// History domain: `key -> (txnum -> previous value)`. The value
    /// recorded at `txnum` is the value that was overwritten *by* the
    /// write at `txnum` (a previous-value log), so `GetNoState(k, t)`
    /// reads the entry with the largest recorded txnum `<= t`.
    History(FxHashMap<Vec<u8>, BTreeMap<u64, Vec<u8>>>),
    /// Inverted-index domain: `key -> set of txnums` (stored as an
    /// offset from the shard's `start_tx_num`, since a shard's span is
    /// bounded by `B*S`).
    InvertedIndex(FxHashMap<Vec<u8>, Bitset>),
}

impl ShardData {
    /// Number of distinct keys carried by this shard.
    pub fn key_count(&self) -> usize {
        match self {
            ShardData::History(m) => m.len(),
            ShardData::InvertedIndex(m) => m.len(),
        }
    }

    /// Iterate the distinct keys.
    pub fn keys(&self) -> Box<dyn Iterator<Item = &Vec<u8>> + '_> {
        match self {
            ShardData::History(m) => Box::new(m.keys()),
            ShardData::InvertedIndex(m) => Box::new(m.keys()),
        }
    }

    /// True iff `key` has at least one recorded entry/occurrence in
    /// this shard, regardless of txnum.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        match self {
            ShardData::History(m) => m.contains_key(key),
            ShardData::InvertedIndex(m) => m.contains_key(key),
        }
    }

    /// For a history shard: every `(txnum, prev_value)` entry recorded
    /// for `key` with txnum `<= tx_num`, ascending. Empty for an
    /// inverted-index shard or an unknown key.
    pub fn history_entries_at_or_before(&self, key: &[u8], tx_num: u64) -> Vec<(u64, Vec<u8>)> {
        match self {
            ShardData::History(m) => m
                .get(key)
                .map(|entries| {
                    entries
                        .range(..=tx_num)
                        .map(|(t, v)| (*t, v.clone()))
                        .collect()
                })
                .unwrap_or_default(),
            ShardData::InvertedIndex(_) => Vec::new(),
        }
    }
}

/// An immutable on-disk artifact for one domain over `[start_tx_num,
/// end_tx_num)`. `frozen` iff the span equals `B*S`, at which point the
/// shard becomes eligible for locality indexing.
pub struct Shard {
    /// Inclusive start of the covered txnum interval.
    pub start_tx_num: TxNum,
    /// Exclusive end of the covered txnum interval.
    pub end_tx_num: TxNum,
    /// True iff this shard is the maximum size (`B*S`).
    pub frozen: bool,
    can_delete: AtomicBool,
    /// The shard's payload.
    pub data: ShardData,
}

impl Shard {
    /// Construct a shard, computing `frozen` from `max_span` (`B*S`).
    pub fn new(start_tx_num: TxNum, end_tx_num: TxNum, data: ShardData, max_span: u64) -> Self {
        let frozen = end_tx_num.0.saturating_sub(start_tx_num.0) == max_span;
        Shard {
            start_tx_num,
            end_tx_num,
            frozen,
            can_delete: AtomicBool::new(false),
            data,
        }
    }

    /// The span of this shard, in txnums.
    pub fn span(&self) -> u64 {
        self.end_tx_num.0 - self.start_tx_num.0
    }

    /// True iff `tx` falls within `[start_tx_num, end_tx_num)`.
    pub fn contains(&self, tx: TxNum) -> bool {
        self.start_tx_num <= tx && tx < self.end_tx_num
    }

    /// Mark this shard as superseded. One-way: never cleared.
    pub fn mark_can_delete(&self) {
        self.can_delete.store(true, Ordering::Release);
    }

    /// True iff this shard has been superseded and is only kept alive
    /// by outstanding query-context references.
    pub fn can_delete(&self) -> bool {
        self.can_delete.load(Ordering::Acquire)
    }
}

/// The ordered, per-domain set of integrated shards.
///
/// Readers acquire a [`ShardSet::snapshot`] (a `Vec<Arc<Shard>>`) at
/// query-context creation time; holding those `Arc`s is what keeps a
/// `can_delete`-marked shard alive until the last reader drops it —
/// there is no separate epoch/generation counter (see the grounding
/// ledger for why `Arc` refcounting was chosen over that alternative).
#[derive(Default)]
pub struct ShardSet {
    shards: RwLock<Vec<Arc<Shard>>>,
}

impl ShardSet {
    /// An empty shard set.
    pub fn new() -> Self {
        ShardSet {
            shards: RwLock::new(Vec::new()),
        }
    }

    /// A refcounted snapshot of the currently-integrated shards,
    /// ascending by `start_tx_num`.
    pub fn snapshot(&self) -> Vec<Arc<Shard>> {
        self.shards.read().clone()
    }

    /// `min_d endTxNumMinimax_d` for this single domain: the end of the
    /// last integrated shard, or txnum 0 if the domain is empty.
    pub fn end_tx_num_minimax(&self) -> TxNum {
        self.shards
            .read()
            .last()
            .map(|s| s.end_tx_num)
            .unwrap_or(TxNum::ZERO)
    }

    /// Shards with `frozen == true`, ascending by `start_tx_num`.
    pub fn frozen_shards(&self) -> Vec<Arc<Shard>> {
        self.shards
            .read()
            .iter()
            .filter(|s| s.frozen)
            .cloned()
            .collect()
    }

    /// Integrate a newly-built shard at the tail of the set. The new
    /// shard's `start_tx_num` must equal the current
    /// `end_tx_num_minimax` (no gap, no overlap).
    pub fn integrate_built(&self, shard: Arc<Shard>) -> Result<(), AggError> {
        let mut shards = self.shards.write();
        let expected_start = shards.last().map(|s| s.end_tx_num).unwrap_or(TxNum::ZERO);
        if shard.start_tx_num != expected_start {
            return Err(AggError::inconsistent(format!(
                "shard start {} does not continue from {}",
                shard.start_tx_num, expected_start
            )));
        }
        shards.push(shard);
        Ok(())
    }

    /// Swap a contiguous run of shards for their merge result.
    /// Replaced shards are marked `can_delete` but not removed from
    /// memory here — they stay alive until every `Arc` clone held by
    /// outstanding query contexts drops.
    pub fn integrate_merged(&self, old: &[Arc<Shard>], merged: Arc<Shard>) -> Result<(), AggError> {
        if old.is_empty() {
            return Err(AggError::inconsistent("merge with no input shards"));
        }
        let union_start = old.iter().map(|s| s.start_tx_num).min().unwrap();
        let union_end = old.iter().map(|s| s.end_tx_num).max().unwrap();
        if merged.start_tx_num != union_start || merged.end_tx_num != union_end {
            return Err(AggError::inconsistent(
                "merged shard interval does not equal the union of replaced intervals",
            ));
        }

        let mut shards = self.shards.write();
        let mut retained: Vec<Arc<Shard>> = Vec::with_capacity(shards.len());
        for s in shards.iter() {
            if old.iter().any(|o| Arc::ptr_eq(o, s)) {
                s.mark_can_delete();
            } else {
                retained.push(s.clone());
            }
        }
        let insert_at = retained
            .iter()
            .position(|s| s.start_tx_num >= merged.start_tx_num)
            .unwrap_or(retained.len());
        retained.insert(insert_at, merged);
        *shards = retained;
        Ok(())
    }

    /// Check invariant 1: the integrated shards partition `[0,
    /// endTxNumMinimax)` with no gaps and no overlaps.
    pub fn validate_partition(&self) -> Result<(), AggError> {
        let shards = self.shards.read();
        let mut expected = TxNum::ZERO;
        for s in shards.iter() {
            if s.start_tx_num != expected {
                return Err(AggError::inconsistent(format!(
                    "gap or overlap: expected shard starting at {}, found {}",
                    expected, s.start_tx_num
                )));
            }
            expected = s.end_tx_num;
        }
        Ok(())
    }

    /// Physically drop shards whose `can_delete` flag is set. Callers
    /// must only invoke this once they know no query context still
    /// holds a reference (i.e. `Arc::strong_count(shard) == 1`,
    /// meaning only this set's own clone remains).
    pub fn sweep_deletable(&self) -> usize {
        let mut shards = self.shards.write();
        let before = shards.len();
        shards.retain(|s| !(s.can_delete() && Arc::strong_count(s) == 1));
        before - shards.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_history() -> ShardData {
        ShardData::History(FxHashMap::default())
    }

    #[test]
    fn frozen_iff_max_span() {
        let s = Shard::new(TxNum(0), TxNum(8), empty_history(), 8);
        assert!(s.frozen);
        let s2 = Shard::new(TxNum(0), TxNum(4), empty_history(), 8);
        assert!(!s2.frozen);
    }

    #[test]
    fn integrate_built_requires_contiguity() {
        let set = ShardSet::new();
        set.integrate_built(Arc::new(Shard::new(TxNum(0), TxNum(4), empty_history(), 8)))
            .unwrap();
        assert_eq!(set.end_tx_num_minimax(), TxNum(4));

        // gap: starts at 8, not 4
        let err = set
            .integrate_built(Arc::new(Shard::new(TxNum(8), TxNum(12), empty_history(), 8)))
            .unwrap_err();
        assert!(matches!(err, AggError::Inconsistent(_)));
    }

    #[test]
    fn integrate_built_then_validate_partition() {
        let set = ShardSet::new();
        set.integrate_built(Arc::new(Shard::new(TxNum(0), TxNum(4), empty_history(), 8)))
            .unwrap();
        set.integrate_built(Arc::new(Shard::new(TxNum(4), TxNum(8), empty_history(), 8)))
            .unwrap();
        set.validate_partition().unwrap();
        assert_eq!(set.end_tx_num_minimax(), TxNum(8));
    }

    #[test]
    fn integrate_merged_marks_old_deletable_and_replaces() {
        let set = ShardSet::new();
        let a = Arc::new(Shard::new(TxNum(0), TxNum(4), empty_history(), 8));
        let b = Arc::new(Shard::new(TxNum(4), TxNum(8), empty_history(), 8));
        set.integrate_built(a.clone()).unwrap();
        set.integrate_built(b.clone()).unwrap();

        let merged = Arc::new(Shard::new(TxNum(0), TxNum(8), empty_history(), 8));
        set.integrate_merged(&[a.clone(), b.clone()], merged.clone())
            .unwrap();

        assert!(a.can_delete());
        assert!(b.can_delete());
        assert!(!merged.can_delete());
        set.validate_partition().unwrap();
        assert_eq!(set.frozen_shards().len(), 1);
    }

    #[test]
    fn integrate_merged_rejects_mismatched_interval() {
        let set = ShardSet::new();
        let a = Arc::new(Shard::new(TxNum(0), TxNum(4), empty_history(), 8));
        set.integrate_built(a.clone()).unwrap();
        let bogus = Arc::new(Shard::new(TxNum(0), TxNum(999), empty_history(), 8));
        assert!(set.integrate_merged(&[a], bogus).is_err());
    }

    #[test]
    fn sweep_deletable_keeps_referenced_shards() {
        let set = ShardSet::new();
        let a = Arc::new(Shard::new(TxNum(0), TxNum(4), empty_history(), 8));
        set.integrate_built(a.clone()).unwrap();
        a.mark_can_delete();
        // `a` and the set both hold a clone right now (strong_count == 2).
        assert_eq!(set.sweep_deletable(), 0);
        drop(a);
        assert_eq!(set.sweep_deletable(), 1);
    }
}
