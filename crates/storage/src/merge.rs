//! Merge-range selection: picks the next contiguous run of same-sized,
//! alignment-correct shards to fold into one larger shard.

use crate::bitset::Bitset;
use crate::shard::{Shard, ShardData};
use aggstate_core::txnum::TxNum;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A contiguous run of shards selected for merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRange {
    /// Index of the first shard in the run (within the slice passed to
    /// [`find_merge_range`]).
    pub start_index: usize,
    /// Index one past the last shard in the run.
    pub end_index: usize,
    /// Start of the merged interval.
    pub start_tx_num: TxNum,
    /// End of the merged interval.
    pub end_tx_num: TxNum,
}

impl MergeRange {
    /// Number of shards folded into this merge.
    pub fn len(&self) -> usize {
        self.end_index - self.start_index
    }

    /// True iff this range covers no shards (never constructed by
    /// [`find_merge_range`], provided for API symmetry).
    pub fn is_empty(&self) -> bool {
        self.start_index == self.end_index
    }
}

/// Find the next run of shards to merge, scanning `shards` (ascending
/// by `start_tx_num`, as returned by `ShardSet::snapshot`).
///
/// Mirrors a geometric (power-of-two) merge policy: the largest
/// power-of-two-length, contiguous, equal-span, alignment-correct run
/// whose combined span does not exceed `max_span` (`B*S`) wins. Prefers
/// bigger merges over smaller ones, and the earliest-starting candidate
/// when two runs of the same length qualify, so merge work converges
/// deterministically regardless of scan order.
pub fn find_merge_range(shards: &[Arc<Shard>], max_span: u64) -> Option<MergeRange> {
    let n = shards.len();
    if n < 2 {
        return None;
    }

    let mut largest_pow2 = 1usize;
    while largest_pow2 * 2 <= n {
        largest_pow2 *= 2;
    }

    let mut try_len = largest_pow2;
    while try_len >= 2 {
        for start in 0..=(n - try_len) {
            let window = &shards[start..start + try_len];
            let span0 = window[0].span();
            let combined = span0.saturating_mul(try_len as u64);
            if combined > max_span || span0 == 0 {
                continue;
            }
            if window[0].start_tx_num.0 % combined != 0 {
                continue;
            }
            if !window.iter().all(|s| s.span() == span0) {
                continue;
            }
            if !contiguous(window) {
                continue;
            }
            let range = MergeRange {
                start_index: start,
                end_index: start + try_len,
                start_tx_num: window[0].start_tx_num,
                end_tx_num: window[try_len - 1].end_tx_num,
            };
            tracing::debug!(
                target: "aggstate::merge",
                shards = range.len(),
                start_tx_num = range.start_tx_num.0,
                end_tx_num = range.end_tx_num.0,
                "selected merge range"
            );
            return Some(range);
        }
        try_len /= 2;
    }
    None
}

fn contiguous(window: &[Arc<Shard>]) -> bool {
    window.windows(2).all(|w| w[0].end_tx_num == w[1].start_tx_num)
}

/// Merge the payloads of `shards` (a contiguous, same-kind run, as
/// selected by [`find_merge_range`]) into the single [`ShardData`] the
/// merged shard will carry. `new_start` is the merged shard's
/// `start_tx_num`, used to rebase inverted-index occurrence offsets
/// (each input shard's offsets are relative to its own start, not the
/// merged shard's).
///
/// Panics if `shards` is empty or mixes history and inverted-index
/// data — both are caller bugs: a merge range never spans domains.
pub fn merge_shard_data(shards: &[Arc<Shard>], new_start: TxNum) -> ShardData {
    match &shards[0].data {
        ShardData::History(_) => {
            let mut merged: FxHashMap<Vec<u8>, BTreeMap<u64, Vec<u8>>> = FxHashMap::default();
            for shard in shards {
                let ShardData::History(m) = &shard.data else {
                    panic!("merge_shard_data: mixed history/inverted-index shards");
                };
                for (key, entries) in m {
                    merged.entry(key.clone()).or_default().extend(
                        entries.iter().map(|(tx, v)| (*tx, v.clone())),
                    );
                }
            }
            ShardData::History(merged)
        }
        ShardData::InvertedIndex(_) => {
            let mut merged: FxHashMap<Vec<u8>, Bitset> = FxHashMap::default();
            for shard in shards {
                let ShardData::InvertedIndex(m) = &shard.data else {
                    panic!("merge_shard_data: mixed history/inverted-index shards");
                };
                let rebase = shard.start_tx_num.0 - new_start.0;
                for (key, bits) in m {
                    let entry = merged.entry(key.clone()).or_default();
                    for offset in bits.iter_ones() {
                        entry.set(offset + rebase);
                    }
                }
            }
            ShardData::InvertedIndex(merged)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::ShardData;
    use rustc_hash::FxHashMap;

    fn shard(start: u64, end: u64, max_span: u64) -> Arc<Shard> {
        Arc::new(Shard::new(
            TxNum(start),
            TxNum(end),
            ShardData::History(FxHashMap::default()),
            max_span,
        ))
    }

    #[test]
    fn no_merge_with_fewer_than_two_shards() {
        let shards = vec![shard(0, 4, 8)];
        assert!(find_merge_range(&shards, 8).is_none());
    }

    #[test]
    fn merges_two_aligned_equal_span_shards() {
        // S=4, B=2 worked example: two span-4 shards at [0,4) and [4,8)
        // merge into a single frozen span-8 shard.
        let shards = vec![shard(0, 4, 8), shard(4, 8, 8)];
        let range = find_merge_range(&shards, 8).unwrap();
        assert_eq!(range.start_index, 0);
        assert_eq!(range.end_index, 2);
        assert_eq!(range.start_tx_num, TxNum(0));
        assert_eq!(range.end_tx_num, TxNum(8));
    }

    #[test]
    fn refuses_to_exceed_max_span() {
        let shards = vec![shard(0, 8, 8), shard(8, 16, 8)];
        // Combining would produce span 16 > max_span 8.
        assert!(find_merge_range(&shards, 8).is_none());
    }

    #[test]
    fn skips_misaligned_run() {
        // Equal spans but the window doesn't start on a combined-span
        // boundary (4 does not divide evenly by 8 starting at tx 4).
        let shards = vec![shard(4, 8, 8), shard(8, 12, 8)];
        assert!(find_merge_range(&shards, 8).is_none());
    }

    #[test]
    fn prefers_larger_power_of_two_run() {
        let shards = vec![shard(0, 4, 8), shard(4, 8, 8), shard(8, 12, 8), shard(12, 16, 8)];
        let range = find_merge_range(&shards, 16).unwrap();
        assert_eq!(range.len(), 4);
        assert_eq!(range.start_tx_num, TxNum(0));
        assert_eq!(range.end_tx_num, TxNum(16));
    }

    #[test]
    fn ignores_gap_between_shards() {
        let shards = vec![shard(0, 4, 8), shard(8, 12, 8)];
        assert!(find_merge_range(&shards, 8).is_none());
    }

    fn invidx_shard(start: u64, end: u64, max_span: u64, entries: &[(&[u8], u64)]) -> Arc<Shard> {
        let mut m: FxHashMap<Vec<u8>, Bitset> = FxHashMap::default();
        for (k, offset) in entries {
            m.entry(k.to_vec()).or_default().set(*offset);
        }
        Arc::new(Shard::new(TxNum(start), TxNum(end), ShardData::InvertedIndex(m), max_span))
    }

    #[test]
    fn merge_shard_data_combines_history_entries() {
        let mut m0: FxHashMap<Vec<u8>, BTreeMap<u64, Vec<u8>>> = FxHashMap::default();
        m0.entry(b"k".to_vec()).or_default().insert(0, b"v0".to_vec());
        let s0 = Arc::new(Shard::new(TxNum(0), TxNum(4), ShardData::History(m0), 8));

        let mut m1: FxHashMap<Vec<u8>, BTreeMap<u64, Vec<u8>>> = FxHashMap::default();
        m1.entry(b"k".to_vec()).or_default().insert(4, b"v4".to_vec());
        let s1 = Arc::new(Shard::new(TxNum(4), TxNum(8), ShardData::History(m1), 8));

        let merged = merge_shard_data(&[s0, s1], TxNum(0));
        match merged {
            ShardData::History(m) => {
                let entries = &m[&b"k".to_vec()];
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[&0], b"v0".to_vec());
                assert_eq!(entries[&4], b"v4".to_vec());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn merge_shard_data_rebases_inverted_index_offsets() {
        let s0 = invidx_shard(0, 4, 8, &[(b"addr", 1)]);
        let s1 = invidx_shard(4, 8, 8, &[(b"addr", 2)]);
        let merged = merge_shard_data(&[s0, s1], TxNum(0));
        match merged {
            ShardData::InvertedIndex(m) => {
                let bits = &m[&b"addr".to_vec()];
                // s1's offset 2 is relative to its own start (tx 4), so
                // relative to the merged shard's start it becomes 4+2=6.
                assert_eq!(bits.iter_ones().collect::<Vec<_>>(), vec![1, 6]);
            }
            _ => panic!("wrong variant"),
        }
    }
}
