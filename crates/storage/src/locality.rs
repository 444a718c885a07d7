//! Locality index: `key -> bitmap of frozen-shard indices the key
//! occurs in`, used to narrow a point/range read to the handful of
//! frozen shards that can possibly hold the key before falling back to
//! a full shard scan.
//!
//! The reference design builds this as a minimal perfect hash function
//! plus one fixed-size bitmap per key, persisted as a `.li`/`.l` file
//! pair. Building and querying a PHF is an out-of-scope external
//! collaborator here; this substitutes a deterministic
//! [`rustc_hash::FxHashMap`]-backed index behind the same
//! `lookup`/`rebuild` contract; see the grounding ledger for the
//! tradeoff.

use crate::domain::DomainKind;
use crate::shard::Shard;
use aggstate_core::config::LOCALITY_INDEX_UINT64_LIMIT;
use aggstate_core::error::{AggError, AggResult};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::bitset::Bitset;

/// Maximum number of frozen shards a single locality index can track
/// (`LocalityIndexUint64Limit * 64` bits per key).
pub const MAX_TRACKED_SHARDS: usize = LOCALITY_INDEX_UINT64_LIMIT * 64;

/// A rebuildable, queryable locality index for one domain.
pub struct LocalityIndex {
    kind: DomainKind,
    entries: RwLock<FxHashMap<Vec<u8>, Bitset>>,
    shard_count: AtomicUsize,
}

impl LocalityIndex {
    /// A new, empty locality index.
    pub fn new(kind: DomainKind) -> Self {
        LocalityIndex {
            kind,
            entries: RwLock::new(FxHashMap::default()),
            shard_count: AtomicUsize::new(0),
        }
    }

    /// Which domain this index covers.
    pub fn kind(&self) -> DomainKind {
        self.kind
    }

    /// Rebuild the index from scratch over `frozen_shards` (ascending
    /// by `start_tx_num`, as returned by
    /// [`crate::shard::ShardSet::frozen_shards`]). Bit `i` of a key's
    /// bitmap is set iff `frozen_shards[i]` contains that key.
    ///
    /// Errors (rather than panics, unlike the PHF-lookup failure path
    /// it replaces) if tracking `frozen_shards.len()` shards would
    /// exceed [`MAX_TRACKED_SHARDS`].
    pub fn rebuild(&self, frozen_shards: &[Arc<Shard>]) -> AggResult<()> {
        if frozen_shards.len() > MAX_TRACKED_SHARDS {
            return Err(AggError::fatal(format!(
                "locality index for {} needs {} frozen-shard bits, exceeding the {} bit limit",
                self.kind,
                frozen_shards.len(),
                MAX_TRACKED_SHARDS
            )));
        }

        let mut entries: FxHashMap<Vec<u8>, Bitset> = FxHashMap::default();
        for (idx, shard) in frozen_shards.iter().enumerate() {
            for key in shard.data.keys() {
                entries.entry(key.clone()).or_default().set(idx as u64);
            }
        }

        tracing::debug!(
            target: "aggstate::locality",
            domain = %self.kind,
            frozen_shards = frozen_shards.len(),
            keys = entries.len(),
            "rebuilt locality index"
        );
        *self.entries.write() = entries;
        self.shard_count.store(frozen_shards.len(), Ordering::Release);
        Ok(())
    }

    /// Number of frozen shards folded into the index as of the last
    /// [`LocalityIndex::rebuild`].
    pub fn shard_count(&self) -> usize {
        self.shard_count.load(Ordering::Acquire)
    }

    /// The first two frozen-shard indices at or after `from_shard_idx`
    /// containing `key`. Mirrors the reference design's two-result PHF
    /// lookup: most queries only need the single most-recent match,
    /// but callers validating index integrity want the second one too.
    pub fn lookup(&self, key: &[u8], from_shard_idx: u64) -> (Option<u64>, Option<u64>) {
        self.entries
            .read()
            .get(key)
            .map(|bits| bits.first_two_set_at_or_after(from_shard_idx))
            .unwrap_or((None, None))
    }

    /// True iff the index currently tracks no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Every frozen-shard index containing `key`, ascending. Built by
    /// repeatedly advancing [`LocalityIndex::lookup`]'s floor past each
    /// match; used by a read path that needs every candidate shard
    /// rather than just the most recent one (e.g. an index-range scan).
    pub fn lookup_all(&self, key: &[u8]) -> Vec<u64> {
        let mut out = Vec::new();
        let mut floor = 0u64;
        loop {
            let (first, _) = self.lookup(key, floor);
            match first {
                Some(i) => {
                    out.push(i);
                    floor = i + 1;
                }
                None => break,
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::ShardData;
    use aggstate_core::txnum::TxNum;
    use rustc_hash::FxHashMap as Map;

    fn shard_with_keys(keys: &[&[u8]], start: u64, end: u64) -> Arc<Shard> {
        let mut m: Map<Vec<u8>, std::collections::BTreeMap<u64, Vec<u8>>> = Map::default();
        for k in keys {
            m.insert(k.to_vec(), std::collections::BTreeMap::new());
        }
        Arc::new(Shard::new(TxNum(start), TxNum(end), ShardData::History(m), end - start))
    }

    #[test]
    fn rebuild_sets_bit_per_containing_shard() {
        let idx = LocalityIndex::new(DomainKind::Accounts);
        let shards = vec![
            shard_with_keys(&[b"a"], 0, 4),
            shard_with_keys(&[b"b"], 4, 8),
            shard_with_keys(&[b"a", b"b"], 8, 12),
        ];
        idx.rebuild(&shards).unwrap();
        assert_eq!(idx.shard_count(), 3);

        assert_eq!(idx.lookup(b"a", 0), (Some(0), Some(2)));
        assert_eq!(idx.lookup(b"b", 0), (Some(1), Some(2)));
        assert_eq!(idx.lookup(b"missing", 0), (None, None));
    }

    #[test]
    fn lookup_respects_floor() {
        let idx = LocalityIndex::new(DomainKind::Accounts);
        let shards = vec![
            shard_with_keys(&[b"a"], 0, 4),
            shard_with_keys(&[b"a"], 4, 8),
        ];
        idx.rebuild(&shards).unwrap();
        assert_eq!(idx.lookup(b"a", 1), (Some(1), None));
    }

    #[test]
    fn rebuild_replaces_prior_contents() {
        let idx = LocalityIndex::new(DomainKind::Accounts);
        idx.rebuild(&[shard_with_keys(&[b"a"], 0, 4)]).unwrap();
        assert!(!idx.is_empty());
        idx.rebuild(&[]).unwrap();
        assert!(idx.is_empty());
        assert_eq!(idx.shard_count(), 0);
    }

    #[test]
    fn lookup_all_returns_every_containing_shard() {
        let idx = LocalityIndex::new(DomainKind::Accounts);
        let shards = vec![
            shard_with_keys(&[b"a"], 0, 4),
            shard_with_keys(&[b"b"], 4, 8),
            shard_with_keys(&[b"a"], 8, 12),
        ];
        idx.rebuild(&shards).unwrap();
        assert_eq!(idx.lookup_all(b"a"), vec![0, 2]);
        assert_eq!(idx.lookup_all(b"b"), vec![1]);
        assert!(idx.lookup_all(b"missing").is_empty());
    }

    #[test]
    fn rebuild_rejects_too_many_frozen_shards() {
        let idx = LocalityIndex::new(DomainKind::Accounts);
        let shards: Vec<Arc<Shard>> = (0..(MAX_TRACKED_SHARDS + 1) as u64)
            .map(|i| shard_with_keys(&[b"a"], i * 4, i * 4 + 4))
            .collect();
        let err = idx.rebuild(&shards).unwrap_err();
        assert!(err.is_fatal());
    }
}
