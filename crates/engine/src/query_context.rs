//! Query context: a pinned, refcounted view of every domain's shard
//! set at the moment it was opened.
//!
//! Opening a context snapshots each domain's `Vec<Arc<Shard>>`. Holding
//! those `Arc` clones is what keeps a shard alive even after a
//! concurrent merge marks it `can_delete` and swaps it out of the
//! domain's live shard set — the context's reads stay consistent with
//! the moment it was opened until it is dropped.

use aggstate_core::error::{AggError, AggResult};
use aggstate_core::txnum::TxNum;
use aggstate_storage::{
    get_no_state_over, get_no_state_with_recent_over, history_idx_range_over,
    history_iterate_changed_over, historical_state_range_over, index_range_over, Bitset,
    DomainKind, LocalityIndex, Shard,
};
use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::registry::DomainRegistry;

/// A read-only, point-in-time view over every domain, holding `Arc`
/// references that keep the shards it captured alive regardless of
/// later merges or pruning.
pub struct QueryContext {
    opened_at: TxNum,
    history_snapshots: FxHashMap<DomainKind, Vec<Arc<Shard>>>,
    inverted_snapshots: FxHashMap<DomainKind, Vec<Arc<Shard>>>,
    locality: FxHashMap<DomainKind, Arc<LocalityIndex>>,
}

impl QueryContext {
    /// Open a context pinned at `tx_num`, capturing every domain's
    /// current shard set from `registry`. `locality` is the
    /// aggregator's current per-domain locality indexes, consulted by
    /// the `*_over` read paths below to narrow a scan to the frozen
    /// shards a key is known to occur in before falling back to a full
    /// scan.
    pub fn open(
        registry: &DomainRegistry,
        tx_num: TxNum,
        locality: FxHashMap<DomainKind, Arc<LocalityIndex>>,
    ) -> Self {
        let mut history_snapshots = FxHashMap::default();
        for kind in DomainKind::HISTORY {
            if let Some(d) = registry.history(kind) {
                history_snapshots.insert(kind, d.shard_set().snapshot());
            }
        }
        let mut inverted_snapshots = FxHashMap::default();
        for kind in DomainKind::INVERTED_INDEX {
            if let Some(d) = registry.inverted(kind) {
                inverted_snapshots.insert(kind, d.shard_set().snapshot());
            }
        }
        QueryContext {
            opened_at: tx_num,
            history_snapshots,
            inverted_snapshots,
            locality,
        }
    }

    /// The aggregator's txnum at the moment this context was opened.
    pub fn opened_at(&self) -> TxNum {
        self.opened_at
    }

    fn history_shards(&self, kind: DomainKind) -> AggResult<&Vec<Arc<Shard>>> {
        self.history_snapshots
            .get(&kind)
            .ok_or_else(|| AggError::inconsistent(format!("{kind} is not a history domain")))
    }

    fn inverted_shards(&self, kind: DomainKind) -> AggResult<&Vec<Arc<Shard>>> {
        self.inverted_snapshots.get(&kind).ok_or_else(|| {
            AggError::inconsistent(format!("{kind} is not an inverted-index domain"))
        })
    }

    fn locality_for(&self, kind: DomainKind) -> Option<&LocalityIndex> {
        self.locality.get(&kind).map(Arc::as_ref)
    }

    /// Point-in-time read against a history domain's pinned shards,
    /// consulting that domain's locality index first.
    pub fn get_no_state(
        &self,
        kind: DomainKind,
        key: &[u8],
        tx_num: TxNum,
    ) -> AggResult<Option<Vec<u8>>> {
        let shards = self.history_shards(kind)?;
        get_no_state_over(shards, kind, key, tx_num, self.locality_for(kind))
    }

    /// `GetNoStateWithRecent`: like [`QueryContext::get_no_state`], but
    /// also reports the txnum of the entry that answered the read.
    pub fn get_no_state_with_recent(
        &self,
        kind: DomainKind,
        key: &[u8],
        tx_num: TxNum,
    ) -> AggResult<(Option<Vec<u8>>, Option<TxNum>)> {
        let shards = self.history_shards(kind)?;
        get_no_state_with_recent_over(shards, kind, key, tx_num)
    }

    /// `HistoryIterateChanged`: every `(key, txnum, prev_value)` entry
    /// recorded by any key in `[from_tx_num, to_tx_num)`.
    pub fn history_iterate_changed(
        &self,
        kind: DomainKind,
        from_tx_num: TxNum,
        to_tx_num: TxNum,
    ) -> AggResult<Vec<(Vec<u8>, TxNum, Vec<u8>)>> {
        let shards = self.history_shards(kind)?;
        history_iterate_changed_over(shards, kind, from_tx_num, to_tx_num)
    }

    /// `HistoricalStateRange`: every `(txnum, prev_value)` entry
    /// recorded for one `key` in `[from_tx_num, to_tx_num)`.
    pub fn historical_state_range(
        &self,
        kind: DomainKind,
        key: &[u8],
        from_tx_num: TxNum,
        to_tx_num: TxNum,
    ) -> AggResult<Vec<(TxNum, Vec<u8>)>> {
        let shards = self.history_shards(kind)?;
        historical_state_range_over(shards, kind, key, from_tx_num, to_tx_num)
    }

    /// `<Entity>HistoryIdxIterator`: the set of txnums in
    /// `[from_tx_num, to_tx_num)` at which `key`'s history changed.
    pub fn history_idx_iterator(
        &self,
        kind: DomainKind,
        key: &[u8],
        from_tx_num: TxNum,
        to_tx_num: TxNum,
    ) -> AggResult<Bitset> {
        let shards = self.history_shards(kind)?;
        history_idx_range_over(shards, kind, key, from_tx_num, to_tx_num)
    }

    /// Range read against an inverted-index domain's pinned shards,
    /// consulting that domain's locality index first.
    pub fn index_range(
        &self,
        kind: DomainKind,
        key: &[u8],
        from_tx_num: TxNum,
        to_tx_num: TxNum,
    ) -> AggResult<Bitset> {
        let shards = self.inverted_shards(kind)?;
        index_range_over(shards, kind, key, from_tx_num, to_tx_num, self.locality_for(kind))
    }

    /// `LogAddrIterator`.
    pub fn log_addr_iterator(&self, key: &[u8], from_tx_num: TxNum, to_tx_num: TxNum) -> AggResult<Bitset> {
        self.index_range(DomainKind::LogAddrs, key, from_tx_num, to_tx_num)
    }

    /// `LogTopicIterator`.
    pub fn log_topic_iterator(&self, key: &[u8], from_tx_num: TxNum, to_tx_num: TxNum) -> AggResult<Bitset> {
        self.index_range(DomainKind::LogTopics, key, from_tx_num, to_tx_num)
    }

    /// `TraceFromIterator`.
    pub fn trace_from_iterator(&self, key: &[u8], from_tx_num: TxNum, to_tx_num: TxNum) -> AggResult<Bitset> {
        self.index_range(DomainKind::TracesFrom, key, from_tx_num, to_tx_num)
    }

    /// `TraceToIterator`.
    pub fn trace_to_iterator(&self, key: &[u8], from_tx_num: TxNum, to_tx_num: TxNum) -> AggResult<Bitset> {
        self.index_range(DomainKind::TracesTo, key, from_tx_num, to_tx_num)
    }

    /// Number of shards pinned for `kind` by this context (for tests
    /// and diagnostics — confirms a context really does insulate reads
    /// from a concurrent merge).
    pub fn pinned_shard_count(&self, kind: DomainKind) -> usize {
        self.history_snapshots
            .get(&kind)
            .map(Vec::len)
            .or_else(|| self.inverted_snapshots.get(&kind).map(Vec::len))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
        use aggstate_storage::Collation;

    fn empty_locality() -> FxHashMap<DomainKind, Arc<LocalityIndex>> {
        let mut m = FxHashMap::default();
        for kind in DomainKind::ALL {
            m.insert(kind, Arc::new(LocalityIndex::new(kind)));
        }
        m
    }

    #[test]
    fn open_pins_shards_present_at_open_time() {
        let reg = DomainRegistry::new();
        reg.history(DomainKind::Accounts)
            .unwrap()
            .build_files(Collation::new_history(), TxNum(0), TxNum(4), 8)
            .unwrap();

        let ctx = QueryContext::open(&reg, TxNum(4), empty_locality());
        assert_eq!(ctx.pinned_shard_count(DomainKind::Accounts), 1);

        // Shards built after the context opened are not visible to it.
        reg.history(DomainKind::Accounts)
            .unwrap()
            .build_files(Collation::new_history(), TxNum(4), TxNum(8), 8)
            .unwrap();
        assert_eq!(ctx.pinned_shard_count(DomainKind::Accounts), 1);
        assert_eq!(
            reg.history(DomainKind::Accounts).unwrap().file_count(),
            2
        );
    }

    #[test]
    fn get_no_state_reads_pinned_snapshot() {
        let reg = DomainRegistry::new();
        let mut c = Collation::new_history();
        c.record_history(b"acct".to_vec(), 0, b"v0".to_vec());
        reg.history(DomainKind::Accounts)
            .unwrap()
            .build_files(c, TxNum(0), TxNum(4), 8)
            .unwrap();

        let ctx = QueryContext::open(&reg, TxNum(4), empty_locality());
        assert_eq!(
            ctx.get_no_state(DomainKind::Accounts, b"acct", TxNum(2))
                .unwrap(),
            Some(b"v0".to_vec())
        );
    }

    #[test]
    fn index_range_reads_pinned_snapshot() {
        let reg = DomainRegistry::new();
        let mut c = Collation::new_inverted_index();
        c.record_occurrence(b"addr".to_vec(), 1);
        reg.inverted(DomainKind::LogAddrs)
            .unwrap()
            .build_files(c, TxNum(0), TxNum(4), 8)
            .unwrap();

        let ctx = QueryContext::open(&reg, TxNum(4), empty_locality());
        let bits = ctx
            .index_range(DomainKind::LogAddrs, b"addr", TxNum(0), TxNum(4))
            .unwrap();
        assert_eq!(bits.iter_ones().collect::<Vec<_>>(), vec![1]);
        let bits2 = ctx
            .log_addr_iterator(b"addr", TxNum(0), TxNum(4))
            .unwrap();
        assert_eq!(bits2.iter_ones().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn wrong_domain_kind_is_inconsistent_error() {
        let reg = DomainRegistry::new();
        let ctx = QueryContext::open(&reg, TxNum(0), empty_locality());
        let err = ctx
            .get_no_state(DomainKind::LogAddrs, b"k", TxNum(0))
            .unwrap_err();
        assert!(matches!(err, AggError::Inconsistent(_)));
    }

    #[test]
    fn get_no_state_with_recent_reports_answering_txnum() {
        let reg = DomainRegistry::new();
        let mut c = Collation::new_history();
        c.record_history(b"acct".to_vec(), 0, b"v0".to_vec());
        c.record_history(b"acct".to_vec(), 2, b"v2".to_vec());
        reg.history(DomainKind::Accounts)
            .unwrap()
            .build_files(c, TxNum(0), TxNum(4), 8)
            .unwrap();

        let ctx = QueryContext::open(&reg, TxNum(4), empty_locality());
        let (value, recent) = ctx
            .get_no_state_with_recent(DomainKind::Accounts, b"acct", TxNum(3))
            .unwrap();
        assert_eq!(value, Some(b"v2".to_vec()));
        assert_eq!(recent, Some(TxNum(2)));
    }

    #[test]
    fn history_iterate_changed_and_range_and_idx_iterator() {
        let reg = DomainRegistry::new();
        let mut c = Collation::new_history();
        c.record_history(b"acct".to_vec(), 0, b"v0".to_vec());
        c.record_history(b"acct".to_vec(), 2, b"v2".to_vec());
        reg.history(DomainKind::Accounts)
            .unwrap()
            .build_files(c, TxNum(0), TxNum(4), 8)
            .unwrap();

        let ctx = QueryContext::open(&reg, TxNum(4), empty_locality());
        let changed = ctx
            .history_iterate_changed(DomainKind::Accounts, TxNum(0), TxNum(4))
            .unwrap();
        assert_eq!(changed.len(), 2);

        let range = ctx
            .historical_state_range(DomainKind::Accounts, b"acct", TxNum(0), TxNum(4))
            .unwrap();
        assert_eq!(range.len(), 2);

        let bits = ctx
            .history_idx_iterator(DomainKind::Accounts, b"acct", TxNum(0), TxNum(4))
            .unwrap();
        assert_eq!(bits.iter_ones().collect::<Vec<_>>(), vec![0, 2]);
    }
}
