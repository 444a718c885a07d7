//! Concrete domain handle for the three history domains
//! (accounts/storage/code): previous-value-log reads keyed by txnum.

use crate::collation::Collation;
use crate::domain::DomainKind;
use crate::domain_ops::{DomainOps, TimeTravelRead};
use crate::locality::LocalityIndex;
use crate::shard::{Shard, ShardData, ShardSet};
use aggstate_core::error::{AggError, AggResult};
use aggstate_core::txnum::TxNum;
use std::sync::Arc;

/// A history domain's shard set plus its domain-specific build/read
/// logic.
pub struct HistoryDomain {
    kind: DomainKind,
    shards: ShardSet,
}

impl HistoryDomain {
    /// A new, empty history domain handle.
    pub fn new(kind: DomainKind) -> Self {
        debug_assert!(kind.is_history(), "HistoryDomain constructed with a non-history kind");
        HistoryDomain {
            kind,
            shards: ShardSet::new(),
        }
    }
}

impl DomainOps for HistoryDomain {
    fn kind(&self) -> DomainKind {
        self.kind
    }

    fn shard_set(&self) -> &ShardSet {
        &self.shards
    }

    fn build_files(
        &self,
        collation: Collation,
        start_tx_num: TxNum,
        end_tx_num: TxNum,
        max_span: u64,
    ) -> AggResult<Arc<Shard>> {
        let map = match collation {
            Collation::History(m) => m,
            Collation::InvertedIndex(_) => {
                return Err(AggError::file_build(
                    self.kind.base_name(),
                    "history domain received an inverted-index collation",
                ))
            }
        };
        let shard = Arc::new(Shard::new(
            start_tx_num,
            end_tx_num,
            ShardData::History(map),
            max_span,
        ));
        self.shards.integrate_built(shard.clone())?;
        Ok(shard)
    }
}

impl TimeTravelRead for HistoryDomain {
    fn get_no_state(&self, key: &[u8], tx_num: TxNum) -> AggResult<Option<Vec<u8>>> {
        get_no_state_over(&self.shards.snapshot(), self.kind, key, tx_num, None)
    }
}

/// Point-in-time read over an arbitrary, pinned slice of history
/// shards (ascending by `start_tx_num`), rather than a domain's live
/// shard set. Shared by [`HistoryDomain::get_no_state`] and by callers
/// holding a query-context snapshot that must stay stable across
/// concurrent merges.
///
/// When `locality` is given and its `shard_count()` agrees with the
/// number of frozen shards in `shards`, the lookup narrows straight to
/// the most recent frozen shard containing `key` before falling back
/// to the pre-frozen tail; a stale or absent index just means a full
/// scan, never a wrong answer.
pub fn get_no_state_over(
    shards: &[Arc<Shard>],
    kind: DomainKind,
    key: &[u8],
    tx_num: TxNum,
    locality: Option<&LocalityIndex>,
) -> AggResult<Option<Vec<u8>>> {
    let frozen: Vec<&Arc<Shard>> = shards.iter().filter(|s| s.frozen).collect();
    if let Some(li) = locality {
        if !li.is_empty() && li.shard_count() == frozen.len() {
            for &idx in li.lookup_all(key).iter().rev() {
                let Some(shard) = frozen.get(idx as usize) else {
                    continue;
                };
                if shard.start_tx_num.0 > tx_num.0 {
                    continue;
                }
                match &shard.data {
                    ShardData::History(map) => {
                        if let Some(entries) = map.get(key) {
                            if let Some((_, v)) = entries.range(..=tx_num.0).next_back() {
                                return Ok(Some(v.clone()));
                            }
                        }
                    }
                    ShardData::InvertedIndex(_) => {
                        return Err(AggError::fatal(format!(
                            "history domain {kind} holds a non-history shard"
                        )))
                    }
                }
            }
            // The indexed frozen shards had nothing at-or-before
            // tx_num; the key may still live in the non-frozen tail.
            return scan_non_frozen_tail(shards, kind, key, tx_num);
        }
    }
    // Shards are partitioned in ascending start_tx_num order, so the
    // first match scanning from the most recent shard backward is the
    // entry with the largest recorded txnum <= tx_num.
    for shard in shards.iter().rev() {
        if shard.start_tx_num.0 > tx_num.0 {
            continue;
        }
        match &shard.data {
            ShardData::History(map) => {
                if let Some(entries) = map.get(key) {
                    if let Some((_, v)) = entries.range(..=tx_num.0).next_back() {
                        return Ok(Some(v.clone()));
                    }
                }
            }
            ShardData::InvertedIndex(_) => {
                return Err(AggError::fatal(format!(
                    "history domain {kind} holds a non-history shard"
                )))
            }
        }
    }
    Ok(None)
}

fn scan_non_frozen_tail(
    shards: &[Arc<Shard>],
    kind: DomainKind,
    key: &[u8],
    tx_num: TxNum,
) -> AggResult<Option<Vec<u8>>> {
    for shard in shards.iter().rev().filter(|s| !s.frozen) {
        if shard.start_tx_num.0 > tx_num.0 {
            continue;
        }
        match &shard.data {
            ShardData::History(map) => {
                if let Some(entries) = map.get(key) {
                    if let Some((_, v)) = entries.range(..=tx_num.0).next_back() {
                        return Ok(Some(v.clone()));
                    }
                }
            }
            ShardData::InvertedIndex(_) => {
                return Err(AggError::fatal(format!(
                    "history domain {kind} holds a non-history shard"
                )))
            }
        }
    }
    Ok(None)
}

/// `ReadXNoStateWithRecent`: like [`get_no_state_over`], but also reports
/// the txnum of the entry that answered the read (the most recent change
/// to `key` at or before `tx_num`), not just its value.
pub fn get_no_state_with_recent_over(
    shards: &[Arc<Shard>],
    kind: DomainKind,
    key: &[u8],
    tx_num: TxNum,
) -> AggResult<(Option<Vec<u8>>, Option<TxNum>)> {
    for shard in shards.iter().rev() {
        if shard.start_tx_num.0 > tx_num.0 {
            continue;
        }
        match &shard.data {
            ShardData::History(map) => {
                if let Some(entries) = map.get(key) {
                    if let Some((&t, v)) = entries.range(..=tx_num.0).next_back() {
                        return Ok((Some(v.clone()), Some(TxNum(t))));
                    }
                }
            }
            ShardData::InvertedIndex(_) => {
                return Err(AggError::fatal(format!(
                    "history domain {kind} holds a non-history shard"
                )))
            }
        }
    }
    Ok((None, None))
}

/// `HistoryIterateChanged`: every `(key, txnum, prev_value)` entry
/// recorded by any key in `[from_tx_num, to_tx_num)`, across every shard
/// overlapping the range, ascending by txnum within each shard.
pub fn history_iterate_changed_over(
    shards: &[Arc<Shard>],
    kind: DomainKind,
    from_tx_num: TxNum,
    to_tx_num: TxNum,
) -> AggResult<Vec<(Vec<u8>, TxNum, Vec<u8>)>> {
    let mut out = Vec::new();
    for shard in shards.iter() {
        if shard.end_tx_num.0 <= from_tx_num.0 || shard.start_tx_num.0 >= to_tx_num.0 {
            continue;
        }
        match &shard.data {
            ShardData::History(map) => {
                for (key, entries) in map.iter() {
                    for (&t, v) in entries.range(from_tx_num.0..to_tx_num.0) {
                        out.push((key.clone(), TxNum(t), v.clone()));
                    }
                }
            }
            ShardData::InvertedIndex(_) => {
                return Err(AggError::fatal(format!(
                    "history domain {kind} holds a non-history shard"
                )))
            }
        }
    }
    out.sort_by_key(|(_, t, _)| *t);
    Ok(out)
}

/// `HistoricalStateRange`: every `(txnum, prev_value)` entry recorded for
/// one `key` in `[from_tx_num, to_tx_num)`, ascending.
pub fn historical_state_range_over(
    shards: &[Arc<Shard>],
    kind: DomainKind,
    key: &[u8],
    from_tx_num: TxNum,
    to_tx_num: TxNum,
) -> AggResult<Vec<(TxNum, Vec<u8>)>> {
    let mut out = Vec::new();
    for shard in shards.iter() {
        if shard.end_tx_num.0 <= from_tx_num.0 || shard.start_tx_num.0 >= to_tx_num.0 {
            continue;
        }
        match &shard.data {
            ShardData::History(map) => {
                if let Some(entries) = map.get(key) {
                    out.extend(
                        entries
                            .range(from_tx_num.0..to_tx_num.0)
                            .map(|(t, v)| (TxNum(*t), v.clone())),
                    );
                }
            }
            ShardData::InvertedIndex(_) => {
                return Err(AggError::fatal(format!(
                    "history domain {kind} holds a non-history shard"
                )))
            }
        }
    }
    out.sort_by_key(|(t, _)| *t);
    Ok(out)
}

/// `<Entity>HistoryIdxIterator`: the set of txnums in `[from_tx_num,
/// to_tx_num)` at which `key`'s history changed, as a [`Bitset`] of
/// absolute txnums — the history-domain analogue of
/// [`crate::invidx_domain::index_range_over`].
pub fn history_idx_range_over(
    shards: &[Arc<Shard>],
    kind: DomainKind,
    key: &[u8],
    from_tx_num: TxNum,
    to_tx_num: TxNum,
) -> AggResult<crate::bitset::Bitset> {
    let mut result = crate::bitset::Bitset::new();
    for (_, t, _) in historical_state_range_over(shards, kind, key, from_tx_num, to_tx_num)? {
        result.set(t.0);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collation_with(entries: &[(&[u8], u64, &[u8])]) -> Collation {
        let mut c = Collation::new_history();
        for (k, t, v) in entries {
            c.record_history(k.to_vec(), *t, v.to_vec());
        }
        c
    }

    #[test]
    fn build_files_rejects_wrong_collation_kind() {
        let d = HistoryDomain::new(DomainKind::Accounts);
        let err = d
            .build_files(Collation::new_inverted_index(), TxNum(0), TxNum(4), 8)
            .unwrap_err();
        assert!(err.is_file_build());
    }

    #[test]
    fn get_no_state_picks_largest_entry_at_or_before_query() {
        let d = HistoryDomain::new(DomainKind::Accounts);
        let c = collation_with(&[(b"acct", 0, b"balance=0"), (b"acct", 2, b"balance=5")]);
        d.build_files(c, TxNum(0), TxNum(4), 8).unwrap();

        assert_eq!(
            d.get_no_state(b"acct", TxNum(1)).unwrap(),
            Some(b"balance=0".to_vec())
        );
        assert_eq!(
            d.get_no_state(b"acct", TxNum(3)).unwrap(),
            Some(b"balance=5".to_vec())
        );
        assert_eq!(d.get_no_state(b"unknown", TxNum(3)).unwrap(), None);
    }

    #[test]
    fn get_no_state_before_any_recorded_entry_is_none() {
        let d = HistoryDomain::new(DomainKind::Accounts);
        let c = collation_with(&[(b"acct", 2, b"balance=5")]);
        d.build_files(c, TxNum(0), TxNum(4), 8).unwrap();
        assert_eq!(d.get_no_state(b"acct", TxNum(0)).unwrap(), None);
    }

    #[test]
    fn get_no_state_spans_multiple_shards() {
        let d = HistoryDomain::new(DomainKind::Accounts);
        d.build_files(
            collation_with(&[(b"acct", 0, b"v0")]),
            TxNum(0),
            TxNum(4),
            8,
        )
        .unwrap();
        d.build_files(
            collation_with(&[(b"other", 4, b"unrelated")]),
            TxNum(4),
            TxNum(8),
            8,
        )
        .unwrap();
        // "acct" only appears in the first shard; a query against the
        // second shard's range must still find it there.
        assert_eq!(
            d.get_no_state(b"acct", TxNum(6)).unwrap(),
            Some(b"v0".to_vec())
        );
    }

    #[test]
    fn with_recent_reports_the_answering_txnum() {
        let d = HistoryDomain::new(DomainKind::Accounts);
        let c = collation_with(&[(b"acct", 0, b"balance=0"), (b"acct", 2, b"balance=5")]);
        d.build_files(c, TxNum(0), TxNum(4), 8).unwrap();

        let (value, recent) =
            get_no_state_with_recent_over(&d.shards.snapshot(), d.kind, b"acct", TxNum(3)).unwrap();
        assert_eq!(value, Some(b"balance=5".to_vec()));
        assert_eq!(recent, Some(TxNum(2)));

        let (value, recent) =
            get_no_state_with_recent_over(&d.shards.snapshot(), d.kind, b"missing", TxNum(3)).unwrap();
        assert_eq!(value, None);
        assert_eq!(recent, None);
    }

    #[test]
    fn iterate_changed_collects_every_keys_entries_in_range() {
        let d = HistoryDomain::new(DomainKind::Accounts);
        let c = collation_with(&[(b"a", 0, b"va0"), (b"b", 1, b"vb1"), (b"a", 5, b"va5")]);
        d.build_files(c, TxNum(0), TxNum(8), 8).unwrap();

        let changed =
            history_iterate_changed_over(&d.shards.snapshot(), d.kind, TxNum(0), TxNum(4)).unwrap();
        assert_eq!(
            changed,
            vec![
                (b"a".to_vec(), TxNum(0), b"va0".to_vec()),
                (b"b".to_vec(), TxNum(1), b"vb1".to_vec()),
            ]
        );
    }

    #[test]
    fn historical_state_range_bounds_to_one_key_and_window() {
        let d = HistoryDomain::new(DomainKind::Accounts);
        let c = collation_with(&[(b"acct", 0, b"v0"), (b"acct", 2, b"v2"), (b"acct", 6, b"v6")]);
        d.build_files(c, TxNum(0), TxNum(8), 8).unwrap();

        let range =
            historical_state_range_over(&d.shards.snapshot(), d.kind, b"acct", TxNum(1), TxNum(6))
                .unwrap();
        assert_eq!(range, vec![(TxNum(2), b"v2".to_vec())]);
    }

    #[test]
    fn history_idx_range_reports_change_txnums_as_a_bitset() {
        let d = HistoryDomain::new(DomainKind::Accounts);
        let c = collation_with(&[(b"acct", 0, b"v0"), (b"acct", 2, b"v2")]);
        d.build_files(c, TxNum(0), TxNum(4), 8).unwrap();

        let bits =
            history_idx_range_over(&d.shards.snapshot(), d.kind, b"acct", TxNum(0), TxNum(4)).unwrap();
        assert_eq!(bits.iter_ones().collect::<Vec<_>>(), vec![0, 2]);
    }
}
