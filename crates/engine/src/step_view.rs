//! Per-step, cross-domain views over the currently-integrated shards.
//!
//! [`AggregatorStep`] answers "which shard, in each domain, covers this
//! step" without the caller having to know each domain's shard
//! boundaries; [`make_steps`] builds the full run of steps currently
//! covered by every domain.

use aggstate_core::error::{AggError, AggResult};
use aggstate_core::txnum::{Step, TxNum};
use aggstate_storage::{DomainKind, DomainOps, Shard};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// A read-only view of one step's data across all domains.
#[derive(Clone)]
pub struct AggregatorStep {
    /// Which step this view covers.
    pub step: Step,
    /// Start of the step's txnum range (inclusive).
    pub start_tx_num: TxNum,
    /// End of the step's txnum range (exclusive).
    pub end_tx_num: TxNum,
    shards: FxHashMap<DomainKind, Arc<Shard>>,
}

impl AggregatorStep {
    /// The shard covering this step in `kind`'s domain, if one has been
    /// built and integrated yet.
    pub fn shard_for(&self, kind: DomainKind) -> Option<&Arc<Shard>> {
        self.shards.get(&kind)
    }

    /// Number of domains with a shard present for this step.
    pub fn domain_count(&self) -> usize {
        self.shards.len()
    }

    /// Every txnum this step covers, `[start_tx_num, end_tx_num)`.
    pub fn iterate_txs(&self) -> std::ops::Range<u64> {
        self.start_tx_num.0..self.end_tx_num.0
    }

    /// `ReadXNoState`: the value recorded for `key` at the largest
    /// txnum `<=` this step's last txnum, whether or not `key` has any
    /// history at all in this step's shard. Returns `(value,
    /// present_in_state)`: `present_in_state` is true iff `key` occurs
    /// anywhere in this step's shard, regardless of whether a qualifying
    /// entry was found.
    pub fn read_no_state(&self, kind: DomainKind, key: &[u8]) -> AggResult<(Option<Vec<u8>>, bool)> {
        let Some(shard) = self.shard_for(kind) else {
            return Ok((None, false));
        };
        let present = shard.data.contains_key(key);
        let last_tx = self.end_tx_num.0.saturating_sub(1);
        let value = aggstate_storage::get_no_state_over(
            std::slice::from_ref(shard),
            kind,
            key,
            TxNum(last_tx),
            None,
        )?;
        Ok((value, present))
    }

    /// `MaxTxNum(key)`: the largest txnum `<=` this step's range at
    /// which `key` was recorded, or `None` if it wasn't.
    pub fn max_tx_num(&self, kind: DomainKind, key: &[u8]) -> Option<TxNum> {
        let shard = self.shard_for(kind)?;
        let last_tx = self.end_tx_num.0.saturating_sub(1);
        shard
            .data
            .history_entries_at_or_before(key, last_tx)
            .into_iter()
            .map(|(tx, _)| TxNum(tx))
            .max()
    }

    /// `iterateHistoryBeforeTxNum`: every `(txnum, prev_value)` entry
    /// recorded for `key` within this step's shard, at or before
    /// `tx_num`, ascending.
    pub fn iterate_history_before(
        &self,
        kind: DomainKind,
        key: &[u8],
        tx_num: TxNum,
    ) -> Vec<(TxNum, Vec<u8>)> {
        let Some(shard) = self.shard_for(kind) else {
            return Vec::new();
        };
        shard
            .data
            .history_entries_at_or_before(key, tx_num.0)
            .into_iter()
            .map(|(tx, v)| (TxNum(tx), v))
            .collect()
    }
}

/// Build the full run of [`AggregatorStep`] views currently covered by
/// every domain in `domains`, given the aggregator's `aggregation_step`
/// size.
///
/// Errors with [`AggError::Inconsistent`] if the three history domains
/// (accounts/storage/code) present in `domains` disagree on step count
/// — §4.5's "different limit of steps" failure. Domains outside the
/// three history domains (or history domains simply absent from
/// `domains`) don't participate in that check: the run length is then
/// bounded by the *smallest* `end_tx_num_minimax` across everything
/// passed in, with lagging domains just contributing no shard for the
/// trailing steps rather than shortening the whole run.
pub fn make_steps(
    domains: &[Arc<dyn DomainOps>],
    aggregation_step: u64,
) -> AggResult<Vec<AggregatorStep>> {
    if domains.is_empty() || aggregation_step == 0 {
        return Ok(Vec::new());
    }

    let history_steps: Vec<(DomainKind, u64)> = domains
        .iter()
        .filter(|d| d.kind().is_history())
        .map(|d| (d.kind(), d.end_tx_num_minimax().0 / aggregation_step))
        .collect();
    if let Some((_, first)) = history_steps.first() {
        if history_steps.iter().any(|(_, s)| s != first) {
            return Err(AggError::inconsistent(format!(
                "different limit of steps across history domains: {history_steps:?}"
            )));
        }
    }

    let end_tx_num_minimax = domains
        .iter()
        .map(|d| d.end_tx_num_minimax())
        .min()
        .unwrap_or(TxNum::ZERO);

    let num_steps = end_tx_num_minimax.0 / aggregation_step;
    let mut steps = Vec::with_capacity(num_steps as usize);

    for s in 0..num_steps {
        let step = Step(s);
        let start = step.start_tx_num(aggregation_step);
        let end = step.end_tx_num(aggregation_step);

        let mut shards = FxHashMap::default();
        for d in domains {
            if let Some(shard) = find_shard_containing(d.as_ref(), start) {
                shards.insert(d.kind(), shard);
            }
        }
        steps.push(AggregatorStep {
            step,
            start_tx_num: start,
            end_tx_num: end,
            shards,
        });
    }

    Ok(steps)
}

fn find_shard_containing(domain: &dyn DomainOps, tx: TxNum) -> Option<Arc<Shard>> {
    domain.shard_set().snapshot().into_iter().find(|s| s.contains(tx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aggstate_storage::HistoryDomain;

    fn domain_with_shards(kind: DomainKind, spans: &[(u64, u64)]) -> Arc<dyn DomainOps> {
        let d = HistoryDomain::new(kind);
        for &(start, end) in spans {
            d.build_files(
                aggstate_storage::Collation::new_history(),
                TxNum(start),
                TxNum(end),
                end - start,
            )
            .unwrap();
        }
        Arc::new(d)
    }

    #[test]
    fn make_steps_empty_when_no_domains() {
        assert!(make_steps(&[], 4).unwrap().is_empty());
    }

    #[test]
    fn make_steps_bounded_by_slowest_domain() {
        let accounts = domain_with_shards(DomainKind::Accounts, &[(0, 4), (4, 8)]);
        let storage = domain_with_shards(DomainKind::Storage, &[(0, 4)]);
        let steps = make_steps(&[accounts, storage], 4).unwrap();
        // storage has only reached txnum 4 => only step 0 is covered
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].step, Step(0));
    }

    #[test]
    fn make_steps_errors_on_history_step_count_mismatch() {
        let accounts = domain_with_shards(DomainKind::Accounts, &[(0, 4), (4, 8)]);
        let storage = domain_with_shards(DomainKind::Storage, &[(0, 4)]);
        let err = make_steps(&[accounts, storage], 4).unwrap_err();
        assert!(matches!(err, AggError::Inconsistent(_)));
    }

    #[test]
    fn step_exposes_shard_per_domain() {
        let accounts = domain_with_shards(DomainKind::Accounts, &[(0, 4)]);
        let storage = domain_with_shards(DomainKind::Storage, &[(0, 4)]);
        let steps = make_steps(&[accounts, storage], 4).unwrap();
        assert_eq!(steps.len(), 1);
        assert!(steps[0].shard_for(DomainKind::Accounts).is_some());
        assert!(steps[0].shard_for(DomainKind::Storage).is_some());
        assert!(steps[0].shard_for(DomainKind::Code).is_none());
        assert_eq!(steps[0].domain_count(), 2);
    }

    #[test]
    fn iterate_txs_covers_the_step_range() {
        let accounts = domain_with_shards(DomainKind::Accounts, &[(0, 4)]);
        let steps = make_steps(&[accounts], 4).unwrap();
        assert_eq!(steps[0].iterate_txs(), 0..4);
    }

    #[test]
    fn read_no_state_reports_presence_and_value() {
        let d = HistoryDomain::new(DomainKind::Accounts);
        let mut c = aggstate_storage::Collation::new_history();
        c.record_history(b"acct".to_vec(), 0, b"v0".to_vec());
        d.build_files(c, TxNum(0), TxNum(4), 4).unwrap();
        let steps = make_steps(&[Arc::new(d) as Arc<dyn DomainOps>], 4).unwrap();

        let (value, present) = steps[0].read_no_state(DomainKind::Accounts, b"acct").unwrap();
        assert_eq!(value, Some(b"v0".to_vec()));
        assert!(present);

        let (value, present) = steps[0].read_no_state(DomainKind::Accounts, b"other").unwrap();
        assert_eq!(value, None);
        assert!(!present);
    }

    #[test]
    fn max_tx_num_and_iterate_history_before() {
        let d = HistoryDomain::new(DomainKind::Accounts);
        let mut c = aggstate_storage::Collation::new_history();
        c.record_history(b"acct".to_vec(), 0, b"v0".to_vec());
        c.record_history(b"acct".to_vec(), 2, b"v2".to_vec());
        d.build_files(c, TxNum(0), TxNum(4), 4).unwrap();
        let steps = make_steps(&[Arc::new(d) as Arc<dyn DomainOps>], 4).unwrap();

        assert_eq!(steps[0].max_tx_num(DomainKind::Accounts, b"acct"), Some(TxNum(2)));
        let entries = steps[0].iterate_history_before(DomainKind::Accounts, b"acct", TxNum(1));
        assert_eq!(entries, vec![(TxNum(0), b"v0".to_vec())]);
    }
}
