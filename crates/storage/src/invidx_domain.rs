//! Concrete domain handle for the four inverted-index domains
//! (logAddrs/logTopics/tracesFrom/tracesTo): key -> set-of-txnums reads.

use crate::bitset::Bitset;
use crate::collation::Collation;
use crate::domain::DomainKind;
use crate::domain_ops::{DomainOps, RangeRead};
use crate::locality::LocalityIndex;
use crate::shard::{Shard, ShardData, ShardSet};
use aggstate_core::error::{AggError, AggResult};
use aggstate_core::txnum::TxNum;
use std::sync::Arc;

/// An inverted-index domain's shard set plus its domain-specific
/// build/read logic.
pub struct InvertedIndexDomain {
    kind: DomainKind,
    shards: ShardSet,
}

impl InvertedIndexDomain {
    /// A new, empty inverted-index domain handle.
    pub fn new(kind: DomainKind) -> Self {
        debug_assert!(
            !kind.is_history(),
            "InvertedIndexDomain constructed with a history kind"
        );
        InvertedIndexDomain {
            kind,
            shards: ShardSet::new(),
        }
    }
}

impl DomainOps for InvertedIndexDomain {
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
            Collation::InvertedIndex(m) => m,
            Collation::History(_) => {
                return Err(AggError::file_build(
                    self.kind.base_name(),
                    "inverted-index domain received a history collation",
                ))
            }
        };
        let shard = Arc::new(Shard::new(
            start_tx_num,
            end_tx_num,
            ShardData::InvertedIndex(map),
            max_span,
        ));
        self.shards.integrate_built(shard.clone())?;
        Ok(shard)
    }
}

impl RangeRead for InvertedIndexDomain {
    fn index_range(&self, key: &[u8], from_tx_num: TxNum, to_tx_num: TxNum) -> AggResult<Bitset> {
        index_range_over(
            &self.shards.snapshot(),
            self.kind,
            key,
            from_tx_num,
            to_tx_num,
            None,
        )
    }
}

/// Range read over an arbitrary, pinned slice of inverted-index shards,
/// rather than a domain's live shard set. Shared by
/// [`InvertedIndexDomain::index_range`] and by callers holding a
/// query-context snapshot that must stay stable across concurrent
/// merges.
///
/// When `locality` is given and still matches the frozen-shard count in
/// `shards`, only the frozen shards the index says contain `key` are
/// consulted, plus the always-unindexed non-frozen tail — narrowing the
/// scan instead of walking every shard. A stale or absent index falls
/// back to scanning every shard.
pub fn index_range_over(
    shards: &[Arc<Shard>],
    kind: DomainKind,
    key: &[u8],
    from_tx_num: TxNum,
    to_tx_num: TxNum,
    locality: Option<&LocalityIndex>,
) -> AggResult<Bitset> {
    let frozen: Vec<&Arc<Shard>> = shards.iter().filter(|s| s.frozen).collect();
    if let Some(li) = locality {
        if !li.is_empty() && li.shard_count() == frozen.len() {
            let mut result = Bitset::new();
            for idx in li.lookup_all(key) {
                if let Some(shard) = frozen.get(idx as usize) {
                    accumulate_shard(shard, key, from_tx_num, to_tx_num, kind, &mut result)?;
                }
            }
            for shard in shards.iter().filter(|s| !s.frozen) {
                accumulate_shard(shard, key, from_tx_num, to_tx_num, kind, &mut result)?;
            }
            return Ok(result);
        }
    }

    let mut result = Bitset::new();
    for shard in shards.iter() {
        accumulate_shard(shard, key, from_tx_num, to_tx_num, kind, &mut result)?;
    }
    Ok(result)
}

fn accumulate_shard(
    shard: &Arc<Shard>,
    key: &[u8],
    from_tx_num: TxNum,
    to_tx_num: TxNum,
    kind: DomainKind,
    result: &mut Bitset,
) -> AggResult<()> {
    if shard.end_tx_num.0 <= from_tx_num.0 || shard.start_tx_num.0 >= to_tx_num.0 {
        return Ok(());
    }
    match &shard.data {
        ShardData::InvertedIndex(map) => {
            if let Some(bits) = map.get(key) {
                for offset in bits.iter_ones() {
                    let abs = shard.start_tx_num.0 + offset;
                    if abs >= from_tx_num.0 && abs < to_tx_num.0 {
                        result.set(abs);
                    }
                }
            }
            Ok(())
        }
        ShardData::History(_) => Err(AggError::fatal(format!(
            "inverted-index domain {kind} holds a non-inverted-index shard"
        ))),
    }
}
