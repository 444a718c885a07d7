//! Registry binding each of the seven domains to its concrete handle,
//! plus an object-safe admin view used for cross-domain fan-out
//! (shard counts, step views, log reporting) without every caller
//! needing to know history vs. inverted-index kind.

use aggstate_storage::{DomainKind, DomainOps, HistoryDomain, InvertedIndexDomain};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Owns one concrete domain handle per [`DomainKind`].
pub struct DomainRegistry {
    history: FxHashMap<DomainKind, Arc<HistoryDomain>>,
    inverted: FxHashMap<DomainKind, Arc<InvertedIndexDomain>>,
}

impl DomainRegistry {
    /// A registry with a fresh, empty handle for every domain.
    pub fn new() -> Self {
        let mut history = FxHashMap::default();
        for kind in DomainKind::HISTORY {
            history.insert(kind, Arc::new(HistoryDomain::new(kind)));
        }
        let mut inverted = FxHashMap::default();
        for kind in DomainKind::INVERTED_INDEX {
            inverted.insert(kind, Arc::new(InvertedIndexDomain::new(kind)));
        }
        DomainRegistry { history, inverted }
    }

    /// The concrete history handle for `kind`, if `kind` is a history
    /// domain.
    pub fn history(&self, kind: DomainKind) -> Option<&Arc<HistoryDomain>> {
        self.history.get(&kind)
    }

    /// The concrete inverted-index handle for `kind`, if `kind` is an
    /// inverted-index domain.
    pub fn inverted(&self, kind: DomainKind) -> Option<&Arc<InvertedIndexDomain>> {
        self.inverted.get(&kind)
    }

    /// Every domain handle as a `dyn DomainOps`, for admin fan-out that
    /// doesn't care about history/inverted-index kind (shard counts,
    /// `make_steps`, cleanup).
    pub fn all_ops(&self) -> Vec<Arc<dyn DomainOps>> {
        let mut out: Vec<Arc<dyn DomainOps>> = Vec::with_capacity(DomainKind::ALL.len());
        for kind in DomainKind::HISTORY {
            if let Some(d) = self.history.get(&kind) {
                out.push(d.clone() as Arc<dyn DomainOps>);
            }
        }
        for kind in DomainKind::INVERTED_INDEX {
            if let Some(d) = self.inverted.get(&kind) {
                out.push(d.clone() as Arc<dyn DomainOps>);
            }
        }
        out
    }

    /// Per-domain shard-count and coverage report, the non-panicking
    /// replacement for a `LogStats`-style admin dump.
    pub fn log_stats(&self) -> Vec<DomainFileStats> {
        self.all_ops()
            .iter()
            .map(|d| DomainFileStats {
                kind: d.kind(),
                file_count: d.file_count(),
                end_tx_num_minimax: d.end_tx_num_minimax().0,
            })
            .collect()
    }
}

impl Default for DomainRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// One domain's row in a [`DomainRegistry::log_stats`] report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainFileStats {
    /// The domain this row describes.
    pub kind: DomainKind,
    /// Number of shards currently integrated.
    pub file_count: usize,
    /// This domain's `endTxNumMinimax`.
    pub end_tx_num_minimax: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use aggstate_core::txnum::TxNum;

    #[test]
    fn new_registry_has_all_seven_domains() {
        let reg = DomainRegistry::new();
        assert_eq!(reg.all_ops().len(), 7);
        for kind in DomainKind::HISTORY {
            assert!(reg.history(kind).is_some());
            assert!(reg.inverted(kind).is_none());
        }
        for kind in DomainKind::INVERTED_INDEX {
            assert!(reg.inverted(kind).is_some());
            assert!(reg.history(kind).is_none());
        }
    }

    #[test]
    fn log_stats_reflects_built_shards() {
        let reg = DomainRegistry::new();
        reg.history(DomainKind::Accounts)
            .unwrap()
            .build_files(
                aggstate_storage::Collation::new_history(),
                TxNum(0),
                TxNum(4),
                8,
            )
            .unwrap();

        let stats = reg.log_stats();
        let accounts_row = stats
            .iter()
            .find(|r| r.kind == DomainKind::Accounts)
            .unwrap();
        assert_eq!(accounts_row.file_count, 1);
        assert_eq!(accounts_row.end_tx_num_minimax, 4);

        let code_row = stats.iter().find(|r| r.kind == DomainKind::Code).unwrap();
        assert_eq!(code_row.file_count, 0);
    }
}
