//! The domain handle contract: shared shard-set bookkeeping plus the
//! two read shapes a domain supports (time-travel point reads for
//! history domains, range reads for inverted-index domains).
//!
//! Dispatch is static: [`crate::history_domain::HistoryDomain`] and
//! [`crate::invidx_domain::InvertedIndexDomain`] are the only two
//! implementors, chosen per [`crate::domain::DomainKind`] at
//! construction time rather than behind a `dyn DomainOps`. A `dyn`
//! object is still useful for admin-style fan-out across all seven
//! domains (file counts, shard listings) — see
//! `aggstate-engine`'s registry, which only needs the
//! kind-agnostic half of this trait.

use crate::bitset::Bitset;
use crate::collation::Collation;
use crate::domain::DomainKind;
use crate::shard::{Shard, ShardSet};
use aggstate_core::error::AggResult;
use aggstate_core::txnum::TxNum;
use std::sync::Arc;

/// Operations every domain supports regardless of history/inverted-index
/// kind: shard-set bookkeeping, build, and merge integration.
pub trait DomainOps: Send + Sync {
    /// Which domain this handle manages.
    fn kind(&self) -> DomainKind;

    /// The domain's ordered, refcounted shard set.
    fn shard_set(&self) -> &ShardSet;

    /// `endTxNumMinimax_d`: the end of the last integrated shard, or
    /// txnum 0 if the domain has no shards yet.
    fn end_tx_num_minimax(&self) -> TxNum {
        self.shard_set().end_tx_num_minimax()
    }

    /// Turn one step's accumulated `collation` into a frozen shard
    /// covering `[start_tx_num, end_tx_num)`, and integrate it at the
    /// tail of this domain's shard set. `max_span` is `B*S`, used to
    /// compute the new shard's `frozen` flag.
    fn build_files(
        &self,
        collation: Collation,
        start_tx_num: TxNum,
        end_tx_num: TxNum,
        max_span: u64,
    ) -> AggResult<Arc<Shard>>;

    /// Swap `old` shards for `merged` in this domain's shard set.
    fn integrate_merged_files(&self, old: &[Arc<Shard>], merged: Arc<Shard>) -> AggResult<()> {
        self.shard_set().integrate_merged(old, merged).map_err(Into::into)
    }

    /// Hook invoked after a merge completes, given the merged shard's
    /// end txnum. The superseded shards are already marked `can_delete`
    /// by `integrate_merged_files`'s underlying swap; this is where a
    /// domain can additionally refresh derived state (the locality
    /// index rebuild, for history domains, is wired here by the
    /// orchestrator rather than by this default).
    fn clean_after_freeze(&self, _merged_end_tx_num: TxNum) {}

    /// Number of shards currently integrated (for admin/diagnostics).
    fn file_count(&self) -> usize {
        self.shard_set().snapshot().len()
    }
}

/// Point-in-time reads, implemented by history domains.
pub trait TimeTravelRead {
    /// The value that was in effect for `key` just before `tx_num`
    /// (i.e. the most recent previous-value entry with txnum `<=
    /// tx_num`), or `None` if the key has no recorded history at or
    /// before `tx_num`.
    fn get_no_state(&self, key: &[u8], tx_num: TxNum) -> AggResult<Option<Vec<u8>>>;
}

/// Range reads over txnum occurrence sets, implemented by
/// inverted-index domains.
pub trait RangeRead {
    /// The set of txnums in `[from_tx_num, to_tx_num)` at which `key`
    /// occurred, unioned across every shard (and any in-memory
    /// collation not yet built) that overlaps the range.
    fn index_range(&self, key: &[u8], from_tx_num: TxNum, to_tx_num: TxNum) -> AggResult<Bitset>;
}
