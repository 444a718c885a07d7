//! Pruning eligibility: which DB rows fall entirely outside the
//! `keepInDB` retention window and can be dropped from the live store.
//!
//! Built shards are immutable artifacts, retired only by being
//! superseded in a merge (see [`crate::merge`]) — never by a standalone
//! retention sweep. What a retention window actually bounds is how much
//! raw, not-yet-collated history the live DB keeps around for re-org
//! safety; this module's `prune_cutoff` is the shared cutoff-txnum math
//! both the writer's row-deletion path and `CanPrune`-style checks use.

use aggstate_core::txnum::TxNum;

/// The oldest txnum that must still be retained, given the
/// aggregator's current txnum and its `keepInDB` window.
pub fn prune_cutoff(current_tx_num: TxNum, keep_in_db: u64) -> TxNum {
    TxNum(current_tx_num.0.saturating_sub(keep_in_db))
}
