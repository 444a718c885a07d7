//! The orchestrator: owns every domain's shard set, the writer's DB-backed
//! ingestion pipeline, and the build/merge/prune/warmup loops that turn
//! live DB rows into shards and keep the shard count bounded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use aggstate_concurrency::{BackgroundResult, CancellationToken, SingletonGuard, WaitGroup};
use aggstate_core::config::{AggregatorConfig, LOCALITY_INDEX_UINT64_LIMIT};
use aggstate_core::error::{AggError, AggResult};
use aggstate_core::kv::Db;
use aggstate_core::txnum::TxNum;
use aggstate_storage::{find_merge_range, merge_shard_data, Collation, DomainKind, LocalityIndex, Shard};
use rustc_hash::FxHashMap;

use crate::query_context::QueryContext;
use crate::registry::{DomainFileStats, DomainRegistry};
use crate::step_view::{make_steps, AggregatorStep};

/// [`Aggregator::warmup`] is a no-op below this row-count limit: the
/// page-fault cost of a tiny warmup isn't worth a background job.
pub const WARMUP_MIN_LIMIT: u64 = 10_000;

/// Practical upper bound on a row key's txnum prefix, used as the open
/// end of a `delete_range`/`range` call that should run "to the end of
/// the table".
const TX_NUM_UPPER_BOUND: [u8; 8] = [0xff; 8];

/// `tx_num_be(8 bytes) ++ entity_key`: the row-key layout every domain's
/// `keys_table()` uses. History domains store `prev_value` at this key;
/// inverted-index domains store an empty marker (the row's existence,
/// at this txnum, for this key, *is* the datum — `collate_domain`
/// derives the occurrence offset from the key's own embedded txnum).
fn row_key(tx_num: TxNum, key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + key.len());
    out.extend_from_slice(&tx_num.to_be_bytes());
    out.extend_from_slice(key);
    out
}

fn split_row_key(row_key: &[u8]) -> Option<(TxNum, &[u8])> {
    if row_key.len() < 8 {
        return None;
    }
    let (tx_bytes, entity_key) = row_key.split_at(8);
    let tx_num = TxNum::from_be_bytes(tx_bytes.try_into().ok()?);
    Some((tx_num, entity_key))
}

/// Owns the full set of domains and drives the build/merge/prune/warmup
/// lifecycle over them, backed by a host [`Db`] the writer pipeline
/// appends rows to as it processes transactions.
///
/// The four lifecycle loops each guard re-entrancy with their own
/// [`SingletonGuard`]: calling `build_step` while a build is already in
/// flight is a no-op (logged, not an error) rather than queuing
/// unboundedly, mirroring the reference design's `working` /
/// `workingMerge` / `workingOptionalIndices` / `warmupWorking` CAS
/// flags. Each loop also registers with a shared [`WaitGroup`] so
/// [`Aggregator::wait_idle`] can block until in-flight work settles,
/// and checks the shared [`CancellationToken`] before starting new
/// work.
pub struct Aggregator {
    config: AggregatorConfig,
    registry: DomainRegistry,
    db: Arc<dyn Db>,
    locality: FxHashMap<DomainKind, Arc<LocalityIndex>>,
    tx_num: AtomicU64,
    build_guard: SingletonGuard,
    merge_guard: SingletonGuard,
    prune_guard: SingletonGuard,
    warmup_guard: SingletonGuard,
    wait_group: WaitGroup,
    cancel: CancellationToken,
    background_result: BackgroundResult,
    parallel_build: bool,
}

impl Aggregator {
    /// A freshly constructed aggregator, backed by `db`, with no shards
    /// and `tx_num` at zero.
    pub fn new(config: AggregatorConfig, db: Arc<dyn Db>) -> Self {
        let registry = DomainRegistry::new();
        let mut locality = FxHashMap::default();
        for kind in DomainKind::ALL {
            locality.insert(kind, Arc::new(LocalityIndex::new(kind)));
        }
        Aggregator {
            config,
            registry,
            db,
            locality,
            tx_num: AtomicU64::new(0),
            build_guard: SingletonGuard::new(),
            merge_guard: SingletonGuard::new(),
            prune_guard: SingletonGuard::new(),
            warmup_guard: SingletonGuard::new(),
            wait_group: WaitGroup::new(),
            cancel: CancellationToken::new(),
            background_result: BackgroundResult::new(),
            parallel_build: false,
        }
    }

    /// Opt into the parallel-build seam: a documented constructor flag
    /// for fanning `build_step`'s per-domain loop out across a worker
    /// pool instead of running it sequentially. Defaulted off; flipping
    /// it on is currently a no-op; the per-domain collation step
    /// already takes `&self` plus an isolated snapshot, which is what a
    /// future thread-pool dispatch over [`aggstate_concurrency`]'s
    /// worker primitive would need, but that dispatch isn't wired up
    /// yet. Exists so the seam is reachable from the public API before
    /// the parallel path is implemented.
    pub fn with_parallel_build(mut self, enabled: bool) -> Self {
        self.parallel_build = enabled;
        self
    }

    /// Whether [`Aggregator::with_parallel_build`] has been enabled.
    pub fn parallel_build_enabled(&self) -> bool {
        self.parallel_build
    }

    /// Advisory precondition for `build_step`: true once there is at
    /// least one full new step of data beyond what's already
    /// snapshotted plus the `keepInDB` safety margin, i.e.
    /// `txNum + 1 > maxTxNum + S + keepInDB`. `build_step` itself does
    /// not consult this — it remains an unconditional mechanism a
    /// caller can invoke directly (as the unit tests below do, well
    /// under this threshold) — but a writer loop driving the
    /// aggregator on a schedule should check `should_build()` before
    /// calling it, to avoid building steps with less than a full
    /// step's worth of new data.
    pub fn should_build(&self) -> bool {
        let threshold =
            self.max_tx_num().0 + self.config.aggregation_step + self.config.keep_in_db;
        self.tx_num().0 + 1 > threshold
    }

    /// The aggregator's configuration.
    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// The domain registry (for read paths that need typed handles).
    pub fn registry(&self) -> &DomainRegistry {
        &self.registry
    }

    /// The host DB this aggregator's writer pipeline appends rows to.
    pub fn db(&self) -> &Arc<dyn Db> {
        &self.db
    }

    /// The writer's current txnum cursor.
    pub fn tx_num(&self) -> TxNum {
        TxNum(self.tx_num.load(Ordering::Acquire))
    }

    /// Advance the writer's txnum cursor. Monotonic: callers must not
    /// move it backward (use [`Aggregator::unwind`] to go backward).
    pub fn advance_tx_num(&self, tx_num: TxNum) {
        debug_assert!(
            tx_num.0 >= self.tx_num.load(Ordering::Acquire),
            "tx_num must be non-decreasing; use unwind() to move it back"
        );
        self.tx_num.store(tx_num.0, Ordering::Release);
    }

    /// `SetTx`: set the writer's current txnum cursor, the point every
    /// subsequent `Add*Prev`/`Add*`/`add_log_*`/`add_trace_*` call
    /// records its row against.
    pub fn set_tx(&self, tx_num: TxNum) {
        self.advance_tx_num(tx_num);
    }

    fn force_tx_num(&self, tx_num: TxNum) {
        self.tx_num.store(tx_num.0, Ordering::Release);
    }

    fn put_row(&self, table: aggstate_core::kv::TableId, key: &[u8], value: &[u8]) -> AggResult<()> {
        let mut tx = self.db.begin_rw()?;
        tx.put(table, key, value)?;
        tx.commit()
    }

    /// `AddAccountPrev`: record that `key`'s previous value, as of the
    /// writer's current txnum, was `prev_value`.
    pub fn add_account_prev(&self, key: &[u8], prev_value: &[u8]) -> AggResult<()> {
        self.add_history_prev(DomainKind::Accounts, key, prev_value)
    }

    /// `AddStoragePrev`: record a contract storage slot's previous value.
    pub fn add_storage_prev(&self, key: &[u8], prev_value: &[u8]) -> AggResult<()> {
        self.add_history_prev(DomainKind::Storage, key, prev_value)
    }

    /// `AddCodePrev`: record a contract code previous value.
    pub fn add_code_prev(&self, key: &[u8], prev_value: &[u8]) -> AggResult<()> {
        self.add_history_prev(DomainKind::Code, key, prev_value)
    }

    fn add_history_prev(&self, kind: DomainKind, key: &[u8], prev_value: &[u8]) -> AggResult<()> {
        self.put_row(kind.keys_table(), &row_key(self.tx_num(), key), prev_value)
    }

    /// `AddLogAddr`: record a log-address occurrence at the writer's
    /// current txnum.
    pub fn add_log_addr(&self, key: &[u8]) -> AggResult<()> {
        self.add_occurrence(DomainKind::LogAddrs, key)
    }

    /// `AddLogTopic`: record a log-topic occurrence.
    pub fn add_log_topic(&self, key: &[u8]) -> AggResult<()> {
        self.add_occurrence(DomainKind::LogTopics, key)
    }

    /// `AddTraceFrom`: record a call-trace `from`-address occurrence.
    pub fn add_trace_from(&self, key: &[u8]) -> AggResult<()> {
        self.add_occurrence(DomainKind::TracesFrom, key)
    }

    /// `AddTraceTo`: record a call-trace `to`-address occurrence.
    pub fn add_trace_to(&self, key: &[u8]) -> AggResult<()> {
        self.add_occurrence(DomainKind::TracesTo, key)
    }

    fn add_occurrence(&self, kind: DomainKind, key: &[u8]) -> AggResult<()> {
        self.put_row(kind.keys_table(), &row_key(self.tx_num(), key), b"")
    }

    /// `Flush`: make every `Add*` call issued so far visible to readers.
    /// A documented no-op: each `Add*` call commits its own transaction
    /// directly against [`Aggregator::db`] rather than buffering in an
    /// uncommitted writer-side batch, so there is nothing left to flush
    /// by the time this returns.
    pub fn flush(&self) -> AggResult<()> {
        Ok(())
    }

    /// `DiscardHistory`: delete every row recorded at or after
    /// `from_tx_num` across all seven domains, without collating them
    /// into a shard first. Used to roll back writer-side rows appended
    /// speculatively ahead of a confirmed txnum.
    pub fn discard_history(&self, from_tx_num: TxNum) -> AggResult<()> {
        let from_key = from_tx_num.to_be_bytes();
        let mut tx = self.db.begin_rw()?;
        for kind in DomainKind::ALL {
            tx.delete_range(kind.keys_table(), &from_key, &TX_NUM_UPPER_BOUND)?;
        }
        tx.commit()
    }

    /// `maxTxNum`: the highest txnum for which every domain has an
    /// integrated shard, i.e. the point a query context can safely read
    /// up to. `min_d endTxNumMinimax_d` across all seven domains.
    pub fn max_tx_num(&self) -> TxNum {
        self.registry
            .all_ops()
            .iter()
            .map(|d| d.end_tx_num_minimax())
            .min()
            .unwrap_or(TxNum::ZERO)
    }

    /// Open a [`QueryContext`] pinned at `max_tx_num()`.
    pub fn query(&self) -> QueryContext {
        QueryContext::open(&self.registry, self.max_tx_num(), self.locality.clone())
    }

    /// The full run of per-step, cross-domain views currently covered.
    pub fn steps(&self) -> AggResult<Vec<AggregatorStep>> {
        make_steps(&self.registry.all_ops(), self.config.aggregation_step)
    }

    /// Per-domain shard-count / coverage report.
    pub fn log_stats(&self) -> Vec<DomainFileStats> {
        self.registry.log_stats()
    }

    /// Request cooperative shutdown: in-flight and future loop
    /// iterations observe `is_cancelled()` and unwind.
    pub fn request_cancel(&self) {
        self.cancel.cancel();
    }

    /// True once [`Aggregator::request_cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Block until every spawned build/merge/prune/warmup job this
    /// aggregator is tracking has completed.
    pub fn wait_idle(&self) {
        self.wait_group.wait();
    }

    /// The last error recorded by a background loop, if any, clearing
    /// it (`GetAndReset` semantics).
    pub fn take_background_error(&self) -> Option<AggError> {
        self.background_result.get_and_reset()
    }

    /// Collate one domain's `[start_tx_num, end_tx_num)` rows out of
    /// the live DB into a [`Collation`] ready for `build_files`.
    /// §4.3.2 step 2a: open a read-only snapshot and collate from it,
    /// rather than accumulating writer-side state separately.
    fn collate_domain(
        &self,
        kind: DomainKind,
        start_tx_num: TxNum,
        end_tx_num: TxNum,
    ) -> AggResult<Collation> {
        let view = self.db.view()?;
        let rows = view.range(
            kind.keys_table(),
            &start_tx_num.to_be_bytes(),
            &end_tx_num.to_be_bytes(),
        )?;

        let mut collation = if kind.is_history() {
            Collation::new_history()
        } else {
            Collation::new_inverted_index()
        };
        for (key, value) in rows {
            let Some((tx_num, entity_key)) = split_row_key(&key) else {
                continue;
            };
            if kind.is_history() {
                collation.record_history(entity_key.to_vec(), tx_num.0, value);
            } else {
                collation.record_occurrence(entity_key.to_vec(), tx_num.0 - start_tx_num.0);
            }
        }
        Ok(collation)
    }

    /// Turn every domain's `[start_tx_num, end_tx_num)` DB rows into one
    /// shard each, integrating each at the tail of its domain's shard
    /// set. Domains with no rows in the range get no shard this step.
    ///
    /// A no-op (returns `Ok(())` without doing anything) if a build is
    /// already in flight — re-entrancy is prevented via
    /// [`SingletonGuard::try_acquire`] rather than queuing or erroring,
    /// since the caller always retries the same step on the next
    /// writer tick.
    pub fn build_step(&self, start_tx_num: TxNum, end_tx_num: TxNum) -> AggResult<()> {
        if self.is_cancelled() {
            return Err(AggError::Cancelled);
        }
        let Some(_guard) = self.build_guard.try_acquire() else {
            tracing::debug!(target: "aggstate::build", "build already in progress, skipping");
            return Ok(());
        };
        let _job = self.wait_group.spawn_guard();

        let max_span = self.config.max_span();
        for domain in self.registry.all_ops() {
            let kind = domain.kind();
            let collation = self.collate_domain(kind, start_tx_num, end_tx_num)?;
            if collation.is_empty() {
                continue;
            }
            let result = domain.build_files(collation, start_tx_num, end_tx_num, max_span);
            match result {
                Ok(shard) => {
                    tracing::debug!(
                        target: "aggstate::build",
                        domain = %kind,
                        start_tx_num = start_tx_num.0,
                        end_tx_num = end_tx_num.0,
                        frozen = shard.frozen,
                        "built shard"
                    );
                    if shard.frozen {
                        self.rebuild_locality(kind)?;
                    }
                }
                Err(e) => {
                    self.background_result.set(clone_agg_error(&e));
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Find and fold the next eligible merge range for each domain.
    /// A no-op if a merge is already in flight.
    pub fn merge_step(&self) -> AggResult<()> {
        if self.is_cancelled() {
            return Err(AggError::Cancelled);
        }
        let Some(_guard) = self.merge_guard.try_acquire() else {
            tracing::debug!(target: "aggstate::merge", "merge already in progress, skipping");
            return Ok(());
        };
        let _job = self.wait_group.spawn_guard();

        let max_span = self.config.max_span();
        for domain in self.registry.all_ops() {
            let shards = domain.shard_set().snapshot();
            let Some(range) = find_merge_range(&shards, max_span) else {
                continue;
            };
            let old = &shards[range.start_index..range.end_index];
            let merged_data = merge_shard_data(old, range.start_tx_num);
            let merged: Arc<Shard> = Arc::new(Shard::new(
                range.start_tx_num,
                range.end_tx_num,
                merged_data,
                max_span,
            ));

            if let Err(e) = domain.integrate_merged_files(old, merged.clone()) {
                self.background_result.set(clone_agg_error(&e));
                return Err(e);
            }
            domain.clean_after_freeze(range.end_tx_num);

            tracing::debug!(
                target: "aggstate::merge",
                domain = %domain.kind(),
                shards_merged = range.len(),
                start_tx_num = range.start_tx_num.0,
                end_tx_num = range.end_tx_num.0,
                "merged shards"
            );

            if merged.frozen {
                self.rebuild_locality(domain.kind())?;
            }
        }
        Ok(())
    }

    /// The oldest txnum that must still be retained in the live DB,
    /// given the writer's current txnum and `keep_in_db`.
    pub fn prune_cutoff(&self) -> TxNum {
        aggstate_storage::prune_cutoff(self.tx_num(), self.config.keep_in_db)
    }

    /// True iff any domain still holds a DB row older than
    /// [`Aggregator::prune_cutoff`] — i.e. `prune_step` would have work
    /// to do.
    pub fn can_prune(&self) -> AggResult<bool> {
        let cutoff = self.prune_cutoff();
        let view = self.db.view()?;
        for kind in DomainKind::ALL {
            if let Some(first_key) = view.first_key(kind.keys_table())? {
                if let Some((tx_num, _)) = split_row_key(&first_key) {
                    if tx_num < cutoff {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    /// Delete every DB row older than [`Aggregator::prune_cutoff`]
    /// across all seven domains' `keys_table()`s — invariant 6: only
    /// live-DB rows are prunable, never integrated shards (those are
    /// retired solely by being superseded in a merge). A no-op if a
    /// prune is already in flight.
    pub fn prune_step(&self) -> AggResult<()> {
        if self.is_cancelled() {
            return Err(AggError::Cancelled);
        }
        let Some(_guard) = self.prune_guard.try_acquire() else {
            tracing::debug!(target: "aggstate::prune", "prune already in progress, skipping");
            return Ok(());
        };
        let _job = self.wait_group.spawn_guard();

        let cutoff = self.prune_cutoff();
        let zero = TxNum::ZERO.to_be_bytes();
        let cutoff_key = cutoff.to_be_bytes();
        let mut tx = self.db.begin_rw()?;
        for kind in DomainKind::ALL {
            tx.delete_range(kind.keys_table(), &zero, &cutoff_key)?;
        }
        tx.commit()?;

        tracing::debug!(
            target: "aggstate::prune",
            cutoff = cutoff.0,
            "pruned DB rows outside the retention window"
        );
        Ok(())
    }

    /// `Unwind`: roll the writer back to `tx_unwind_to`. For each
    /// history domain, finds the earliest recorded previous value at or
    /// after `tx_unwind_to` for every key touched in that range (the
    /// value to restore the caller's external state to), invokes
    /// `load_fn(domain, key, prev_value)` for each, then deletes every
    /// row at or after `tx_unwind_to` across all seven domains and moves
    /// the writer's txnum cursor back to `tx_unwind_to`.
    pub fn unwind(
        &self,
        tx_unwind_to: TxNum,
        mut load_fn: impl FnMut(DomainKind, &[u8], &[u8]),
    ) -> AggResult<()> {
        if self.is_cancelled() {
            return Err(AggError::Cancelled);
        }
        let from_key = tx_unwind_to.to_be_bytes();
        let view = self.db.view()?;

        let mut reverse_state: Vec<(DomainKind, Vec<u8>, Vec<u8>)> = Vec::new();
        for kind in DomainKind::HISTORY {
            let rows = view.range(kind.keys_table(), &from_key, &TX_NUM_UPPER_BOUND)?;
            let mut seen: std::collections::HashSet<Vec<u8>> = std::collections::HashSet::new();
            for (key, value) in rows {
                let Some((_, entity_key)) = split_row_key(&key) else {
                    continue;
                };
                if seen.insert(entity_key.to_vec()) {
                    reverse_state.push((kind, entity_key.to_vec(), value));
                }
            }
        }
        drop(view);

        for (kind, key, prev_value) in &reverse_state {
            load_fn(*kind, key, prev_value);
        }

        let mut tx = self.db.begin_rw()?;
        for kind in DomainKind::ALL {
            tx.delete_range(kind.keys_table(), &from_key, &TX_NUM_UPPER_BOUND)?;
        }
        tx.commit()?;

        self.force_tx_num(tx_unwind_to);
        tracing::debug!(
            target: "aggstate::unwind",
            tx_unwind_to = tx_unwind_to.0,
            keys_restored = reverse_state.len(),
            "unwound writer state"
        );
        Ok(())
    }

    /// Best-effort pre-fault of the host store's pages over
    /// `[tx_from, tx_from + limit)`, so that a query context opened
    /// right after returns without paying cold-cache latency on its
    /// first reads.
    ///
    /// A no-op if `limit` is below [`WARMUP_MIN_LIMIT`] or if a warmup
    /// is already in flight. Advisory only: it takes a snapshot of
    /// `tx_num()` at call time (via `tx_from`, left to the caller to
    /// supply) and never blocks the writer, so a concurrent
    /// `advance_tx_num` may race ahead of the range this call warms.
    pub fn warmup(&self, tx_from: TxNum, limit: u64) -> AggResult<()> {
        if self.is_cancelled() {
            return Err(AggError::Cancelled);
        }
        if limit < WARMUP_MIN_LIMIT {
            tracing::debug!(target: "aggstate::warmup", limit, "below minimum, skipping");
            return Ok(());
        }
        let Some(_guard) = self.warmup_guard.try_acquire() else {
            tracing::debug!(target: "aggstate::warmup", "warmup already in progress, skipping");
            return Ok(());
        };
        let _job = self.wait_group.spawn_guard();

        let to = tx_from.saturating_add(limit);
        let from_key = tx_from.to_be_bytes();
        let to_key = to.to_be_bytes();
        let tx = self.db.view()?;
        for kind in DomainKind::ALL {
            if self.is_cancelled() {
                break;
            }
            match tx.range(kind.keys_table(), &from_key, &to_key) {
                Ok(rows) => {
                    tracing::debug!(
                        target: "aggstate::warmup",
                        domain = %kind,
                        tx_from = tx_from.0,
                        tx_to = to.0,
                        rows = rows.len(),
                        "warmed table"
                    );
                }
                Err(e) => {
                    // Best-effort: log and move on to the next domain
                    // rather than failing the whole warmup pass.
                    tracing::warn!(
                        target: "aggstate::warmup",
                        domain = %kind,
                        error = %e,
                        "warmup read failed"
                    );
                }
            }
        }
        Ok(())
    }

    /// `CleanupDir`: given the locality filenames currently present in
    /// `kind`'s shard directory (as a caller obtains via a directory
    /// scan), return the subset that should be unlinked — every name
    /// but the one with the largest `endStep`. A pure decision function,
    /// like [`aggstate_storage::locality_files_to_remove`] itself: this
    /// aggregator never touches a real filesystem, so the actual unlink
    /// is left to the caller.
    pub fn cleanup_locality_dir(&self, kind: DomainKind, names: &[String]) -> Vec<String> {
        let max_end_step = self.config.steps_in_biggest_file * LOCALITY_INDEX_UINT64_LIMIT as u64;
        aggstate_storage::locality_files_to_remove(kind.base_name(), max_end_step, names)
    }

    fn rebuild_locality(&self, kind: DomainKind) -> AggResult<()> {
        let Some(domain) = self.registry.all_ops().into_iter().find(|d| d.kind() == kind) else {
            return Ok(());
        };
        let frozen = domain.shard_set().frozen_shards();
        if let Some(li) = self.locality.get(&kind) {
            li.rebuild(&frozen)?;
        }
        Ok(())
    }
}

fn clone_agg_error(e: &AggError) -> AggError {
    // AggError doesn't derive Clone (io::Error doesn't implement it);
    // background-result reporting only needs a classifiable stand-in.
    match e {
        AggError::Cancelled => AggError::Cancelled,
        AggError::DbRead { context, .. } => {
            AggError::fatal(format!("db read failed ({context})"))
        }
        AggError::DbWrite { context, .. } => {
            AggError::fatal(format!("db write failed ({context})"))
        }
        AggError::FileBuild { domain, detail } => AggError::FileBuild {
            domain,
            detail: detail.clone(),
        },
        AggError::Integrity { path, detail } => AggError::Integrity {
            path: path.clone(),
            detail: detail.clone(),
        },
        AggError::Inconsistent(s) => AggError::Inconsistent(s.clone()),
        AggError::Fatal(s) => AggError::Fatal(s.clone()),
        AggError::Io(io_err) => AggError::fatal(format!("I/O error: {io_err}")),
    }
}
