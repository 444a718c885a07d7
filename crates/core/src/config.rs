//! Run-wide aggregator configuration.

use std::path::PathBuf;

/// `StepsInBiggestFile` (B): the maximum merge fan-in. A "frozen" shard
/// covers `B * aggregationStep` txnums. The reference configuration
/// uses 64; smaller values (e.g. the worked examples' `B = 2`) are
/// configured per run via [`AggregatorConfig::with_steps_in_biggest_file`].
pub const STEPS_IN_BIGGEST_FILE: u64 = 64;

/// Maximum number of `u64` bitmap chunks a locality index entry may hold,
/// bounding the number of frozen shards indexable per domain to
/// `STEPS_IN_BIGGEST_FILE * LOCALITY_INDEX_UINT64_LIMIT` (2048 with the
/// default configuration).
pub const LOCALITY_INDEX_UINT64_LIMIT: usize = 32;

/// Advisory read-ahead hints, propagated to every domain. These never
/// change correctness, only I/O scheduling hints a real backend may act
/// on; the in-memory reference backend ignores them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadAheadMode {
    /// No read-ahead hinting.
    #[default]
    Disabled,
    /// Generic sequential read-ahead.
    Enabled,
    /// `MADV_WILLNEED`-style hint: the range will be read soon.
    MadvWillNeed,
    /// `MADV_NORMAL`-style hint: no special access pattern.
    MadvNormal,
}

/// Run-wide tunables for the aggregator.
///
/// `aggregation_step` and `keep_in_db` bound the shard granularity and
/// the pruning safety margin; the rest are advisory or resource knobs.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// `S`: txnums per shard at the finest granularity. Immutable for
    /// the lifetime of a run.
    pub aggregation_step: u64,
    /// Txnum window of recent data that must never be pruned from the
    /// live DB. Defaults to `2 * aggregation_step`; set to 0 when
    /// re-executing purely from snapshots (no re-org can happen).
    pub keep_in_db: u64,
    /// Per-domain worker budget for file compression/build.
    pub compress_workers: usize,
    /// Scratch directory for ETL-style spill files during collation.
    pub tmpdir: PathBuf,
    /// Prefix applied to every log line emitted by this aggregator
    /// instance (useful when multiple instances share a process).
    pub log_prefix: String,
    /// Advisory read-ahead mode, propagated to every domain.
    pub read_ahead: ReadAheadMode,
    /// `B`: the maximum merge fan-in, i.e. how many `aggregation_step`
    /// units fit in one frozen shard. Defaults to
    /// [`STEPS_IN_BIGGEST_FILE`]; override via
    /// [`AggregatorConfig::with_steps_in_biggest_file`] for runs that
    /// need a smaller frozen-shard span (e.g. the worked examples' `B =
    /// 2`).
    pub steps_in_biggest_file: u64,
}

impl AggregatorConfig {
    /// Build a config with the given aggregation step and the
    /// conventional `keep_in_db = 2 * aggregation_step` default.
    pub fn new(aggregation_step: u64) -> Self {
        AggregatorConfig {
            aggregation_step,
            keep_in_db: 2 * aggregation_step,
            compress_workers: 1,
            tmpdir: std::env::temp_dir(),
            log_prefix: String::new(),
            read_ahead: ReadAheadMode::Disabled,
            steps_in_biggest_file: STEPS_IN_BIGGEST_FILE,
        }
    }

    /// Set `keep_in_db` explicitly (e.g. 0 when replaying purely from
    /// snapshots, where no re-org can invalidate recent history).
    pub fn with_keep_in_db(mut self, keep_in_db: u64) -> Self {
        self.keep_in_db = keep_in_db;
        self
    }

    /// Set the per-domain compress-worker budget.
    pub fn with_compress_workers(mut self, workers: usize) -> Self {
        self.compress_workers = workers.max(1);
        self
    }

    /// Set the ETL scratch directory.
    pub fn with_tmpdir(mut self, tmpdir: impl Into<PathBuf>) -> Self {
        self.tmpdir = tmpdir.into();
        self
    }

    /// Set the log-line prefix.
    pub fn with_log_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.log_prefix = prefix.into();
        self
    }

    /// Enable sequential read-ahead hints.
    pub fn enable_read_ahead(mut self) -> Self {
        self.read_ahead = ReadAheadMode::Enabled;
        self
    }

    /// Disable read-ahead hints.
    pub fn disable_read_ahead(mut self) -> Self {
        self.read_ahead = ReadAheadMode::Disabled;
        self
    }

    /// Enable `MADV_WILLNEED`-style hinting.
    pub fn enable_madv_will_need(mut self) -> Self {
        self.read_ahead = ReadAheadMode::MadvWillNeed;
        self
    }

    /// Enable `MADV_NORMAL`-style hinting.
    pub fn enable_madv_normal(mut self) -> Self {
        self.read_ahead = ReadAheadMode::MadvNormal;
        self
    }

    /// Override `B`, the maximum merge fan-in.
    pub fn with_steps_in_biggest_file(mut self, steps_in_biggest_file: u64) -> Self {
        self.steps_in_biggest_file = steps_in_biggest_file;
        self
    }

    /// The maximum span, in txnums, of a frozen shard: `B * S`.
    pub fn max_span(&self) -> u64 {
        self.steps_in_biggest_file * self.aggregation_step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_keep_in_db_is_two_steps() {
        let cfg = AggregatorConfig::new(4);
        assert_eq!(cfg.keep_in_db, 8);
    }

    #[test]
    fn max_span_is_b_times_s() {
        let cfg = AggregatorConfig::new(4);
        assert_eq!(cfg.max_span(), STEPS_IN_BIGGEST_FILE * 4);
    }

    #[test]
    fn steps_in_biggest_file_override_changes_max_span() {
        let cfg = AggregatorConfig::new(4).with_steps_in_biggest_file(2);
        assert_eq!(cfg.max_span(), 8);
    }

    #[test]
    fn builder_overrides_apply() {
        let cfg = AggregatorConfig::new(4)
            .with_keep_in_db(0)
            .with_compress_workers(0)
            .enable_madv_will_need();
        assert_eq!(cfg.keep_in_db, 0);
        assert_eq!(cfg.compress_workers, 1, "compress_workers floors at 1");
        assert_eq!(cfg.read_ahead, ReadAheadMode::MadvWillNeed);
    }
}
