//! Unified error type for the aggregation engine
//!
//! `AggError` is the single error type returned from every public
//! operation in this workspace. Each variant is built through a named
//! constructor function and can be classified through `is_*` predicate
//! methods, so callers can branch on error category without matching
//! on the full enum.
//!
//! ### Usage
//!
//! ```ignore
//! match result {
//!     Err(e) if e.is_cancelled() => return Ok(()),
//!     Err(e) if e.is_retryable() => { /* retry build */ }
//!     Err(e) => return Err(e),
//!     Ok(v) => { /* ... */ }
//! }
//! ```

use std::io;
use thiserror::Error;

/// Result type alias for aggregator operations.
pub type AggResult<T> = std::result::Result<T, AggError>;

/// Unified error hierarchy for the aggregation engine.
///
/// Variants correspond to the error kinds enumerated by the orchestrator
/// design: cooperative cancellation, DB-read/DB-write propagation,
/// file-build failure, folder-scan integrity violations, cross-domain
/// inconsistency, and a fatal classification for conditions that used to
/// panic in hot paths but are now propagated.
#[derive(Debug, Error)]
pub enum AggError {
    /// Cooperative shutdown requested via a [`crate::kv`]-independent
    /// cancellation token. Never logged as a warning; always unwound
    /// silently by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// A read against the host key-value store failed.
    #[error("db read failed ({context}): {source}")]
    DbRead {
        /// What the caller was trying to read (table/domain name).
        context: String,
        /// Underlying cause.
        #[source]
        source: io::Error,
    },

    /// A write against the host key-value store failed.
    #[error("db write failed ({context}): {source}")]
    DbWrite {
        /// What the caller was trying to write (table/domain name).
        context: String,
        /// Underlying cause.
        #[source]
        source: io::Error,
    },

    /// A collate/build/merge step failed; freshly produced files were
    /// closed and removed, in-memory state is unchanged.
    #[error("file build failed for domain {domain}: {detail}")]
    FileBuild {
        /// Domain the failure occurred in.
        domain: &'static str,
        /// Human-readable detail.
        detail: String,
    },

    /// A shard or locality filename failed to parse, or violated a
    /// step-bound constraint, during a directory scan. Never fatal at
    /// scan time: the offending file is skipped and the scan continues.
    #[error("integrity violation while scanning {path}: {detail}")]
    Integrity {
        /// Path of the offending file.
        path: String,
        /// Human-readable detail.
        detail: String,
    },

    /// Cross-domain mismatch detected, e.g. [`crate`]-level step-count
    /// disagreement at `MakeSteps` time.
    #[error("inconsistent state: {0}")]
    Inconsistent(String),

    /// A condition that the reference design escalates to an
    /// unrecoverable program state (DB cursor failures inside
    /// `LogStats`, perfect-hash lookup failures). Propagated here
    /// rather than panicking; callers that want the old behavior can
    /// match on `is_fatal()` and abort.
    #[error("fatal: {0}")]
    Fatal(String),

    /// Generic I/O failure outside the db read/write paths (e.g.
    /// shard or locality file I/O).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl AggError {
    /// Construct a [`AggError::DbRead`].
    pub fn db_read(context: impl Into<String>, source: io::Error) -> Self {
        AggError::DbRead {
            context: context.into(),
            source,
        }
    }

    /// Construct a [`AggError::DbWrite`].
    pub fn db_write(context: impl Into<String>, source: io::Error) -> Self {
        AggError::DbWrite {
            context: context.into(),
            source,
        }
    }

    /// Construct a [`AggError::FileBuild`].
    pub fn file_build(domain: &'static str, detail: impl Into<String>) -> Self {
        AggError::FileBuild {
            domain,
            detail: detail.into(),
        }
    }

    /// Construct a [`AggError::Integrity`].
    pub fn integrity(path: impl Into<String>, detail: impl Into<String>) -> Self {
        AggError::Integrity {
            path: path.into(),
            detail: detail.into(),
        }
    }

    /// Construct a [`AggError::Inconsistent`].
    pub fn inconsistent(detail: impl Into<String>) -> Self {
        AggError::Inconsistent(detail.into())
    }

    /// Construct a [`AggError::Fatal`].
    pub fn fatal(detail: impl Into<String>) -> Self {
        AggError::Fatal(detail.into())
    }

    /// True iff this error represents cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AggError::Cancelled)
    }

    /// True iff the operation that produced this error may succeed if
    /// retried unchanged (transient DB or I/O failures).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AggError::DbRead { .. } | AggError::DbWrite { .. } | AggError::Io(_)
        )
    }

    /// True iff this error should be treated as an unrecoverable
    /// program state by a caller that wants the reference design's
    /// panic-on-these-paths behavior.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AggError::Fatal(_))
    }

    /// True iff this error came from a file-build step (collate/build/merge).
    pub fn is_file_build(&self) -> bool {
        matches!(self, AggError::FileBuild { .. })
    }

    /// True iff this error is a non-fatal integrity issue found while
    /// scanning a directory (caller should skip the file and continue).
    pub fn is_integrity(&self) -> bool {
        matches!(self, AggError::Integrity { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_cancelled_and_not_retryable() {
        let e = AggError::Cancelled;
        assert!(e.is_cancelled());
        assert!(!e.is_retryable());
        assert!(!e.is_fatal());
    }

    #[test]
    fn db_read_is_retryable() {
        let e = AggError::db_read("accounts", io::Error::new(io::ErrorKind::Other, "boom"));
        assert!(e.is_retryable());
        assert!(!e.is_cancelled());
        let msg = e.to_string();
        assert!(msg.contains("accounts"));
    }

    #[test]
    fn file_build_carries_domain_name() {
        let e = AggError::file_build("storage", "collation overflow");
        assert!(e.is_file_build());
        assert!(e.to_string().contains("storage"));
        assert!(e.to_string().contains("collation overflow"));
    }

    #[test]
    fn integrity_is_not_retryable_or_fatal() {
        let e = AggError::integrity("accounts.5-9.ef", "bad step bound");
        assert!(e.is_integrity());
        assert!(!e.is_retryable());
        assert!(!e.is_fatal());
    }

    #[test]
    fn fatal_classification() {
        let e = AggError::fatal("locality phf lookup corrupted");
        assert!(e.is_fatal());
        assert!(!e.is_retryable());
    }

    #[test]
    fn io_error_converts_via_from() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let e: AggError = io_err.into();
        assert!(e.is_retryable());
    }
}
