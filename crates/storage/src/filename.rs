//! Filesystem layout: one flat directory of `<base>.<sstep>-<estep>.<ext>`
//! shard files plus one `<base>.0-<estep>.{li,l}` locality pair per
//! domain.

use aggstate_core::error::AggError;
use std::path::{Path, PathBuf};

/// File extension for inverted-index shard data.
pub const EXT_INVERTED_INDEX_DATA: &str = "ef";
/// File extension for inverted-index shard index.
pub const EXT_INVERTED_INDEX_IDX: &str = "efi";
/// File extension for history shard data.
pub const EXT_HISTORY_DATA: &str = "v";
/// File extension for history shard index.
pub const EXT_HISTORY_IDX: &str = "vi";
/// File extension for the locality perfect-hash file.
pub const EXT_LOCALITY_PHF: &str = "li";
/// File extension for the locality fixed-size-bitmaps file.
pub const EXT_LOCALITY_BITMAPS: &str = "l";

/// Build a shard data/index filename: `<base>.<sstep>-<estep>.<ext>`.
/// Step numbers are not zero-padded.
pub fn shard_filename(base: &str, start_step: u64, end_step: u64, ext: &str) -> String {
    format!("{base}.{start_step}-{end_step}.{ext}")
}

/// Build a locality filename: `<base>.0-<estep>.<ext>`.
pub fn locality_filename(base: &str, end_step: u64, ext: &str) -> String {
    format!("{base}.0-{end_step}.{ext}")
}

/// A parsed `<base>.<sstep>-<estep>.<ext>` filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    /// The domain's base name.
    pub base: String,
    /// Start step (inclusive).
    pub start_step: u64,
    /// End step (exclusive).
    pub end_step: u64,
    /// File extension, without the dot.
    pub ext: String,
}

/// Parse `<base>.<sstep>-<estep>.<ext>`, rejecting malformed names and
/// names with `start_step >= end_step`.
///
/// Equivalent to the discovery regex `^<base>\.(\d+)-(\d+)\.<ext>$`,
/// implemented by hand (no `regex` dependency needed for this
/// three-field, dot/dash-delimited grammar).
pub fn parse_name(name: &str) -> Result<ParsedName, AggError> {
    let mut parts = name.rsplitn(2, '.');
    let ext = parts
        .next()
        .ok_or_else(|| AggError::integrity(name, "missing extension"))?;
    let rest = parts
        .next()
        .ok_or_else(|| AggError::integrity(name, "missing base/range"))?;

    let (base, range) = rest
        .rsplit_once('.')
        .ok_or_else(|| AggError::integrity(name, "missing '.' before step range"))?;

    let (start_s, end_s) = range
        .split_once('-')
        .ok_or_else(|| AggError::integrity(name, "missing '-' in step range"))?;

    let start_step: u64 = start_s
        .parse()
        .map_err(|_| AggError::integrity(name, "non-numeric start step"))?;
    let end_step: u64 = end_s
        .parse()
        .map_err(|_| AggError::integrity(name, "non-numeric end step"))?;

    if start_step >= end_step {
        return Err(AggError::integrity(
            name,
            "start step must be strictly less than end step",
        ));
    }

    Ok(ParsedName {
        base: base.to_string(),
        start_step,
        end_step,
        ext: ext.to_string(),
    })
}

/// Parse a locality filename, additionally requiring `start_step == 0`
/// and `end_step <= max_end_step` (`B * LocalityIndexUint64Limit`).
pub fn parse_locality_name(name: &str, max_end_step: u64) -> Result<ParsedName, AggError> {
    let parsed = parse_name(name)?;
    if parsed.start_step != 0 {
        return Err(AggError::integrity(
            name,
            "locality index filenames must start at step 0",
        ));
    }
    if parsed.end_step > max_end_step {
        return Err(AggError::integrity(
            name,
            format!(
                "locality end step {} exceeds B*LocalityIndexUint64Limit ({})",
                parsed.end_step, max_end_step
            ),
        ));
    }
    Ok(parsed)
}

/// Join a filename onto a shard directory.
pub fn path_in(dir: &Path, filename: &str) -> PathBuf {
    dir.join(filename)
}

/// `CleanupDir`: given the locality filenames currently present in one
/// domain's shard directory (as a caller obtains via a directory scan),
/// parse each with [`parse_locality_name`], keep only the entry with the
/// largest `end_step`, and return the rest — the filenames the caller
/// should unlink.
///
/// Names that don't parse for `base`, or that parse for a different
/// domain's `base`, are skipped rather than surfaced as an error: a
/// shared directory holding more than one domain's files is expected,
/// and a malformed name shouldn't abort cleanup for every other file.
pub fn locality_files_to_remove(base: &str, max_end_step: u64, names: &[String]) -> Vec<String> {
    let mut candidates: Vec<(String, u64)> = Vec::new();
    for name in names {
        match parse_locality_name(name, max_end_step) {
            Ok(parsed) if parsed.base == base => candidates.push((name.clone(), parsed.end_step)),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    target: "aggstate::locality",
                    name = %name,
                    error = %e,
                    "skipping malformed locality filename during cleanup"
                );
            }
        }
    }
    candidates.sort_by_key(|(_, end_step)| *end_step);
    if candidates.len() <= 1 {
        return Vec::new();
    }
    candidates[..candidates.len() - 1]
        .iter()
        .map(|(name, _)| name.clone())
        .collect()
}
