//! Reuse of already-published artifacts.

use std::fmt;
use std::path::Path;

use crate::storage::Storage;

/// What the materializer decided to do for a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheDecision {
    /// The output was (re)computed by this call.
    Recompute,
    /// The output already existed and was reused.
    SkipCacheHit,
    /// Another worker holds the lock for this output.
    SkipLocked,
}

impl fmt::Display for CacheDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Recompute => "computed",
            Self::SkipCacheHit => "cache hit",
            Self::SkipLocked => "locked",
        };
        f.write_str(label)
    }
}

/// Returns true iff `output` already exists as a file and recomputation was
/// not forced. Consulted before any locking, so cache hits cost no contention.
pub fn should_skip<S: Storage + ?Sized>(storage: &S, output: &Path, force_overwrite: bool) -> bool {
    !force_overwrite && storage.is_file(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_should_skip() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("train").join("0.parquet");

        assert!(!should_skip(&LocalStorage, &output, false));

        fs::create_dir_all(output.parent().unwrap()).unwrap();
        fs::write(&output, "data").unwrap();
        assert!(should_skip(&LocalStorage, &output, false));
        assert!(!should_skip(&LocalStorage, &output, true));
    }

    #[test]
    fn test_directory_is_not_a_cache_hit() {
        let dir = TempDir::new().unwrap();
        assert!(!should_skip(&LocalStorage, dir.path(), false));
    }

    #[test]
    fn test_decision_display() {
        assert_eq!(CacheDecision::Recompute.to_string(), "computed");
        assert_eq!(CacheDecision::SkipCacheHit.to_string(), "cache hit");
        assert_eq!(CacheDecision::SkipLocked.to_string(), "locked");
    }
}
