//! The consistency checker.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{CacheError, Result};
use crate::hasher::DEFAULT_BLOCK_SIZE;
use crate::index::{self, INDEX_FILE_NAME};
use crate::lock::DEFAULT_LOCK_ATTEMPTS;

/// The outcome of [`check`]: any integrity errors found, plus the set of
/// stray files.
#[derive(Debug, Default)]
pub struct CheckReport {
    /// Files present in the cache root that the index does not reference
    /// and that are not the index's own backing storage or lock
    /// directory.
    pub strays: Vec<PathBuf>,
}

/// Walks the cache root and reports integrity errors and stray files.
///
/// Acquires the write lock for the duration of the check so that no other
/// process mutates the cache while it runs. Returns the first integrity
/// error encountered (`DanglingReference`, `MisplacedBlob`, `HashMismatch`,
/// `LockMissing`), or a [`CheckReport`] listing strays if everything else
/// is consistent.
pub fn check(cache_root: &Path, verify_hashes: bool) -> Result<CheckReport> {
    use crate::lock::CacheLock;
    let lock = CacheLock::acquire(cache_root, DEFAULT_LOCK_ATTEMPTS)?;

    if !cache_root.join("lock").is_dir() {
        // Should be unreachable: we just created it above. Kept as an
        // explicit check since the lock directory's absence is reported
        // as an error in its own right, not merely an implementation
        // detail of acquiring it.
        return Err(CacheError::LockMissing);
    }

    let mut on_disk = HashSet::new();
    for entry in fs_err::read_dir(cache_root)? {
        let entry = entry?;
        let name = entry.file_name();
        if name == "lock" || name == INDEX_FILE_NAME {
            continue;
        }
        if entry.file_type()?.is_file() {
            on_disk.insert(entry.path());
        }
    }

    let entries = index::load(cache_root)?;
    let canonical_root = fs_err::canonicalize(cache_root).unwrap_or_else(|_| cache_root.to_path_buf());

    for (url, path) in &entries {
        if !path.exists() {
            return Err(CacheError::DanglingReference {
                url: url.clone(),
                path: path.clone(),
            });
        }
        let parent = path
            .parent()
            .map(|p| fs_err::canonicalize(p).unwrap_or_else(|_| p.to_path_buf()));
        if parent.as_deref() != Some(canonical_root.as_path()) {
            return Err(CacheError::MisplacedBlob {
                url: url.clone(),
                path: path.clone(),
            });
        }
        on_disk.remove(path);

        if verify_hashes {
            let expected = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            let actual = crate::hasher::hash_file(path, DEFAULT_BLOCK_SIZE)?;
            if actual != expected {
                return Err(CacheError::HashMismatch {
                    path: path.clone(),
                    expected,
                    actual,
                });
            }
        }
    }

    drop(lock);
    Ok(CheckReport {
        strays: on_disk.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::DEFAULT_LOCK_ATTEMPTS as ATTEMPTS;

    #[test]
    fn clean_cache_has_no_strays_and_no_errors() {
        let dir = tempfile::tempdir().unwrap();
        fs_err::create_dir_all(dir.path()).unwrap();
        fs_err::write(dir.path().join("deadbeef"), b"payload").unwrap();
        index::write(dir.path(), ATTEMPTS, |e| {
            e.insert("http://x/a".to_string(), dir.path().join("deadbeef"));
            Ok(())
        })
        .unwrap();

        let report = check(dir.path(), false).unwrap();
        assert!(report.strays.is_empty());
    }

    #[test]
    fn unreferenced_file_is_a_stray() {
        let dir = tempfile::tempdir().unwrap();
        fs_err::create_dir_all(dir.path()).unwrap();
        fs_err::write(dir.path().join("orphan"), b"x").unwrap();

        let report = check(dir.path(), false).unwrap();
        assert_eq!(report.strays, vec![dir.path().join("orphan")]);
    }

    #[test]
    fn dangling_reference_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs_err::create_dir_all(dir.path()).unwrap();
        index::write(dir.path(), ATTEMPTS, |e| {
            e.insert("http://x/a".to_string(), dir.path().join("missing-blob"));
            Ok(())
        })
        .unwrap();

        let result = check(dir.path(), false);
        assert_matches::assert_matches!(result, Err(CacheError::DanglingReference { .. }));
    }

    #[test]
    fn hash_mismatch_is_reported_when_requested() {
        let dir = tempfile::tempdir().unwrap();
        fs_err::create_dir_all(dir.path()).unwrap();
        fs_err::write(dir.path().join("deadbeef"), b"tampered content").unwrap();
        index::write(dir.path(), ATTEMPTS, |e| {
            e.insert("http://x/a".to_string(), dir.path().join("deadbeef"));
            Ok(())
        })
        .unwrap();

        let result = check(dir.path(), true);
        assert_matches::assert_matches!(result, Err(CacheError::HashMismatch { .. }));
    }
}
