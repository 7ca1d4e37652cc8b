//! Cache maintenance: remove by URL / by hash / entire cache.

use std::path::{Path, PathBuf};

use crate::error::{CacheError, Result};
use crate::index;
use crate::lock::DEFAULT_LOCK_ATTEMPTS;

/// What to remove from the cache. `All` removes the entire cache
/// directory tree; the others remove a single blob and every index entry
/// pointing to it.
pub enum ClearTarget<'a> {
    /// Remove the entire cache directory tree.
    All,
    /// Remove the mapping for a single URL, and its blob if unreferenced.
    Url(&'a str),
    /// Remove by hex digest (or an absolute path inside the cache). Every
    /// URL mapping pointing to this blob is removed along with the blob.
    HashOrPath(&'a str),
}

/// Clears part or all of the cache.
///
/// Failure to acquire the lock degrades to a `tracing::warn!` and a
/// successful no-op return rather than propagating an error: clearing is
/// best-effort maintenance, not a correctness-critical write. All variants
/// succeed silently when the target is absent.
pub fn clear(cache_root: &Path, target: ClearTarget<'_>) -> Result<()> {
    match target {
        ClearTarget::All => clear_all(cache_root),
        ClearTarget::Url(url) => clear_one(cache_root, |entries| {
            entries.remove(url).map(|path| vec![(url.to_string(), path)])
        }),
        ClearTarget::HashOrPath(target) => {
            let target_path = resolve_hash_or_path(cache_root, target)?;
            clear_one(cache_root, move |entries| {
                let matching: Vec<(String, PathBuf)> = entries
                    .iter()
                    .filter(|(_, p)| **p == target_path)
                    .map(|(u, p)| (u.clone(), p.clone()))
                    .collect();
                for (url, _) in &matching {
                    entries.remove(url);
                }
                if matching.is_empty() {
                    None
                } else {
                    Some(matching)
                }
            })
        }
    }
}

fn clear_all(cache_root: &Path) -> Result<()> {
    match fs_err::remove_dir_all(cache_root) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            tracing::warn!(error = %e, "failed to clear cache, leaving it intact");
            Ok(())
        }
    }
}

fn clear_one(
    cache_root: &Path,
    remove: impl FnOnce(&mut index::IndexSnapshot) -> Option<Vec<(String, PathBuf)>>,
) -> Result<()> {
    let removed = match index::write(cache_root, DEFAULT_LOCK_ATTEMPTS, move |entries| {
        Ok(remove(entries))
    }) {
        Ok(removed) => removed,
        Err(e @ CacheError::LockTimeout { .. }) => {
            tracing::warn!(error = %e, "cache unavailable; clear() skipped");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    if let Some(removed) = removed {
        // Re-acquire a snapshot to check remaining references before
        // unlinking blobs (the index write above already dropped our own
        // mappings).
        let snapshot = index::read(cache_root, DEFAULT_LOCK_ATTEMPTS)?;
        let mut seen = std::collections::HashSet::new();
        for (_, path) in removed {
            if seen.insert(path.clone()) && !snapshot.values().any(|p| *p == path) {
                let _ = fs_err::remove_file(&path);
            }
        }
    }
    Ok(())
}

fn resolve_hash_or_path(cache_root: &Path, target: &str) -> Result<PathBuf> {
    let candidate = Path::new(target);
    let path = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        cache_root.join(target)
    };

    let canonical_root = fs_err::canonicalize(cache_root).unwrap_or_else(|_| cache_root.to_path_buf());
    let canonical_path = path
        .parent()
        .map(|p| fs_err::canonicalize(p).unwrap_or_else(|_| p.to_path_buf()))
        .unwrap_or_else(|| canonical_root.clone());

    if canonical_path != canonical_root {
        return Err(CacheError::OutsideCache(path));
    }

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::DEFAULT_LOCK_ATTEMPTS as ATTEMPTS;
    use rstest::rstest;

    fn seed(cache_root: &Path, url: &str, hash: &str, content: &[u8]) {
        fs_err::create_dir_all(cache_root).unwrap();
        fs_err::write(cache_root.join(hash), content).unwrap();
        index::write(cache_root, ATTEMPTS, |e| {
            e.insert(url.to_string(), cache_root.join(hash));
            Ok(())
        })
        .unwrap();
    }

    /// Both ways of naming a single blob — by URL or by hash — remove the
    /// same unreferenced blob and its index entry.
    #[rstest]
    #[case::by_url(ClearTarget::Url("http://x/a"))]
    #[case::by_hash(ClearTarget::HashOrPath("deadbeef"))]
    fn clear_removes_unreferenced_blob(#[case] target: ClearTarget<'_>) {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path(), "http://x/a", "deadbeef", b"payload");

        clear(dir.path(), target).unwrap();

        assert!(!dir.path().join("deadbeef").exists());
        assert!(index::read_default(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn clear_by_url_keeps_blob_referenced_by_other_url() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path(), "http://x/a", "deadbeef", b"payload");
        index::write(dir.path(), ATTEMPTS, |e| {
            e.insert("http://x/b".to_string(), dir.path().join("deadbeef"));
            Ok(())
        })
        .unwrap();

        clear(dir.path(), ClearTarget::Url("http://x/a")).unwrap();

        assert!(dir.path().join("deadbeef").exists());
        let snapshot = index::read_default(dir.path()).unwrap();
        assert!(!snapshot.contains_key("http://x/a"));
        assert!(snapshot.contains_key("http://x/b"));
    }

    #[test]
    fn clear_by_hash_removes_every_referring_url() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path(), "http://x/a", "deadbeef", b"payload");
        index::write(dir.path(), ATTEMPTS, |e| {
            e.insert("http://x/b".to_string(), dir.path().join("deadbeef"));
            Ok(())
        })
        .unwrap();

        clear(dir.path(), ClearTarget::HashOrPath("deadbeef")).unwrap();

        assert!(!dir.path().join("deadbeef").exists());
        assert!(index::read_default(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn clear_by_path_outside_cache_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs_err::create_dir_all(dir.path()).unwrap();
        let outside = tempfile::tempdir().unwrap();
        let outside_file = outside.path().join("evil");
        fs_err::write(&outside_file, b"x").unwrap();

        let result = clear(
            dir.path(),
            ClearTarget::HashOrPath(outside_file.to_str().unwrap()),
        );
        assert_matches::assert_matches!(result, Err(CacheError::OutsideCache(_)));
    }

    #[test]
    fn clear_absent_target_succeeds_silently() {
        let dir = tempfile::tempdir().unwrap();
        fs_err::create_dir_all(dir.path()).unwrap();
        clear(dir.path(), ClearTarget::Url("http://nope")).unwrap();
    }
}
