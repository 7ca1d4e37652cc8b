//! The persistent URL → blob-path index.
//!
//! The index backend is an implementation detail; callers only need the
//! consistency checker to be able to filter out its own backing file by
//! name. This implementation stores it as a single `index.json` file in
//! the cache root, written atomically (temp file + rename) under the
//! cache lock.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::lock::{CacheLock, DEFAULT_LOCK_ATTEMPTS};

/// Name of the index's on-disk backing file, inside the cache root.
///
/// Exposed so the consistency checker can exclude it from the stray file
/// scan.
pub const INDEX_FILE_NAME: &str = "index.json";

/// An in-memory snapshot of the index. Not authoritative once returned from
/// [`read`] — a snapshot may be stale the moment another process mutates
/// the index under lock.
pub type IndexSnapshot = HashMap<String, PathBuf>;

#[derive(Default, Serialize, Deserialize)]
struct OnDisk {
    #[serde(flatten)]
    entries: IndexSnapshot,
}

fn index_path(cache_root: &Path) -> PathBuf {
    cache_root.join(INDEX_FILE_NAME)
}

/// Loads the index without acquiring the lock. Callers must already hold
/// [`crate::lock::CacheLock`] over `cache_root` (used by the consistency
/// checker, which holds a single lock across its whole scan).
pub(crate) fn load(cache_root: &Path) -> Result<IndexSnapshot> {
    let path = index_path(cache_root);
    match fs_err::read(&path) {
        Ok(bytes) if !bytes.is_empty() => {
            let on_disk: OnDisk = serde_json::from_slice(&bytes).unwrap_or_default();
            Ok(on_disk.entries)
        }
        Ok(_) => Ok(IndexSnapshot::new()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(IndexSnapshot::new()),
        Err(e) => Err(e.into()),
    }
}

fn store(cache_root: &Path, entries: &IndexSnapshot) -> Result<()> {
    let on_disk = OnDisk {
        entries: entries.clone(),
    };
    let bytes = serde_json::to_vec_pretty(&on_disk)
        .expect("HashMap<String, PathBuf> always serializes");

    let mut tmp = tempfile::NamedTempFile::new_in(cache_root)?;
    tmp.write_all(&bytes)?;
    tmp.persist(index_path(cache_root))
        .map_err(|e| e.error)?;
    Ok(())
}

/// **Read mode**: take the lock, read into an in-memory snapshot, release
/// the lock, yield the snapshot.
pub fn read(cache_root: &Path, lock_attempts: u32) -> Result<IndexSnapshot> {
    let _lock = CacheLock::acquire(cache_root, lock_attempts)?;
    load(cache_root)
}

/// **Write mode**: take the lock, call `f` with a live mutable handle,
/// persist whatever `f` left behind, release the lock on return
/// (including on error, so partial mutations are still flushed).
pub fn write<T>(
    cache_root: &Path,
    lock_attempts: u32,
    f: impl FnOnce(&mut IndexSnapshot) -> Result<T>,
) -> Result<T> {
    let _lock = CacheLock::acquire(cache_root, lock_attempts)?;
    let mut entries = load(cache_root)?;
    let result = f(&mut entries);
    store(cache_root, &entries)?;
    result
}

/// Convenience: acquire the lock with the default attempt count.
pub fn read_default(cache_root: &Path) -> Result<IndexSnapshot> {
    read(cache_root, DEFAULT_LOCK_ATTEMPTS)
}
