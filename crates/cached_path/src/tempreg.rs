//! Process-wide registry of uncached download temp files.
//!
//! A mutex-guarded list, drained best-effort at process shutdown.
//! Intentionally process-local: there is no cross-process coordination
//! here, only a courtesy cleanup for temp files this process created.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

static REGISTRY: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());

/// Registers `path` for best-effort deletion at process exit.
///
/// Called by the download engine whenever a download completes without
/// caching (`cache=false`, or the cache was unavailable).
pub fn register(path: impl Into<PathBuf>) {
    REGISTRY.lock().unwrap().push(path.into());
}

/// Drains the registry, unlinking every registered path. Missing or busy
/// files are ignored; this is best-effort cleanup, not a guarantee.
///
/// Exposed publicly so a `cached_path`-using binary can call it from its
/// own shutdown path (Rust has no reliable process-exit hook); `Cache`'s
/// `Drop` impl also calls it so the common case — a `Cache` going out of
/// scope — cleans up automatically.
pub fn drain() {
    let mut paths = REGISTRY.lock().unwrap();
    for path in paths.drain(..) {
        let _ = fs_err::remove_file(&path);
    }
}

/// Returns `true` if `path` is currently registered (test helper).
#[cfg(test)]
pub fn is_registered(path: &Path) -> bool {
    REGISTRY.lock().unwrap().iter().any(|p| p == path)
}
