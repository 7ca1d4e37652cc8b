//! Cache root resolution and free-space probing.

use std::path::{Path, PathBuf};

use crate::error::{CacheError, Result};

/// Environment variable that overrides the cache root.
pub const CACHE_DIR_ENV_VAR: &str = "CACHED_PATH_CACHE_DIR";

/// Major version of this crate, used to namespace the cache directory so
/// that incompatible on-disk layouts can never collide.
const CACHE_LAYOUT_VERSION: &str = env!("CARGO_PKG_VERSION_MAJOR");

/// Determines the default cache directory.
///
/// Checks [`CACHE_DIR_ENV_VAR`] first; otherwise falls back to
/// `dirs::cache_dir()/cached-path`.
pub fn default_cache_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(CACHE_DIR_ENV_VAR) {
        return Ok(PathBuf::from(dir));
    }
    dirs::cache_dir()
        .map(|mut p| {
            p.push("cached-path");
            p
        })
        .ok_or_else(|| {
            CacheError::ArgumentError(
                "could not determine cache directory for current platform".to_string(),
            )
        })
}

/// Resolves the version-namespaced cache root, creating it if it does not
/// yet exist.
///
/// Fails with [`CacheError::ArgumentError`] if the location exists but is
/// not a directory.
pub fn cache_root(base: Option<&Path>) -> Result<PathBuf> {
    let base = match base {
        Some(p) => p.to_path_buf(),
        None => default_cache_dir()?,
    };
    let root = base.join(format!("v{CACHE_LAYOUT_VERSION}"));
    ensure_dir(&root)?;
    Ok(root)
}

/// Checks that `path` is usable as a cache directory, creating it if it
/// does not yet exist.
///
/// Fails with [`CacheError::ArgumentError`] if `path` exists but is not a
/// directory. Unlike [`cache_root`], this does not append a
/// version-namespace component — callers that already hold an already
/// version-namespaced root (such as the download engine, re-checking
/// availability on every call) must probe that exact path, not a nested
/// `<path>/v<major>` underneath it.
pub fn ensure_dir(path: &Path) -> Result<()> {
    match fs_err::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(CacheError::ArgumentError(format!(
            "cache root '{}' exists but is not a directory",
            path.display()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            fs_err::create_dir_all(path)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Returns the number of bytes available on the filesystem containing
/// `path`. `path` need not itself exist; its closest existing ancestor is
/// probed.
pub fn free_bytes(path: &Path) -> Result<u64> {
    let mut probe = path;
    loop {
        match fs2::available_space(probe) {
            Ok(bytes) => return Ok(bytes),
            Err(_) => match probe.parent() {
                Some(parent) => probe = parent,
                None => {
                    return Err(CacheError::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "no existing ancestor to probe for free space",
                    )))
                }
            },
        }
    }
}

/// Fails with [`CacheError::InsufficientSpace`] if fewer than `n` bytes are
/// free on the filesystem containing `path`.
pub fn require_free(path: &Path, n: u64) -> Result<()> {
    let available = free_bytes(path)?;
    if available < n {
        return Err(CacheError::InsufficientSpace {
            path: path.to_path_buf(),
            needed: n,
            available,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_root_appends_version_namespace_once() {
        let base = tempfile::tempdir().unwrap();
        let root = cache_root(Some(base.path())).unwrap();
        assert_eq!(root, base.path().join(format!("v{CACHE_LAYOUT_VERSION}")));
        assert!(root.is_dir());
    }

    #[test]
    fn ensure_dir_does_not_nest_another_version_component() {
        let base = tempfile::tempdir().unwrap();
        let root = cache_root(Some(base.path())).unwrap();

        // Re-probing an already-resolved root (what the download engine's
        // availability check does on every call) must not create a nested
        // `<root>/v<major>` directory underneath it.
        ensure_dir(&root).unwrap();
        assert!(!root.join(format!("v{CACHE_LAYOUT_VERSION}")).exists());
    }

    #[test]
    fn ensure_dir_rejects_a_non_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("not-a-dir");
        fs_err::write(&file_path, b"x").unwrap();

        let result = ensure_dir(&file_path);
        assert_matches::assert_matches!(result, Err(CacheError::ArgumentError(_)));
    }
}
