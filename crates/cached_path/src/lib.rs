//! `cached_path` — a content-addressed download cache for data-file
//! artifacts, with transparent decompression.
//!
//! Given a URL, [`Cache::download`] returns a local filesystem path to the
//! byte-identical remote content. Repeated downloads of the same URL are
//! served from a shared, process-safe on-disk cache keyed by content hash,
//! so identical payloads served from different URLs are stored only once.
//!
//! [`Cache`] is the single entry point callers are expected to use.

pub mod archive;
pub mod check;
pub mod download;
pub mod error;
pub mod hasher;
pub mod index;
pub mod lock;
pub mod maintenance;
pub mod parallel;
pub mod paths;
pub mod reader;
pub mod tempreg;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;

pub use download::{download, DownloadOptions, NoopReporter, ProgressReporter, TracingReporter};
pub use error::{CacheError, Result};
pub use maintenance::ClearTarget;
pub use parallel::{download_all, BatchItem};
pub use reader::{
    open_path as open_reader, resolve_preferred_encoding, Codec, DecompressingReader, TextEncoding,
};

/// Runtime-tunable configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Explicit cache directory; `None` resolves via [`paths::default_cache_dir`].
    pub cache_dir: Option<PathBuf>,
    /// Per-source network timeout, in seconds.
    pub timeout_secs: u64,
    /// Block size used by the hasher.
    pub hash_block_size: usize,
    /// Block size used when streaming a download.
    pub download_block_size: usize,
    /// Number of attempts to acquire the cache lock before failing.
    pub lock_attempts: u32,
    /// Whether uncached download temp files are deleted when the owning
    /// [`Cache`] is dropped.
    pub delete_temp_downloads_at_exit: bool,
    /// The encoding label (e.g. `"UTF-8"`, `"windows-1252"`) used by
    /// [`Cache::open`] when the caller asks for [`TextEncoding::Preferred`]
    /// instead of naming one explicitly. Stands in for "the platform's
    /// preferred encoding" in a server/CLI context where no locale-derived
    /// default is meaningful; defaults to `"UTF-8"`.
    pub preferred_encoding: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            timeout_secs: 10,
            hash_block_size: hasher::DEFAULT_BLOCK_SIZE,
            download_block_size: hasher::DEFAULT_BLOCK_SIZE,
            lock_attempts: lock::DEFAULT_LOCK_ATTEMPTS,
            delete_temp_downloads_at_exit: true,
            preferred_encoding: "UTF-8".to_string(),
        }
    }
}

/// The cache facade: owns a resolved configuration, an HTTP client, and
/// per-URL coalescing state.
///
/// Cloning a [`Cache`] is cheap (it's a thin handle around an `Arc`'d
/// inner); all clones share the same in-flight coalescing map.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    cache_root: PathBuf,
    config: CacheConfig,
    client: reqwest::blocking::Client,
    /// Coalesces concurrent downloads of the same URL within this process.
    /// This is a performance optimization, not a correctness requirement:
    /// redundant concurrent fetches of the same URL are tolerated as long
    /// as they converge to one blob/one index entry, which the
    /// lock-protected atomic promotion in [`download::download`] already
    /// guarantees on its own.
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl Cache {
    /// Builds a cache rooted at the default OS cache directory.
    pub fn new() -> Result<Self> {
        Self::with_config(CacheConfig::default())
    }

    /// Builds a cache with an explicit configuration.
    pub fn with_config(config: CacheConfig) -> Result<Self> {
        let cache_root = paths::cache_root(config.cache_dir.as_deref())?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CacheError::ArgumentError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            inner: Arc::new(CacheInner {
                cache_root,
                config,
                client,
                in_flight: DashMap::new(),
            }),
        })
    }

    /// The resolved, version-namespaced cache root directory.
    pub fn cache_root(&self) -> &Path {
        &self.inner.cache_root
    }

    /// Fetches `url`, coalescing concurrent calls for the same URL within
    /// this process.
    pub fn download(&self, url: &str) -> Result<PathBuf> {
        self.download_with(DownloadOptions::new(url))
    }

    /// Fetches with full control over [`DownloadOptions`] (sources,
    /// `update_cache`, timeout override, progress reporter).
    pub fn download_with(&self, options: DownloadOptions<'_>) -> Result<PathBuf> {
        let guard = self
            .inner
            .in_flight
            .entry(options.remote_url.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _held = guard.lock();
        download(&self.inner.client, &self.inner.cache_root, options)
    }

    /// Fetches a batch of URLs in parallel. See [`parallel::download_all`].
    pub fn download_all(&self, items: &[BatchItem<'_>], cache: bool) -> Result<Vec<PathBuf>> {
        download_all(
            &self.inner.client,
            &self.inner.cache_root,
            items,
            cache,
            Duration::from_secs(self.inner.config.timeout_secs),
        )
    }

    /// Clears part or all of the cache.
    pub fn clear(&self, target: ClearTarget<'_>) -> Result<()> {
        maintenance::clear(&self.inner.cache_root, target)
    }

    /// Exports a snapshot of the cache as a ZIP archive.
    pub fn export(&self, archive_path: &Path, urls: Option<&[String]>) -> Result<()> {
        archive::export(&self.inner.client, &self.inner.cache_root, archive_path, urls)
    }

    /// Imports a snapshot previously produced by [`Cache::export`].
    pub fn import(
        &self,
        archive_path: &Path,
        urls: Option<&[String]>,
        update_cache: bool,
    ) -> Result<()> {
        archive::import(&self.inner.cache_root, archive_path, urls, update_cache)
    }

    /// Runs the consistency checker.
    pub fn check(&self, verify_hashes: bool) -> Result<check::CheckReport> {
        check::check(&self.inner.cache_root, verify_hashes)
    }

    /// Opens a path already known to be in (or outside) the cache through
    /// the decompressing reader. [`TextEncoding::Preferred`] resolves
    /// against `CacheConfig::preferred_encoding`.
    pub fn open(&self, path: &Path, text: Option<TextEncoding>) -> Result<DecompressingReader> {
        let preferred = reader::resolve_preferred_encoding(&self.inner.config.preferred_encoding);
        reader::open_path(path, text, preferred)
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        if self.inner.config.delete_temp_downloads_at_exit && Arc::strong_count(&self.inner) == 1 {
            tempreg::drain();
        }
    }
}

/// The outcome of resolving a package-relative resource name: either it
/// already lives on disk, or a remote fetch is needed to produce it.
pub enum PackageDataOutcome {
    /// The resource was found directly in the source tree.
    Local(PathBuf),
    /// The resource was not found locally; these are the arguments the
    /// caller should pass to [`Cache::download_with`] to fetch it.
    Remote {
        /// The URL to fetch.
        url: String,
        /// Fallback mirror(s) to try if `url` fails.
        sources: Vec<String>,
    },
}

/// Resolves a package-relative resource name to either a local path or a
/// cache-backed URL.
///
/// Resolution of package-relative resource paths is a concern of the
/// surrounding data-access library, not of this crate; this trait
/// specifies only the contract that library is expected to implement and
/// hand to the cache. There is no default implementation. Names starting
/// with `hash/<digest>` bypass path resolution entirely and look up by
/// blob hash directly.
pub trait PackageDataResolver {
    /// Resolves `name` (optionally scoped to `package`) to a local path or
    /// a remote fetch plan.
    fn resolve(&self, name: &str, package: Option<&str>) -> PackageDataOutcome;
}
