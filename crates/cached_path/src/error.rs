//! The error surface of the cache.

use std::path::PathBuf;

/// Errors returned from the cache's public API.
///
/// There is deliberately no "cache unavailable" variant here: an
/// unavailable cache root is a warning plus a downgraded operation
/// (logged via `tracing::warn!`), never an `Err`. See
/// [`crate::download::download`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CacheError {
    /// No source in a download's `sources` list could be fetched.
    #[error("failed to fetch from any of {attempted} source(s); first error: {source}")]
    AllSourcesFailed {
        /// Number of sources that were attempted.
        attempted: usize,
        /// The error from the first attempted source.
        #[source]
        source: Box<CacheError>,
    },

    /// A network-level failure for a single source (timeout, connection
    /// refused, non-success status, ...).
    #[error("network error fetching '{url}'")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// Caller supplied an invalid combination of arguments.
    #[error("{0}")]
    ArgumentError(String),

    /// A path given to a cache-maintenance operation resolved outside the
    /// cache root.
    #[error("path '{0}' is not inside the cache directory")]
    OutsideCache(PathBuf),

    /// The exclusive cache lock could not be acquired within the configured
    /// number of attempts.
    #[error("timed out after {attempts} attempt(s) waiting {waited:?} for cache lock{}", holder.map(|pid| format!(" held by pid {pid}")).unwrap_or_default())]
    LockTimeout {
        /// Number of attempts made.
        attempts: u32,
        /// Total time spent waiting.
        waited: std::time::Duration,
        /// The PID of the lock holder, if its PID file was readable.
        holder: Option<u32>,
    },

    /// The `lock/` directory was missing during a consistency check; its
    /// absence is itself an integrity error.
    #[error("cache lock directory is missing")]
    LockMissing,

    /// An index entry's path does not exist on disk.
    #[error("dangling reference: '{url}' maps to missing path '{}'", path.display())]
    DanglingReference {
        /// The URL with the dangling mapping.
        url: String,
        /// The path it (no longer) points to.
        path: PathBuf,
    },

    /// An index entry's path exists but is not directly inside the cache
    /// root.
    #[error("misplaced blob: '{url}' maps to '{}' which is outside the cache root", path.display())]
    MisplacedBlob {
        /// The URL with the misplaced mapping.
        url: String,
        /// The path it points to.
        path: PathBuf,
    },

    /// A blob's content hash does not match its filename.
    #[error("hash mismatch for '{}': filename claims {expected} but content hashes to {actual}", path.display())]
    HashMismatch {
        /// The blob's path.
        path: PathBuf,
        /// The hash encoded in the filename.
        expected: String,
        /// The hash recomputed from content.
        actual: String,
    },

    /// An archive did not have the expected `index.json` / `cache/<digest>`
    /// layout, or an imported blob's recomputed hash disagreed with its
    /// claimed digest.
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    /// The compression format detected by magic-byte sniffing failed to
    /// decode (a truncated or corrupt archive, most commonly).
    #[error("unsupported compression format: {0}")]
    UnsupportedCompression(String),

    /// Not enough free space to safely stream a download.
    #[error("insufficient free space at '{}': need {needed} bytes, have {available}", path.display())]
    InsufficientSpace {
        /// The directory that was checked.
        path: PathBuf,
        /// Bytes required.
        needed: u64,
        /// Bytes available.
        available: u64,
    },

    /// Wraps an I/O failure that doesn't fit a more specific variant.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CacheError>;
