//! The download engine: fetch one URL with timeout, multi-source fallback,
//! streaming to a temp file, hashing, and atomic promotion into the cache.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use crate::error::{CacheError, Result};
use crate::hasher::{HashingWriter, DEFAULT_BLOCK_SIZE};
use crate::{index, lock::DEFAULT_LOCK_ATTEMPTS, paths, tempreg};

/// Reports progress for a single download. Rendering (progress bars) is left
/// to callers; this crate only calls the trait's methods.
pub trait ProgressReporter: Send + Sync {
    /// Called once the total size is known (if the server sent
    /// `Content-Length`).
    fn on_start(&self, total_bytes: Option<u64>) {
        let _ = total_bytes;
    }
    /// Called after each block is written.
    fn on_progress(&self, downloaded_bytes: u64) {
        let _ = downloaded_bytes;
    }
    /// Called when the download finishes (success or failure).
    fn on_finish(&self) {}
}

/// A reporter that does nothing; used when `show_progress` is `false`.
pub struct NoopReporter;
impl ProgressReporter for NoopReporter {}

/// A reporter that logs progress via `tracing::debug!`, used when
/// `show_progress` is `true` and the caller supplies no reporter of their
/// own. Rendering an actual progress bar is left to callers (e.g. the CLI).
pub struct TracingReporter {
    url: String,
}

impl TracingReporter {
    /// Creates a reporter that tags its log lines with `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl ProgressReporter for TracingReporter {
    fn on_start(&self, total_bytes: Option<u64>) {
        tracing::debug!(url = %self.url, total_bytes, "download starting");
    }
    fn on_progress(&self, downloaded_bytes: u64) {
        tracing::debug!(url = %self.url, downloaded_bytes, "download progress");
    }
    fn on_finish(&self) {
        tracing::debug!(url = %self.url, "download finished");
    }
}

/// Options controlling a single [`download`] call.
pub struct DownloadOptions<'a> {
    /// The URL used as the index key and, unless overridden by `sources`,
    /// as the only source attempted.
    pub remote_url: &'a str,
    /// Candidate URLs to attempt in order. Defaults to `[remote_url]` when
    /// `None`. An explicit empty slice is an [`CacheError::ArgumentError`].
    pub sources: Option<&'a [String]>,
    /// Whether to consult/populate the cache at all.
    pub cache: bool,
    /// Force a re-download even if `remote_url` is already cached. Requires
    /// `cache == true`.
    pub update_cache: bool,
    /// Per-source network timeout.
    pub timeout: Duration,
    /// Optional progress reporter; ignored if `None`.
    pub reporter: Option<&'a dyn ProgressReporter>,
}

impl<'a> DownloadOptions<'a> {
    /// The common case: just a URL, cached, no forced update, a 10s
    /// timeout.
    pub fn new(remote_url: &'a str) -> Self {
        Self {
            remote_url,
            sources: None,
            cache: true,
            update_cache: false,
            timeout: Duration::from_secs(10),
            reporter: None,
        }
    }
}

/// Fetches `options.remote_url`, returning a local path to its byte-for-byte
/// content.
pub fn download(
    client: &reqwest::blocking::Client,
    cache_root: &Path,
    options: DownloadOptions<'_>,
) -> Result<PathBuf> {
    if options.update_cache && !options.cache {
        return Err(CacheError::ArgumentError(
            "update_cache=true requires cache=true".to_string(),
        ));
    }

    let sources: Vec<String> = match options.sources {
        Some(s) if s.is_empty() => {
            return Err(CacheError::ArgumentError(
                "sources must not be empty".to_string(),
            ))
        }
        Some(s) => s.to_vec(),
        None => vec![options.remote_url.to_string()],
    };

    let (cache, update_cache, cache_unavailable) = if options.cache {
        match paths::ensure_dir(cache_root) {
            Ok(()) => (true, options.update_cache, false),
            Err(e) => {
                tracing::warn!(error = %e, "cache unavailable, downgrading to uncached download");
                (false, false, true)
            }
        }
    } else {
        (false, false, false)
    };

    // Fast path: cache hit, no forced update.
    if cache && !update_cache {
        if let Ok(snapshot) = index::read(cache_root, DEFAULT_LOCK_ATTEMPTS) {
            if let Some(path) = snapshot.get(options.remote_url) {
                tracing::debug!(url = options.remote_url, "cache hit");
                return Ok(path.clone());
            }
        }
    }

    // Fetch loop: try each source in order.
    let mut first_error: Option<CacheError> = None;
    let mut fetched: Option<(tempfile::TempPath, String)> = None;

    for source in &sources {
        match fetch_one(client, cache_root, source, cache, options.timeout, options.reporter) {
            Ok(result) => {
                fetched = Some(result);
                break;
            }
            Err(e) => {
                tracing::warn!(source, error = %e, "source failed, trying next");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    let (temp_path, digest) = match fetched {
        Some(v) => v,
        None => {
            return Err(CacheError::AllSourcesFailed {
                attempted: sources.len(),
                source: Box::new(first_error.expect("at least one source was attempted")),
            })
        }
    };

    if cache {
        let cache_root = cache_root.to_path_buf();
        let final_path = cache_root.join(&digest);
        let url_key = options.remote_url.to_string();
        let promoted = index::write(&cache_root, DEFAULT_LOCK_ATTEMPTS, move |entries| {
            promote(&cache_root, &final_path, &digest, &url_key, temp_path, entries)
        })?;
        Ok(promoted)
    } else {
        let path = temp_path.keep().map_err(|e| e.error)?;
        tempreg::register(&path);
        if cache_unavailable {
            tracing::warn!(path = %path.display(), "cache unavailable; temp file left on disk");
        }
        Ok(path)
    }
}

/// Performs the rename-then-index-then-unlink-superseded sequence,
/// returning the final path. A crash between rename and index update can
/// only leave an unreferenced blob on disk, never a dangling index entry.
fn promote(
    cache_root: &Path,
    final_path: &Path,
    digest: &str,
    url_key: &str,
    temp_path: tempfile::TempPath,
    entries: &mut index::IndexSnapshot,
) -> Result<PathBuf> {
    let previous = entries.get(url_key).cloned();

    // 1. Rename (atomic promotion) first.
    if !final_path.exists() {
        temp_path.persist(final_path).map_err(|e| e.error)?;
    }
    // Deduplicated: another URL already produced this exact blob; drop our
    // copy instead of overwriting (content is byte-identical by hash
    // construction).

    // 2. Mutate the index.
    entries.insert(url_key.to_string(), final_path.to_path_buf());

    // 3. Only now remove a superseded blob, and only if no remaining URL
    // references it.
    if let Some(prev_path) = previous {
        if prev_path != *final_path && !entries.values().any(|p| p == &prev_path) {
            let _ = fs_err::remove_file(&prev_path);
        }
    }

    let _ = digest;
    let _ = cache_root;
    Ok(final_path.to_path_buf())
}

/// Streams one source to a temp file, hashing as it goes. Returns the temp
/// path and its hex digest on success.
fn fetch_one(
    client: &reqwest::blocking::Client,
    cache_root: &Path,
    source: &str,
    cache: bool,
    timeout: Duration,
    reporter: Option<&dyn ProgressReporter>,
) -> Result<(tempfile::TempPath, String)> {
    let temp_dir: PathBuf = if cache {
        cache_root.to_path_buf()
    } else {
        std::env::temp_dir()
    };
    fs_err::create_dir_all(&temp_dir)?;
    let temp_file = tempfile::NamedTempFile::new_in(&temp_dir)?;

    if let Ok(url) = Url::parse(source) {
        if url.scheme() == "file" {
            return stream_local_file(&url, temp_file);
        }
    }

    stream_http(client, source, temp_file, cache_root, cache, timeout, reporter)
}

fn stream_local_file(
    url: &Url,
    temp_file: tempfile::NamedTempFile,
) -> Result<(tempfile::TempPath, String)> {
    let src_path = url
        .to_file_path()
        .map_err(|()| CacheError::ArgumentError(format!("invalid file:// URL: {url}")))?;
    let mut src = fs_err::File::open(&src_path)?;
    let mut writer = HashingWriter::new(temp_file.reopen()?);
    std::io::copy(&mut src, &mut writer)?;
    let (_, digest) = writer.finalize();
    Ok((temp_file.into_temp_path(), digest))
}

#[allow(clippy::too_many_arguments)]
fn stream_http(
    client: &reqwest::blocking::Client,
    source: &str,
    temp_file: tempfile::NamedTempFile,
    cache_root: &Path,
    cache: bool,
    timeout: Duration,
    reporter: Option<&dyn ProgressReporter>,
) -> Result<(tempfile::TempPath, String)> {
    let response = client
        .get(source)
        .timeout(timeout)
        .send()
        .map_err(|e| CacheError::Network {
            url: source.to_string(),
            source: Box::new(e),
        })?;

    let response = response.error_for_status().map_err(|e| CacheError::Network {
        url: source.to_string(),
        source: Box::new(e),
    })?;

    let content_length = response.content_length();
    if let Some(n) = content_length {
        paths::require_free(&std::env::temp_dir(), n)?;
        if cache {
            paths::require_free(cache_root, n)?;
        }
    }

    if let Some(r) = reporter {
        r.on_start(content_length);
    }

    let result = (|| -> Result<String> {
        let mut writer = HashingWriter::new(temp_file.reopen()?);
        let mut source_reader = response;
        let mut buf = vec![0u8; DEFAULT_BLOCK_SIZE];
        let mut downloaded: u64 = 0;
        loop {
            let n = source_reader
                .read(&mut buf)
                .map_err(|e| CacheError::Network {
                    url: source.to_string(),
                    source: Box::new(e),
                })?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n])?;
            downloaded += n as u64;
            if let Some(r) = reporter {
                r.on_progress(downloaded);
            }
        }
        let (_, digest) = writer.finalize();
        Ok(digest)
    })();

    if let Some(r) = reporter {
        r.on_finish();
    }

    match result {
        Ok(digest) => Ok((temp_file.into_temp_path(), digest)),
        Err(e) => {
            drop(temp_file); // deletes the partial temp file
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_url(path: &Path) -> String {
        Url::from_file_path(path).unwrap().to_string()
    }

    fn client() -> reqwest::blocking::Client {
        reqwest::blocking::Client::new()
    }

    #[test]
    fn cache_availability_probe_does_not_nest_a_version_directory() {
        // `cache_root` here is already a resolved, version-namespaced root
        // (as `Cache::with_config` hands it to `download`); the
        // availability check inside `download` must probe it directly,
        // not re-append another `v<major>` underneath it.
        let cache_dir = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("data.txt");
        fs_err::write(&src, b"data").unwrap();
        let url = file_url(&src);

        download(&client(), cache_dir.path(), DownloadOptions::new(&url)).unwrap();

        let entries: Vec<_> = fs_err::read_dir(cache_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert!(
            !entries.iter().any(|name| name.to_string_lossy().starts_with('v')
                && name.to_string_lossy()[1..].parse::<u32>().is_ok()),
            "cache root must not contain a nested version directory: {entries:?}"
        );
    }

    #[test]
    fn download_from_primary_file_source() {
        let cache_dir = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("primary.txt");
        fs_err::write(&src, b"primary").unwrap();

        let url = file_url(&src);
        let mut opts = DownloadOptions::new(&url);
        opts.sources = None;
        let path = download(&client(), cache_dir.path(), opts).unwrap();

        assert_eq!(fs_err::read(&path).unwrap(), b"primary");
    }

    #[test]
    fn falls_back_to_second_source_when_first_is_missing() {
        let cache_dir = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let missing = file_url(&src_dir.path().join("does-not-exist.txt"));
        let present_path = src_dir.path().join("present.txt");
        fs_err::write(&present_path, b"fallback1").unwrap();
        let present = file_url(&present_path);

        let sources = vec![missing.clone(), present.clone()];
        let mut opts = DownloadOptions::new(&missing);
        opts.sources = Some(&sources);
        let path = download(&client(), cache_dir.path(), opts).unwrap();

        assert_eq!(fs_err::read(&path).unwrap(), b"fallback1");

        // Only the index key (the nominal remote_url) gets an entry; the
        // successful mirror's own URL is not separately cached.
        let snapshot = index::read_default(cache_dir.path()).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get(&missing), Some(&path));
        assert!(!snapshot.contains_key(&present));
    }

    #[test]
    fn empty_sources_is_argument_error() {
        let cache_dir = tempfile::tempdir().unwrap();
        let empty: Vec<String> = vec![];
        let mut opts = DownloadOptions::new("http://example.com/x");
        opts.sources = Some(&empty);
        let result = download(&client(), cache_dir.path(), opts);
        assert_matches::assert_matches!(result, Err(CacheError::ArgumentError(_)));
    }

    #[test]
    fn update_cache_without_cache_is_argument_error() {
        let cache_dir = tempfile::tempdir().unwrap();
        let mut opts = DownloadOptions::new("http://example.com/x");
        opts.cache = false;
        opts.update_cache = true;
        let result = download(&client(), cache_dir.path(), opts);
        assert_matches::assert_matches!(result, Err(CacheError::ArgumentError(_)));
    }

    #[test]
    fn two_urls_with_identical_payload_share_one_blob() {
        let cache_dir = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let payload = b"Test data; doesn't matter much.\n";

        let a_path = src_dir.path().join("a.txt");
        let b_path = src_dir.path().join("b.txt");
        fs_err::write(&a_path, payload).unwrap();
        fs_err::write(&b_path, payload).unwrap();

        let a_url = file_url(&a_path);
        let b_url = file_url(&b_path);

        let a_cached = download(&client(), cache_dir.path(), DownloadOptions::new(&a_url)).unwrap();
        let b_cached = download(&client(), cache_dir.path(), DownloadOptions::new(&b_url)).unwrap();

        assert_eq!(a_cached, b_cached);
    }

    #[test]
    fn update_cache_replaces_content_on_change() {
        let cache_dir = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("mutable.txt");
        fs_err::write(&src, b"old").unwrap();
        let url = file_url(&src);

        let first = download(&client(), cache_dir.path(), DownloadOptions::new(&url)).unwrap();
        assert_eq!(fs_err::read(&first).unwrap(), b"old");

        fs_err::write(&src, b"new").unwrap();
        let mut opts = DownloadOptions::new(&url);
        opts.update_cache = true;
        let second = download(&client(), cache_dir.path(), opts).unwrap();
        assert_eq!(fs_err::read(&second).unwrap(), b"new");

        // plain download still returns the updated content
        let third = download(&client(), cache_dir.path(), DownloadOptions::new(&url)).unwrap();
        assert_eq!(fs_err::read(&third).unwrap(), b"new");
    }
}
