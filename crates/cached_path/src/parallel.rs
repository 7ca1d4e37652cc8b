//! The parallel downloader: fan out [`crate::download::download`] calls
//! across a thread pool, deduplicating URLs and preserving order.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::download::{download, DownloadOptions};
use crate::error::{CacheError, Result};

/// One URL to fetch in a batch, with its own optional source list.
pub struct BatchItem<'a> {
    /// The URL (and index key).
    pub url: &'a str,
    /// Per-URL source override; `None` uses `[url]`.
    pub sources: Option<&'a [String]>,
}

impl<'a> BatchItem<'a> {
    /// The common case: no source override.
    pub fn new(url: &'a str) -> Self {
        Self { url, sources: None }
    }
}

/// Downloads every item in `items`, deduplicating repeated URLs
/// (preserving first occurrence) and fanning the unique set out across
/// `rayon`'s global thread pool. Results are scattered back to the
/// original positions.
///
/// `cache=false` is silently coerced to `cache=true, update_cache=true`
/// with a warning, since worker threads cannot hand back uncached temp
/// files for the caller's registry to track individually. If any worker
/// fails, the first error encountered is returned after every worker has
/// finished; downloads that did complete remain in the cache.
pub fn download_all(
    client: &reqwest::blocking::Client,
    cache_root: &std::path::Path,
    items: &[BatchItem<'_>],
    cache: bool,
    timeout: Duration,
) -> Result<Vec<PathBuf>> {
    let (cache, update_cache) = if !cache {
        tracing::warn!(
            "cache=false is not supported for parallel downloads; coercing to cache=true, update_cache=true"
        );
        (true, true)
    } else {
        (true, false)
    };

    // Deduplicate URLs, preserving first occurrence, and remember every
    // position each URL appeared at so results can be scattered back.
    let mut first_seen: HashMap<&str, usize> = HashMap::new();
    let mut unique: Vec<usize> = Vec::new();
    let mut positions: HashMap<usize, Vec<usize>> = HashMap::new();
    for (i, item) in items.iter().enumerate() {
        match first_seen.get(item.url) {
            Some(&first_idx) => positions.get_mut(&first_idx).unwrap().push(i),
            None => {
                first_seen.insert(item.url, i);
                unique.push(i);
                positions.insert(i, vec![i]);
            }
        }
    }

    let results: Vec<(usize, Result<PathBuf>)> = rayon::scope(|scope| {
        let (tx, rx) = std::sync::mpsc::channel();
        for &idx in &unique {
            let tx = tx.clone();
            let url = items[idx].url;
            let sources = items[idx].sources.map(|s| s.to_vec());
            scope.spawn(move |_| {
                let opts = DownloadOptions {
                    remote_url: url,
                    sources: sources.as_deref(),
                    cache,
                    update_cache,
                    timeout,
                    reporter: None,
                };
                let result = download(client, cache_root, opts);
                let _ = tx.send((idx, result));
            });
        }
        drop(tx);
        rx.into_iter().collect()
    });

    let mut by_index: HashMap<usize, Result<PathBuf>> = HashMap::new();
    for (idx, result) in results {
        by_index.insert(idx, result);
    }

    let mut first_error: Option<CacheError> = None;
    let mut out: Vec<Option<PathBuf>> = (0..items.len()).map(|_| None).collect();

    for &idx in &unique {
        match by_index.remove(&idx).expect("every unique index has a result") {
            Ok(path) => {
                for &pos in &positions[&idx] {
                    out[pos] = Some(path.clone());
                }
            }
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }

    Ok(out.into_iter().map(|p| p.expect("all positions filled")).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn file_url(path: &std::path::Path) -> String {
        Url::from_file_path(path).unwrap().to_string()
    }

    #[test]
    fn dedupes_and_preserves_order() {
        let cache_dir = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();

        let a = src_dir.path().join("a.txt");
        let b = src_dir.path().join("b.txt");
        fs_err::write(&a, b"A").unwrap();
        fs_err::write(&b, b"B").unwrap();
        let a_url = file_url(&a);
        let b_url = file_url(&b);

        let items = vec![
            BatchItem::new(&a_url),
            BatchItem::new(&b_url),
            BatchItem::new(&a_url),
        ];

        let client = reqwest::blocking::Client::new();
        let paths = download_all(&client, cache_dir.path(), &items, true, Duration::from_secs(5))
            .unwrap();

        assert_eq!(paths.len(), 3);
        assert_eq!(paths[0], paths[2]);
        assert_eq!(fs_err::read(&paths[0]).unwrap(), b"A");
        assert_eq!(fs_err::read(&paths[1]).unwrap(), b"B");
    }

    #[test]
    fn no_cache_false_is_coerced() {
        let cache_dir = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let a = src_dir.path().join("a.txt");
        fs_err::write(&a, b"A").unwrap();
        let a_url = file_url(&a);

        let items = vec![BatchItem::new(&a_url)];
        let client = reqwest::blocking::Client::new();
        let paths =
            download_all(&client, cache_dir.path(), &items, false, Duration::from_secs(5)).unwrap();

        // Coerced to cache=true: the result is an entry in the index.
        let snapshot = crate::index::read_default(cache_dir.path()).unwrap();
        assert_eq!(snapshot.get(&a_url), Some(&paths[0]));
    }
}
