//! Export/import of a cache snapshot as a portable ZIP archive.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::download::{download, DownloadOptions};
use crate::error::{CacheError, Result};
use crate::hasher::{hash_file, DEFAULT_BLOCK_SIZE};
use crate::index;
use crate::lock::DEFAULT_LOCK_ATTEMPTS;

#[derive(Serialize, Deserialize, Default)]
struct Manifest {
    #[serde(flatten)]
    entries: std::collections::HashMap<String, String>,
}

/// Exports `urls` (default: every cached URL) as a ZIP archive at
/// `archive_path`. Each URL is first ensured to be downloaded
/// (`cache=true`), then its blob is added to the archive under
/// `cache/<digest>`, deduplicating blobs shared by multiple URLs. An
/// `index.json` manifest maps each URL to its archive-internal path.
pub fn export(
    client: &reqwest::blocking::Client,
    cache_root: &Path,
    archive_path: &Path,
    urls: Option<&[String]>,
) -> Result<()> {
    let urls: Vec<String> = match urls {
        Some(u) => u.to_vec(),
        None => index::read_default(cache_root)?.into_keys().collect(),
    };

    let file = fs_err::File::create(archive_path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);

    let mut manifest = Manifest::default();
    let mut written_blobs = std::collections::HashSet::new();

    for url in &urls {
        let path = download(
            client,
            cache_root,
            DownloadOptions::new(url),
        )?;
        let digest = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let archive_member = format!("cache/{digest}");

        if written_blobs.insert(digest.clone()) {
            zip.start_file(&archive_member, options)?;
            let mut blob = fs_err::File::open(&path)?;
            std::io::copy(&mut blob, &mut zip)?;
        }
        manifest.entries.insert(url.clone(), archive_member);
    }

    zip.start_file("index.json", options)?;
    zip.write_all(&serde_json::to_vec_pretty(&manifest).expect("manifest always serializes"))?;
    zip.finish()?;
    Ok(())
}

/// Imports URLs from a ZIP archive previously produced by [`export`].
///
/// For each selected URL (default: all in the archive), if
/// `update_cache=false` and the URL is already cached it is skipped;
/// otherwise the blob is extracted, its MD5 is recomputed while
/// extracting, and it is promoted into the cache via the standard
/// promotion path. If the recomputed digest disagrees with the archive
/// member's claimed digest (its basename), the entry is rejected with
/// [`CacheError::CorruptArchive`].
pub fn import(
    cache_root: &Path,
    archive_path: &Path,
    urls: Option<&[String]>,
    update_cache: bool,
) -> Result<()> {
    let file = fs_err::File::open(archive_path)?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| CacheError::CorruptArchive(format!("not a valid zip archive: {e}")))?;

    let manifest: Manifest = {
        let mut entry = zip
            .by_name("index.json")
            .map_err(|_| CacheError::CorruptArchive("missing index.json".to_string()))?;
        let mut buf = String::new();
        entry.read_to_string(&mut buf)?;
        serde_json::from_str(&buf)
            .map_err(|e| CacheError::CorruptArchive(format!("malformed index.json: {e}")))?
    };

    let selected: Vec<String> = match urls {
        Some(u) => u.to_vec(),
        None => manifest.entries.keys().cloned().collect(),
    };

    let existing = index::read_default(cache_root)?;

    for url in &selected {
        if !update_cache && existing.contains_key(url) {
            continue;
        }

        let member = manifest
            .entries
            .get(url)
            .ok_or_else(|| CacheError::CorruptArchive(format!("archive has no entry for '{url}'")))?;

        let expected_digest = member
            .rsplit('/')
            .next()
            .ok_or_else(|| CacheError::CorruptArchive(format!("malformed archive path '{member}'")))?
            .to_string();

        let mut zip_entry = zip
            .by_name(member)
            .map_err(|_| CacheError::CorruptArchive(format!("archive missing member '{member}'")))?;

        fs_err::create_dir_all(cache_root)?;
        let mut temp = tempfile::NamedTempFile::new_in(cache_root)?;
        std::io::copy(&mut zip_entry, &mut temp)?;
        let temp_path = temp.into_temp_path();

        let actual_digest = hash_file(&temp_path, DEFAULT_BLOCK_SIZE)?;
        if actual_digest != expected_digest {
            return Err(CacheError::CorruptArchive(format!(
                "imported blob for '{url}' hashes to {actual_digest}, archive claimed {expected_digest}"
            )));
        }

        let final_path = cache_root.join(&expected_digest);
        index::write(cache_root, DEFAULT_LOCK_ATTEMPTS, move |entries| {
            if !final_path.exists() {
                temp_path.persist(&final_path).map_err(|e| e.error)?;
            }
            entries.insert(url.clone(), final_path);
            Ok(())
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn file_url(path: &Path) -> String {
        Url::from_file_path(path).unwrap().to_string()
    }

    #[test]
    fn export_then_clear_then_import_is_identity_for_selected_urls() {
        let cache_dir = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();

        let a = src_dir.path().join("a.txt");
        let b = src_dir.path().join("b.txt");
        fs_err::write(&a, b"A content").unwrap();
        fs_err::write(&b, b"B content").unwrap();
        let a_url = file_url(&a);
        let b_url = file_url(&b);

        let client = reqwest::blocking::Client::new();
        download(&client, cache_dir.path(), DownloadOptions::new(&a_url)).unwrap();
        download(&client, cache_dir.path(), DownloadOptions::new(&b_url)).unwrap();

        let archive_dir = tempfile::tempdir().unwrap();
        let archive_path = archive_dir.path().join("snapshot.zip");
        export(&client, cache_dir.path(), &archive_path, None).unwrap();

        crate::maintenance::clear(cache_dir.path(), crate::maintenance::ClearTarget::All).unwrap();
        assert!(!cache_dir.path().exists());

        import(cache_dir.path(), &archive_path, Some(std::slice::from_ref(&a_url)), false).unwrap();

        let snapshot = index::read_default(cache_dir.path()).unwrap();
        assert!(snapshot.contains_key(&a_url));
        assert!(!snapshot.contains_key(&b_url));
    }
}
