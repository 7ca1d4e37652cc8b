//! Streaming MD5 over file content.
//!
//! The digest is fixed to MD5: the cache key is the lowercase hex MD5 of
//! the full payload bytes.

use std::io::{Read, Write};
use std::path::Path;

use digest::Digest;
use md5::Md5;

use crate::error::Result;

/// Default block size for hashing and streaming I/O.
pub const DEFAULT_BLOCK_SIZE: usize = 65_536;

/// Computes the lowercase hex MD5 digest of a file's content, reading in
/// blocks of `block_size` bytes.
pub fn hash_file(path: &Path, block_size: usize) -> Result<String> {
    let mut file = fs_err::File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; block_size.max(1)];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// A [`Write`] wrapper that hashes every byte written to it while passing
/// the bytes through unmodified to the inner writer.
///
/// Used by the download engine to compute a blob's content hash in the
/// same pass that streams it to a temp file, rather than re-reading the
/// file afterwards.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Md5,
}

impl<W: Write> HashingWriter<W> {
    /// Wraps `inner`, starting a fresh hash state.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Md5::new(),
        }
    }

    /// Consumes the wrapper, returning the inner writer and the lowercase
    /// hex digest of everything written through it.
    pub fn finalize(self) -> (W, String) {
        (self.inner, hex::encode(self.hasher.finalize()))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_file_matches_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        fs_err::write(&path, b"Test data; doesn't matter much.\n").unwrap();

        let digest = hash_file(&path, DEFAULT_BLOCK_SIZE).unwrap();
        assert_eq!(digest, "fcfd40763f75c1cb26755cb80ac4510f");
    }

    #[test]
    fn hashing_writer_matches_hash_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        fs_err::write(&src, b"identical payload").unwrap();

        let dst = dir.path().join("dst.txt");
        let file = fs_err::File::create(&dst).unwrap();
        let mut writer = HashingWriter::new(file);
        writer.write_all(b"identical payload").unwrap();
        let (_, digest) = writer.finalize();

        assert_eq!(digest, hash_file(&src, DEFAULT_BLOCK_SIZE).unwrap());
    }
}
