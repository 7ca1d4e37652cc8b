//! The transparent-decompression reader.
//!
//! Sniffs the first 4 bytes of a stream and dispatches to the matching
//! decoder. `flate2`/`bzip2`/`xz2` provide the three codecs;
//! `encoding_rs`/`encoding_rs_io` provide the optional text-decoding wrap
//! (`DecodeReaderBytesBuilder` wrapping a binary byte stream). A codec
//! match is only provisional: decoding one byte through it is the real
//! validity check, and a failure there falls back to a raw reader over
//! the rewound source rather than erroring, since the magic bytes can
//! coincidentally match non-compressed content.

use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use bzip2::read::BzDecoder;
use encoding_rs::Encoding;
use encoding_rs_io::DecodeReaderBytesBuilder;
use flate2::read::GzDecoder;
use xz2::read::XzDecoder;

use crate::error::Result;

/// The compression codec detected from a stream's leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// No recognized magic prefix; bytes are passed through unchanged.
    Raw,
    /// `1F 8B 08`.
    Gzip,
    /// `"BZh"` (`42 5A 68`).
    Bzip2,
    /// `FD 37 7A` (xz/lzma container).
    Xz,
}

impl Codec {
    /// Name used in [`crate::error::CacheError::UnsupportedCompression`]
    /// messages, were this build ever to feature-gate a codec out; with
    /// `bzip2`/`xz2` as unconditional dependencies that variant is never
    /// raised today.
    pub fn name(self) -> &'static str {
        match self {
            Codec::Raw => "raw",
            Codec::Gzip => "gzip",
            Codec::Bzip2 => "bzip2",
            Codec::Xz => "xz",
        }
    }
}

/// Inspects up to 4 leading bytes and returns the codec they indicate.
/// Does not consume `prefix`.
pub fn sniff(prefix: &[u8]) -> Codec {
    if prefix.starts_with(&[0x1F, 0x8B, 0x08]) {
        Codec::Gzip
    } else if prefix.starts_with(b"BZh") {
        Codec::Bzip2
    } else if prefix.starts_with(&[0xFD, 0x37, 0x7A]) {
        Codec::Xz
    } else {
        Codec::Raw
    }
}

/// Optional text encoding to wrap the decoded binary stream in. `None`
/// means binary, i.e. no text decoding.
pub enum TextEncoding {
    /// No explicit encoding was given; decode using the caller's
    /// configured preferred encoding (`CacheConfig::preferred_encoding`,
    /// resolved by [`resolve_preferred_encoding`]) rather than a
    /// hardcoded one. This is the closest portable stand-in for "the
    /// platform's preferred encoding" in a server/CLI context; it
    /// defaults to UTF-8 but is runtime-tunable.
    Preferred,
    /// Decode using a specific `encoding_rs` encoding.
    Named(&'static Encoding),
}

/// Resolves a configured encoding label (e.g. `"UTF-8"`, `"windows-1252"`)
/// to an [`Encoding`], falling back to UTF-8 for an unrecognized label.
pub fn resolve_preferred_encoding(label: &str) -> &'static Encoding {
    Encoding::for_label(label.as_bytes()).unwrap_or(encoding_rs::UTF_8)
}

/// A fully-buffered, decoded readable stream.
///
/// The reader is a scoped resource: it owns whatever temp/intermediate
/// buffers it created and they are dropped with it; caller-owned inputs
/// (e.g. a path on disk) are left untouched.
pub struct DecompressingReader {
    inner: Box<dyn Read + Send>,
    pub codec: Codec,
}

impl Read for DecompressingReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Opens `path`, sniffs its magic bytes, and returns a reader that yields
/// the decompressed content from the start of the logical stream.
///
/// `preferred_encoding` is used when the caller asks for
/// [`TextEncoding::Preferred`]; resolve it from `CacheConfig` via
/// [`resolve_preferred_encoding`].
pub fn open_path(
    path: &Path,
    text: Option<TextEncoding>,
    preferred_encoding: &'static Encoding,
) -> Result<DecompressingReader> {
    let file = File::open(path)?;
    from_reader(file, text, preferred_encoding)
}

/// Wraps an arbitrary readable in the decompressing reader.
///
/// If `source` does not implement [`Seek`] efficiently the caller should
/// buffer it into memory first (e.g. via [`from_bytes`]) — magic-byte
/// sniffing requires rewinding to byte 0 after inspecting the prefix.
pub fn from_reader<R: Read + Seek + Send + 'static>(
    mut source: R,
    text: Option<TextEncoding>,
    preferred_encoding: &'static Encoding,
) -> Result<DecompressingReader> {
    let mut prefix = [0u8; 4];
    let n = read_prefix(&mut source, &mut prefix)?;
    let codec = sniff(&prefix[..n]);
    source.seek(SeekFrom::Start(0))?;

    // Validate the sniffed codec by attempting to decode one byte. On
    // failure, fall through to raw rather than erroring: the magic-byte
    // match was coincidental, not evidence of a genuinely compressed
    // (but corrupt) stream.
    let (decoded, codec): (Box<dyn Read + Send>, Codec) = match codec {
        Codec::Raw => (Box::new(source), Codec::Raw),
        Codec::Gzip => match probe_gzip(source) {
            Ok(decoded) => (decoded, Codec::Gzip),
            Err(mut raw) => {
                raw.seek(SeekFrom::Start(0))?;
                (Box::new(raw), Codec::Raw)
            }
        },
        Codec::Bzip2 => match probe_bzip2(source) {
            Ok(decoded) => (decoded, Codec::Bzip2),
            Err(mut raw) => {
                raw.seek(SeekFrom::Start(0))?;
                (Box::new(raw), Codec::Raw)
            }
        },
        Codec::Xz => match probe_xz(source) {
            Ok(decoded) => (decoded, Codec::Xz),
            Err(mut raw) => {
                raw.seek(SeekFrom::Start(0))?;
                (Box::new(raw), Codec::Raw)
            }
        },
    };

    let encoding = match text {
        None => None,
        Some(TextEncoding::Preferred) => Some(preferred_encoding),
        Some(TextEncoding::Named(enc)) => Some(enc),
    };
    let wrapped: Box<dyn Read + Send> = match encoding {
        None => decoded,
        Some(enc) => Box::new(
            DecodeReaderBytesBuilder::new()
                .encoding(Some(enc))
                .build(decoded),
        ),
    };

    Ok(DecompressingReader {
        inner: wrapped,
        codec,
    })
}

/// Buffers a non-seekable readable fully into memory, then dispatches as
/// usual.
pub fn from_bytes(
    mut source: impl Read,
    text: Option<TextEncoding>,
    preferred_encoding: &'static Encoding,
) -> Result<DecompressingReader> {
    let mut buf = Vec::new();
    source.read_to_end(&mut buf)?;
    from_reader(Cursor::new(buf), text, preferred_encoding)
}

fn read_prefix<R: Read>(source: &mut R, prefix: &mut [u8; 4]) -> Result<usize> {
    let mut filled = 0;
    while filled < prefix.len() {
        match source.read(&mut prefix[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Attempts to decode one byte through a freshly built decoder. On
/// success, the probed byte is re-spliced onto the front of the stream so
/// no data is lost. On failure, the decoder's inner reader is reclaimed
/// via `into_inner()` and handed back to the caller, which rewinds it and
/// falls through to raw — matching the original's `fileobj.seek(0)` on a
/// failed decode probe rather than surfacing an error.
fn probe_gzip<R: Read + Seek + Send + 'static>(source: R) -> std::result::Result<Box<dyn Read + Send>, R> {
    let mut decoder = GzDecoder::new(source);
    let mut probe = [0u8; 1];
    match decoder.read(&mut probe) {
        Ok(n) => Ok(Box::new(Cursor::new(probe[..n].to_vec()).chain(decoder))),
        Err(_) => Err(decoder.into_inner()),
    }
}

fn probe_bzip2<R: Read + Seek + Send + 'static>(source: R) -> std::result::Result<Box<dyn Read + Send>, R> {
    let mut decoder = BzDecoder::new(source);
    let mut probe = [0u8; 1];
    match decoder.read(&mut probe) {
        Ok(n) => Ok(Box::new(Cursor::new(probe[..n].to_vec()).chain(decoder))),
        Err(_) => Err(decoder.into_inner()),
    }
}

fn probe_xz<R: Read + Seek + Send + 'static>(source: R) -> std::result::Result<Box<dyn Read + Send>, R> {
    let mut decoder = XzDecoder::new(source);
    let mut probe = [0u8; 1];
    match decoder.read(&mut probe) {
        Ok(n) => Ok(Box::new(Cursor::new(probe[..n].to_vec()).chain(decoder))),
        Err(_) => Err(decoder.into_inner()),
    }
}
