//! Dataset archive codec.
//!
//! Datasets travel as one gzip-compressed tar stream whose entries are
//! relative to the dataset root.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::error::TransferError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Pack the contents of `src` into a gzip-compressed tar stream written to
/// `sink`, returning the sink once the stream is complete.
///
/// Symlinks are stored as links, not followed.
///
/// # Errors
///
/// Returns an archive error if `src` cannot be walked or read, or if `sink`
/// rejects a write.
pub fn pack<W: Write>(src: &Path, sink: W) -> Result<W, TransferError> {
    tracing::debug!(src = %src.display(), "Packing dataset");

    let encoder = GzEncoder::new(sink, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder
        .append_dir_all(".", src)
        .map_err(|e| TransferError::archive(src, e))?;

    let encoder = builder
        .into_inner()
        .map_err(|e| TransferError::archive(src, e))?;
    encoder.finish().map_err(|e| TransferError::archive(src, e))
}

/// Unpack an archive read from `source` into `dest`, overwriting existing
/// entries.
///
/// Both gzip-compressed and plain tar streams are accepted. The stream is
/// consumed incrementally.
///
/// # Errors
///
/// Returns an archive error if the stream is corrupt or `dest` is not
/// writable.
pub fn unpack<R: Read>(source: R, dest: &Path) -> Result<(), TransferError> {
    tracing::debug!(dest = %dest.display(), "Unpacking dataset");

    let mut source = BufReader::new(source);
    let compressed = source
        .fill_buf()
        .map_err(|e| TransferError::archive(dest, e))?
        .starts_with(&GZIP_MAGIC);

    let reader: Box<dyn Read + '_> = if compressed {
        Box::new(GzDecoder::new(source))
    } else {
        Box::new(source)
    };

    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);
    archive
        .unpack(dest)
        .map_err(|e| TransferError::archive(dest, e))
}
