//! Storage backends
//!
//! The cache keeps blobs and their metadata in two independent stores.
//! Both are pluggable; filesystem implementations are the defaults and
//! in-memory ones are handy for tests and short-lived processes.

pub mod blob;
pub mod errors;
pub mod metadata;

pub use blob::{BlobReceipt, BlobSink, BlobSource, BlobStore, FsBlobStore, MemoryBlobStore};
pub use errors::{StoreError, StoreResult};
pub use metadata::{FsMetadataStore, MemoryMetadataStore, Metadata, MetadataStore};

use std::io::Write;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Longest file name segment produced for an encoded key
const SEGMENT_LEN: usize = 200;

/// Map an arbitrary key to a filesystem path below `root`
///
/// The key is base64url-encoded and split into nested directories so long
/// URLs stay under file name length limits. The extension on the final
/// segment keeps files from clashing with directories of longer keys.
pub(crate) fn encoded_path(root: &Path, key: &str, extension: &str) -> PathBuf {
    let encoded = URL_SAFE_NO_PAD.encode(key);
    let mut path = root.to_path_buf();
    let mut rest = encoded.as_str();
    while rest.len() > SEGMENT_LEN {
        let (segment, tail) = rest.split_at(SEGMENT_LEN);
        path.push(segment);
        rest = tail;
    }
    path.push(format!("{rest}.{extension}"));
    path
}

/// Write a file atomically using tempfile
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> StoreResult<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}
