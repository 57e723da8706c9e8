//! Blob stores
//!
//! A blob store accepts a stream of bytes under a suggested key and reports
//! back the key it actually used. Content-addressable stores ignore the
//! suggestion and key blobs by their hash, so the reported key is the only
//! one valid for later reads and removals.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{ready, Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use moka::sync::Cache;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use super::errors::{StoreError, StoreResult};
use super::metadata::Metadata;
use super::write_atomic;

/// Readable side of a stored blob
pub type BlobSource = Pin<Box<dyn AsyncRead + Send>>;

/// Outcome of a completed blob write
#[derive(Debug, Clone, PartialEq)]
pub struct BlobReceipt {
    /// Key the store assigned; use it for every later read or removal
    pub key: String,
    /// Store-specific fields worth keeping alongside the blob (size, hash, ...)
    pub fields: Metadata,
}

/// Writable side of a blob being stored
///
/// Bytes are written through [`AsyncWrite`]; the blob only becomes visible
/// once [`BlobSink::finish`] succeeds. Dropping an unfinished sink discards
/// the partial write.
#[async_trait]
pub trait BlobSink: AsyncWrite + Send + Unpin {
    async fn finish(self: Box<Self>) -> StoreResult<BlobReceipt>;
}

/// Blob storage backend
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Open a sink for a new blob; the store may ignore `suggested_key`
    async fn create_write_stream(&self, suggested_key: &str) -> StoreResult<Box<dyn BlobSink>>;

    /// Open a blob for reading by its store-assigned key
    async fn create_read_stream(&self, key: &str) -> StoreResult<BlobSource>;

    /// Release `owner`'s hold on a blob; removing a missing blob succeeds
    ///
    /// `owner` is the suggested key the blob was written under. Stores that
    /// share one blob between owners delete it once the last owner is gone.
    async fn remove(&self, key: &str, owner: &str) -> StoreResult<()>;
}

/// How [`FsBlobStore`] derives file locations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Addressing {
    /// Keyed by the SHA-1 of the content
    Content,
    /// Keyed by the caller's suggested key
    Key,
}

/// Filesystem blob store
///
/// Content-addressable by default: identical payloads share one file, named
/// after their SHA-1 and fanned out by the first two hex digits. Next to each
/// shared file a `.refs` file lists the owners (suggested keys) holding it.
pub struct FsBlobStore {
    root: PathBuf,
    addressing: Addressing,
    refs_lock: Arc<Mutex<()>>,
}

impl FsBlobStore {
    /// Open a content-addressable store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        Self::with_addressing(root.into(), Addressing::Content)
    }

    /// Open a store that files blobs under the suggested key
    pub fn key_addressed(root: impl Into<PathBuf>) -> StoreResult<Self> {
        Self::with_addressing(root.into(), Addressing::Key)
    }

    /// # Arguments
    /// * `root` - Directory holding blobs, with scratch space in `root/tmp`
    /// * `addressing` - How blob keys map to files
    fn with_addressing(root: PathBuf, addressing: Addressing) -> StoreResult<Self> {
        let tmp = root.join("tmp");
        std::fs::create_dir_all(&tmp)?;

        // Partial writes from an interrupted process
        clear_stale_temp_files(&tmp);

        info!(
            root = %root.display(),
            addressing = ?addressing,
            "Blob store opened"
        );
        Ok(Self {
            root,
            addressing,
            refs_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Whether blobs are keyed by content hash
    pub fn is_content_addressed(&self) -> bool {
        self.addressing == Addressing::Content
    }

    fn blob_path(&self, key: &str) -> StoreResult<PathBuf> {
        blob_path(&self.root, self.addressing, key)
    }
}

fn blob_path(root: &Path, addressing: Addressing, key: &str) -> StoreResult<PathBuf> {
    match addressing {
        Addressing::Content => {
            let is_hash = key.len() == 40 && key.bytes().all(|b| b.is_ascii_hexdigit());
            if !is_hash {
                return Err(StoreError::NotFound(key.to_string()));
            }
            Ok(root.join(&key[..2]).join(&key[2..]))
        }
        Addressing::Key => Ok(super::encoded_path(root, key, "blob")),
    }
}

fn clear_stale_temp_files(tmp: &Path) {
    if let Ok(read_dir) = std::fs::read_dir(tmp) {
        for entry in read_dir.flatten() {
            let path = entry.path();
            debug!(path = %path.display(), "Removing stale temp file");
            let _ = std::fs::remove_file(&path);
        }
    }
}

/// Owner list stored next to a content-addressed blob
fn refs_path(blob: &Path) -> PathBuf {
    blob.with_extension("refs")
}

fn read_owners(refs: &Path) -> StoreResult<BTreeSet<String>> {
    match std::fs::read(refs) {
        Ok(data) => Ok(serde_json::from_slice(&data)?),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeSet::new()),
        Err(e) => Err(StoreError::Io(e)),
    }
}

fn remove_if_present(path: &Path) -> StoreResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::Io(e)),
    }
}

/// Drop `owner` from a shared blob, deleting the blob when nobody holds it
///
/// # Returns
/// Number of owners still holding the blob
fn release_shared(lock: &Mutex<()>, blob: &Path, owner: &str) -> StoreResult<usize> {
    let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let refs = refs_path(blob);

    let mut owners = read_owners(&refs)?;
    owners.remove(owner);
    if !owners.is_empty() {
        write_atomic(&refs, &serde_json::to_vec(&owners)?)?;
        return Ok(owners.len());
    }

    remove_if_present(blob)?;
    remove_if_present(&refs)?;
    Ok(0)
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn create_write_stream(&self, suggested_key: &str) -> StoreResult<Box<dyn BlobSink>> {
        let tmp = tempfile::NamedTempFile::new_in(self.root.join("tmp"))?;
        let (file, temp_path) = tmp.into_parts();

        debug!(
            suggested_key = suggested_key,
            temp = %temp_path.display(),
            "Opened blob write stream"
        );

        Ok(Box::new(FsBlobSink {
            file: tokio::fs::File::from_std(file),
            temp_path,
            hasher: Sha1::new(),
            size: 0,
            root: self.root.clone(),
            addressing: self.addressing,
            refs_lock: Arc::clone(&self.refs_lock),
            suggested_key: suggested_key.to_string(),
        }))
    }

    async fn create_read_stream(&self, key: &str) -> StoreResult<BlobSource> {
        let path = self.blob_path(key)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| StoreError::from_io(key, e))?;
        Ok(Box::pin(file))
    }

    async fn remove(&self, key: &str, owner: &str) -> StoreResult<()> {
        let path = match self.blob_path(key) {
            Ok(path) => path,
            Err(StoreError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        if self.addressing == Addressing::Key {
            return match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(key = key, "Removed blob");
                    Ok(())
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(StoreError::Io(e)),
            };
        }

        let lock = Arc::clone(&self.refs_lock);
        let releasing = owner.to_string();
        let remaining = tokio::task::spawn_blocking(move || release_shared(&lock, &path, &releasing))
            .await
            .map_err(|e| StoreError::Backend(format!("blob release task failed: {e}")))??;

        debug!(key = key, owner = owner, remaining = remaining, "Released blob");
        Ok(())
    }
}

/// Sink writing to a temp file, hashing as it goes
struct FsBlobSink {
    file: tokio::fs::File,
    temp_path: tempfile::TempPath,
    hasher: Sha1,
    size: u64,
    root: PathBuf,
    addressing: Addressing,
    refs_lock: Arc<Mutex<()>>,
    suggested_key: String,
}

impl AsyncWrite for FsBlobSink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        let written = ready!(Pin::new(&mut this.file).poll_write(cx, buf))?;
        this.hasher.update(&buf[..written]);
        this.size += written as u64;
        Poll::Ready(Ok(written))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_shutdown(cx)
    }
}

#[async_trait]
impl BlobSink for FsBlobSink {
    async fn finish(self: Box<Self>) -> StoreResult<BlobReceipt> {
        let FsBlobSink {
            mut file,
            temp_path,
            hasher,
            size,
            root,
            addressing,
            refs_lock,
            suggested_key,
        } = *self;

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let hash = format!("{:x}", hasher.finalize());
        let key = match addressing {
            Addressing::Content => hash.clone(),
            Addressing::Key => suggested_key.clone(),
        };
        let path = blob_path(&root, addressing, &key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::task::spawn_blocking(move || -> StoreResult<()> {
            // Held across persist so a concurrent release cannot unlink the new file
            let _guard = refs_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            temp_path.persist(&path).map_err(|e| StoreError::Io(e.error))?;

            if addressing == Addressing::Content {
                let refs = refs_path(&path);
                let mut owners = read_owners(&refs)?;
                if owners.insert(suggested_key) {
                    write_atomic(&refs, &serde_json::to_vec(&owners)?)?;
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Backend(format!("blob persist task failed: {e}")))??;

        debug!(key = %key, size = size, "Stored blob");

        let fields = [("size", serde_json::Value::from(size)), ("sha1", hash.into())]
            .into_iter()
            .collect();
        Ok(BlobReceipt { key, fields })
    }
}

/// In-process, key-addressed blob store backed by an unbounded Moka cache
pub struct MemoryBlobStore {
    blobs: Cache<String, Bytes>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: Cache::builder().name("memory_blobs").build(),
        }
    }

    /// Whether a blob exists under `key`
    pub fn contains(&self, key: &str) -> bool {
        self.blobs.contains_key(key)
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn create_write_stream(&self, suggested_key: &str) -> StoreResult<Box<dyn BlobSink>> {
        Ok(Box::new(MemoryBlobSink {
            buffer: Vec::new(),
            key: suggested_key.to_string(),
            blobs: self.blobs.clone(),
        }))
    }

    async fn create_read_stream(&self, key: &str) -> StoreResult<BlobSource> {
        let data = self
            .blobs
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        Ok(Box::pin(io::Cursor::new(data)))
    }

    async fn remove(&self, key: &str, _owner: &str) -> StoreResult<()> {
        self.blobs.invalidate(key);
        Ok(())
    }
}

struct MemoryBlobSink {
    buffer: Vec<u8>,
    key: String,
    blobs: Cache<String, Bytes>,
}

impl AsyncWrite for MemoryBlobSink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.buffer.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl BlobSink for MemoryBlobSink {
    async fn finish(self: Box<Self>) -> StoreResult<BlobReceipt> {
        let size = self.buffer.len();
        self.blobs.insert(self.key.clone(), Bytes::from(self.buffer));
        Ok(BlobReceipt {
            key: self.key,
            fields: [("size", size)].into_iter().collect(),
        })
    }
}
