//! Shared test helpers

#![allow(dead_code)]

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tempfile::TempDir;
use tile_blob_cache::store::{
    BlobReceipt, BlobSink, BlobSource, BlobStore, MemoryBlobStore, MemoryMetadataStore, Metadata,
    MetadataStore, StoreError, StoreResult,
};
use tile_blob_cache::{Cache, CacheOptions};
use tokio::io::AsyncWrite;

static TRACING: Once = Once::new();

/// Install a test subscriber honouring RUST_LOG
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Cache backed by the default filesystem stores in a temp directory
pub fn fs_cache() -> (Cache, TempDir) {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let cache = Cache::new(CacheOptions::new().root_dir(dir.path())).unwrap();
    (cache, dir)
}

/// Metadata store whose operations can be switched to fail
#[derive(Default)]
pub struct FlakyMetadataStore {
    inner: MemoryMetadataStore,
    pub fail_get: AtomicBool,
    pub fail_put: AtomicBool,
    pub fail_delete: AtomicBool,
}

impl FlakyMetadataStore {
    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains(key)
    }
}

fn injected(operation: &str) -> StoreError {
    StoreError::Backend(format!("injected {operation} failure"))
}

#[async_trait]
impl MetadataStore for FlakyMetadataStore {
    async fn get(&self, key: &str) -> StoreResult<Metadata> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(injected("metadata get"));
        }
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, record: &Metadata) -> StoreResult<()> {
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(injected("metadata put"));
        }
        self.inner.put(key, record).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(injected("metadata delete"));
        }
        self.inner.delete(key).await
    }
}

/// Blob store whose commits and removals can be switched to fail
#[derive(Default)]
pub struct FlakyBlobStore {
    pub inner: MemoryBlobStore,
    pub fail_finish: AtomicBool,
    pub fail_remove: AtomicBool,
}

#[async_trait]
impl BlobStore for FlakyBlobStore {
    async fn create_write_stream(&self, suggested_key: &str) -> StoreResult<Box<dyn BlobSink>> {
        let inner = self.inner.create_write_stream(suggested_key).await?;
        if self.fail_finish.load(Ordering::SeqCst) {
            return Ok(Box::new(FailingSink { inner }));
        }
        Ok(inner)
    }

    async fn create_read_stream(&self, key: &str) -> StoreResult<BlobSource> {
        self.inner.create_read_stream(key).await
    }

    async fn remove(&self, key: &str, owner: &str) -> StoreResult<()> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(injected("blob remove"));
        }
        self.inner.remove(key, owner).await
    }
}

/// Sink that accepts writes but never commits
struct FailingSink {
    inner: Box<dyn BlobSink>,
}

impl AsyncWrite for FailingSink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[async_trait]
impl BlobSink for FailingSink {
    async fn finish(self: Box<Self>) -> StoreResult<BlobReceipt> {
        Err(injected("blob finish"))
    }
}

/// Cache wired to flaky stores
pub fn flaky_cache() -> (Cache, Arc<FlakyBlobStore>, Arc<FlakyMetadataStore>) {
    init_tracing();
    let blobs = Arc::new(FlakyBlobStore::default());
    let records = Arc::new(FlakyMetadataStore::default());
    let cache = Cache::new(
        CacheOptions::new()
            .store(Arc::clone(&blobs))
            .meta_db(Arc::clone(&records)),
    )
    .unwrap();
    (cache, blobs, records)
}
