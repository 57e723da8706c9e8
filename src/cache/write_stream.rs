//! Cache write streams
//!
//! Bytes go to the blob store first; the metadata record is written only
//! once the blob store has confirmed the write. A metadata failure at that
//! point leaves an orphaned blob, which is reported to the caller and left
//! for external cleanup. Overwriting an entry releases the blob it used to
//! point at.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;
use tracing::{debug, warn};

use super::errors::CacheResult;
use super::request::CacheRequest;
use crate::store::metadata::{Metadata, BLOB_KEY_FIELD, KEY_FIELD};
use crate::store::{BlobSink, BlobStore, MetadataStore};

/// Sink for a new cache entry
///
/// Write the payload through [`AsyncWrite`], then call
/// [`CacheWriteStream::finish`] to commit it.
pub struct CacheWriteStream {
    sink: Box<dyn BlobSink>,
    request: CacheRequest,
    overrides: Metadata,
    meta_key: String,
    meta_db: Arc<dyn MetadataStore>,
    store: Arc<dyn BlobStore>,
}

impl CacheWriteStream {
    pub(crate) fn new(
        sink: Box<dyn BlobSink>,
        request: CacheRequest,
        meta_key: String,
        meta_db: Arc<dyn MetadataStore>,
        store: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            sink,
            request,
            overrides: Metadata::new(),
            meta_key,
            meta_db,
            store,
        }
    }

    /// Fields that win over anything the blob store reports
    pub(crate) fn with_overrides(mut self, overrides: Metadata) -> Self {
        self.overrides = overrides;
        self
    }

    /// Original URL of the entry being written
    pub fn url(&self) -> &str {
        self.request.url()
    }

    /// Canonical key the metadata will be stored under
    pub fn cache_key(&self) -> &str {
        &self.meta_key
    }

    /// Commit the blob and persist its metadata
    ///
    /// The record is layered as: caller fields, then blob store fields, then
    /// `key` (the original URL) and `blob-key` (the store-assigned key).
    ///
    /// # Returns
    /// The metadata record as stored
    ///
    /// # Errors
    /// A blob store failure leaves no metadata behind. A metadata store
    /// failure leaves the new blob orphaned and any previous entry intact.
    pub async fn finish(self) -> CacheResult<Metadata> {
        let CacheWriteStream {
            sink,
            request,
            overrides,
            meta_key,
            meta_db,
            store,
        } = self;

        let receipt = sink.finish().await?;

        // Blob the entry pointed at before this write, if any
        let previous = match meta_db.get(&meta_key).await {
            Ok(record) => record.blob_key().map(str::to_string),
            Err(e) => {
                if !e.is_not_found() {
                    debug!(cache_key = %meta_key, error = %e, "Could not read previous record");
                }
                None
            }
        };

        let mut metadata = request.options().clone();
        metadata.merge(&receipt.fields);
        metadata.merge(&overrides);
        metadata.set(KEY_FIELD, request.url());
        metadata.set(BLOB_KEY_FIELD, receipt.key.as_str());

        if let Err(e) = meta_db.put(&meta_key, &metadata).await {
            warn!(
                url = request.url(),
                blob_key = %receipt.key,
                error = %e,
                "Blob stored but metadata write failed, blob is orphaned"
            );
            return Err(e.into());
        }

        // Same key means the store already replaced or re-held it
        if let Some(previous) = previous.filter(|previous| *previous != receipt.key) {
            if let Err(e) = store.remove(&previous, &meta_key).await {
                warn!(
                    url = request.url(),
                    blob_key = %previous,
                    error = %e,
                    "Entry overwritten but previous blob could not be released"
                );
            }
        }

        debug!(
            url = request.url(),
            cache_key = %meta_key,
            blob_key = %receipt.key,
            "Cached entry"
        );
        Ok(metadata)
    }
}

impl AsyncWrite for CacheWriteStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.sink).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.sink).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.sink).poll_shutdown(cx)
    }
}
