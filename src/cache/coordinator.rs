//! Cache Coordinator
//!
//! Ties key canonicalization, the blob store and the metadata store into
//! one API. Metadata is addressed by the canonical key; blobs by whatever
//! key the blob store assigned, which is recorded in the metadata.
//!
//! Writes go blob first, metadata second, so a failure in between leaves
//! an unreferenced blob rather than metadata pointing at nothing. There is
//! no locking: concurrent writers to one key race and the last metadata
//! write wins.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::blob::Blob;
use super::errors::{CacheError, CacheResult};
use super::object_url::ObjectUrlRegistry;
use super::options::CacheOptions;
use super::read_stream::CacheReadStream;
use super::request::CacheRequest;
use super::write_stream::CacheWriteStream;
use crate::http::{headers_to_metadata, HttpFetcher};
use crate::keys::{canonicalize, resolve_by_extension, UrlTransform, DEFAULT_CONTENT_TYPE};
use crate::store::metadata::{CONTENT_TYPE_FIELD, KEY_FIELD};
use crate::store::{
    BlobStore, FsBlobStore, FsMetadataStore, Metadata, MetadataStore, StoreError,
};

/// Hit/miss counters for `get`
#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Resource cache keyed by URL
#[derive(Clone)]
pub struct Cache {
    url_transform: UrlTransform,
    store: Arc<dyn BlobStore>,
    meta_db: Arc<dyn MetadataStore>,
    fetcher: HttpFetcher,
    object_urls: Arc<ObjectUrlRegistry>,
    counters: Arc<Counters>,
}

impl Cache {
    /// Create a cache, opening default stores for anything not supplied
    ///
    /// # Arguments
    /// * `options` - Stores, URL transform and HTTP settings; unset stores
    ///   are opened under `<root>/store` and `<root>/metadb`
    pub fn new(options: CacheOptions) -> CacheResult<Self> {
        let root = options.resolved_root_dir();

        let store: Arc<dyn BlobStore> = match options.store {
            Some(store) => store,
            None => Arc::new(FsBlobStore::open(root.join("store"))?),
        };
        let meta_db: Arc<dyn MetadataStore> = match options.meta_db {
            Some(meta_db) => meta_db,
            None => Arc::new(FsMetadataStore::open(root.join("metadb"))?),
        };
        let fetcher = match options.http_client {
            Some(client) => HttpFetcher::with_client(client),
            None => HttpFetcher::new(options.http_timeout)?,
        };
        let url_transform = options
            .url_transform
            .unwrap_or_else(|| Arc::new(canonicalize) as UrlTransform);

        info!(root = %root.display(), "Cache initialized");

        Ok(Self {
            url_transform,
            store,
            meta_db,
            fetcher,
            object_urls: Arc::new(ObjectUrlRegistry::new()),
            counters: Arc::new(Counters::default()),
        })
    }

    /// Canonical key for a URL under this cache's transform
    pub fn cache_key(&self, url: &str) -> String {
        (self.url_transform)(url)
    }

    /// Whether an entry exists for the request's URL
    pub async fn exists(&self, request: impl Into<CacheRequest>) -> CacheResult<bool> {
        let request = request.into();
        match self.meta_db.get(&self.cache_key(request.url())).await {
            Ok(metadata) => Ok(metadata.has_key()),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Open a sink for a new entry
    ///
    /// Extra fields on the request are stored with the entry. The entry is
    /// committed by [`CacheWriteStream::finish`].
    pub async fn create_write_stream(
        &self,
        request: impl Into<CacheRequest>,
    ) -> CacheResult<CacheWriteStream> {
        let request = request.into();
        let cache_key = self.cache_key(request.url());
        // content-addressable stores ignore the suggested key
        let sink = self.store.create_write_stream(&cache_key).await?;

        debug!(url = request.url(), cache_key = %cache_key, "Opened cache write stream");
        Ok(CacheWriteStream::new(
            sink,
            request,
            cache_key,
            Arc::clone(&self.meta_db),
            Arc::clone(&self.store),
        ))
    }

    /// Open a reader for an entry
    ///
    /// Returns at once; the metadata lookup happens on the first read. A
    /// missing entry surfaces as [`CacheError::KeyNotFound`] from that read.
    pub fn create_read_stream(&self, request: impl Into<CacheRequest>) -> CacheReadStream {
        let url = request.into().url().to_string();
        let cache_key = self.cache_key(&url);
        let meta_db = Arc::clone(&self.meta_db);
        let store = Arc::clone(&self.store);
        let missing_url = url.clone();

        let lookup = async move {
            let metadata = match meta_db.get(&cache_key).await {
                Ok(metadata) => metadata,
                Err(e) if e.is_not_found() => return Err(CacheError::KeyNotFound(missing_url)),
                Err(e) => return Err(e.into()),
            };
            let Some(blob_key) = metadata.blob_key() else {
                return Err(CacheError::KeyNotFound(missing_url));
            };
            Ok(store.create_read_stream(blob_key).await?)
        };

        CacheReadStream::new(url, Box::pin(lookup))
    }

    /// Remove an entry; removing a missing entry succeeds
    ///
    /// The metadata record goes first, then this entry's hold on the blob.
    /// A blob shared with other entries stays until the last one is removed.
    ///
    /// # Returns
    /// The metadata error if both deletions fail, else whichever failed
    pub async fn remove(&self, request: impl Into<CacheRequest>) -> CacheResult<()> {
        let request = request.into();
        let cache_key = self.cache_key(request.url());

        // Need the blob key before the record disappears
        let metadata = match self.meta_db.get(&cache_key).await {
            Ok(metadata) => metadata,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        // Attempt both even if the first fails
        let meta_result = self.meta_db.delete(&cache_key).await;
        let blob_result = match metadata.blob_key() {
            Some(blob_key) => self.store.remove(blob_key, &cache_key).await,
            None => Ok(()),
        };

        if let (Ok(()), Err(e)) = (&meta_result, &blob_result) {
            warn!(url = request.url(), error = %e, "Metadata removed but blob removal failed");
        }

        meta_result?;
        blob_result?;
        debug!(url = request.url(), cache_key = %cache_key, "Removed entry");
        Ok(())
    }

    /// Store a blob under the request's URL
    ///
    /// The blob's content type is recorded, overriding whatever the caller
    /// or the blob store said. Returns the stored metadata.
    pub async fn put(&self, request: impl Into<CacheRequest>, blob: Blob) -> CacheResult<Metadata> {
        let request = request.into();
        let overrides: Metadata = [(CONTENT_TYPE_FIELD, blob.content_type())]
            .into_iter()
            .collect();

        let mut stream = self
            .create_write_stream(request)
            .await?
            .with_overrides(overrides);
        stream.write_all(blob.data()).await?;
        stream.finish().await
    }

    /// Fetch an entry as a typed blob
    ///
    /// The content type comes from the URL's extension when it is a known
    /// image type, else from the stored metadata, else
    /// `application/octet-stream`.
    pub async fn get(&self, request: impl Into<CacheRequest>) -> CacheResult<Blob> {
        let url = request.into().url().to_string();

        let (data, content_type) = tokio::join!(
            self.create_read_stream(url.as_str()).collect(),
            self.content_type(&url)
        );

        let data = match data {
            Ok(data) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                data
            }
            Err(e) => {
                if e.is_not_found() {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                }
                return Err(e);
            }
        };

        Ok(Blob::from_parts(data, content_type?))
    }

    /// Download `url` and store the response body
    ///
    /// Response headers are kept as metadata fields.
    pub async fn download(&self, url: &str) -> CacheResult<Metadata> {
        let mut response = self.fetcher.get(url).await?;

        let mut options = headers_to_metadata(response.headers());
        options.set(KEY_FIELD, url);

        let mut stream = self.create_write_stream(options).await?;
        let mut size = 0;
        while let Some(chunk) = response.chunk().await? {
            size += chunk.len();
            stream.write_all(&chunk).await?;
        }

        debug!(url = url, size = size, "Downloaded resource");
        stream.finish().await
    }

    /// Fetch an entry and register it as an object URL
    ///
    /// The URL stays valid until passed to [`Cache::revoke_object_url`].
    pub async fn get_object_url(&self, request: impl Into<CacheRequest>) -> CacheResult<String> {
        let blob = self.get(request).await?;
        Ok(self.object_urls.create(blob))
    }

    /// Release an object URL; returns whether it was live
    pub fn revoke_object_url(&self, object_url: &str) -> bool {
        self.object_urls.revoke(object_url)
    }

    /// Registry backing [`Cache::get_object_url`]
    pub fn object_urls(&self) -> &ObjectUrlRegistry {
        &self.object_urls
    }

    /// Get statistics for `get`
    ///
    /// Returns (hits, misses, hit_rate)
    pub fn stats(&self) -> (u64, u64, f64) {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        (hits, misses, hit_rate)
    }

    /// Log current cache metrics
    pub fn log_metrics(&self) {
        let (hits, misses, hit_rate) = self.stats();
        debug!(
            hits = hits,
            misses = misses,
            hit_rate = format!("{:.1}%", hit_rate),
            object_urls = self.object_urls.len(),
            "Cache metrics"
        );
    }

    /// Content type `get` would serve for `url`
    ///
    /// Checked in order: a known image extension on the URL, the recorded
    /// `content-type`, then `application/octet-stream`. The extension wins
    /// even over a recorded type.
    pub async fn content_type(&self, url: &str) -> CacheResult<String> {
        if let Some(content_type) = resolve_by_extension(url) {
            return Ok(content_type.to_string());
        }

        match self.meta_db.get(&self.cache_key(url)).await {
            Ok(metadata) => Ok(metadata
                .content_type()
                .filter(|content_type| !content_type.is_empty())
                .unwrap_or(DEFAULT_CONTENT_TYPE)
                .to_string()),
            Err(StoreError::NotFound(_)) => Ok(DEFAULT_CONTENT_TYPE.to_string()),
            Err(e) => Err(e.into()),
        }
    }
}
