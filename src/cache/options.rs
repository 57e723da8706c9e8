//! Cache construction options
//!
//! Everything is optional. Unset stores default to the filesystem stores
//! under the platform cache directory, and an unset URL transform falls back
//! to [`canonicalize`](crate::keys::canonicalize).

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::http::DEFAULT_TIMEOUT;
use crate::keys::UrlTransform;
use crate::store::{BlobStore, MemoryBlobStore, MemoryMetadataStore, MetadataStore};

/// Environment variable overriding the cache root directory
pub const ENV_CACHE_DIR: &str = "TILE_CACHE_DIR";
/// Environment variable overriding the download timeout, in seconds
pub const ENV_HTTP_TIMEOUT: &str = "TILE_CACHE_HTTP_TIMEOUT_SECS";

/// Options accepted by [`Cache::new`](super::Cache::new)
#[derive(Clone)]
pub struct CacheOptions {
    pub(crate) url_transform: Option<UrlTransform>,
    pub(crate) store: Option<Arc<dyn BlobStore>>,
    pub(crate) meta_db: Option<Arc<dyn MetadataStore>>,
    pub(crate) http_client: Option<reqwest::Client>,
    pub(crate) root_dir: Option<PathBuf>,
    pub(crate) http_timeout: Duration,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self {
            url_transform: None,
            store: None,
            meta_db: None,
            http_client: None,
            root_dir: None,
            http_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Options with both stores kept in memory
    pub fn in_memory() -> Self {
        Self::new()
            .store(Arc::new(MemoryBlobStore::new()))
            .meta_db(Arc::new(MemoryMetadataStore::new()))
    }

    /// Options read from the environment
    ///
    /// * `TILE_CACHE_DIR` - root directory for the default stores
    /// * `TILE_CACHE_HTTP_TIMEOUT_SECS` - download timeout
    pub fn from_env() -> Self {
        Self::from_vars(
            env::var_os(ENV_CACHE_DIR),
            env::var(ENV_HTTP_TIMEOUT).ok(),
        )
    }

    /// # Arguments
    /// * `cache_dir` - Value of `TILE_CACHE_DIR`, ignored when empty
    /// * `http_timeout` - Value of `TILE_CACHE_HTTP_TIMEOUT_SECS`, ignored
    ///   with a warning when not a whole number of seconds
    fn from_vars(cache_dir: Option<OsString>, http_timeout: Option<String>) -> Self {
        let mut options = Self::new();

        if let Some(dir) = cache_dir.filter(|dir| !dir.is_empty()) {
            options.root_dir = Some(PathBuf::from(dir));
        }

        if let Some(raw) = http_timeout {
            match raw.parse::<u64>() {
                Ok(secs) => options.http_timeout = Duration::from_secs(secs),
                Err(e) => warn!(value = %raw, error = %e, "Ignoring invalid {}", ENV_HTTP_TIMEOUT),
            }
        }

        options
    }

    /// Replace the default URL canonicalization
    pub fn url_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.url_transform = Some(Arc::new(transform));
        self
    }

    /// Blob store to keep payloads in
    pub fn store<S: BlobStore + 'static>(mut self, store: Arc<S>) -> Self {
        self.store = Some(store);
        self
    }

    /// Metadata store to keep records in
    pub fn meta_db<M: MetadataStore + 'static>(mut self, meta_db: Arc<M>) -> Self {
        self.meta_db = Some(meta_db);
        self
    }

    /// HTTP client used by downloads
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Root directory for the default filesystem stores
    pub fn root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.root_dir = Some(dir.into());
        self
    }

    /// Timeout for the default HTTP client
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Root directory the default stores will use
    pub fn resolved_root_dir(&self) -> PathBuf {
        self.root_dir.clone().unwrap_or_else(default_root_dir)
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// `<platform cache dir>/tile-blob-cache`
pub fn default_root_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("tile-blob-cache")
}
