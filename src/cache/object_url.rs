//! Object URL Tracking
//!
//! Hands out `blob:` URLs that refer to in-memory blobs. Each URL stays
//! valid until it is revoked; nothing is ever revoked automatically.

use std::sync::atomic::{AtomicU64, Ordering};

use moka::sync::Cache;
use tracing::debug;

use super::blob::Blob;

/// Scheme and authority of every object URL handed out
const OBJECT_URL_PREFIX: &str = "blob:tile-blob-cache/";

/// Registry of live object URLs
pub struct ObjectUrlRegistry {
    /// Map from object URL to the blob it references
    urls: Cache<String, Blob>,
    /// Next object URL id to assign
    next_id: AtomicU64,
}

impl ObjectUrlRegistry {
    pub fn new() -> Self {
        Self {
            urls: Cache::builder().name("object_urls").build(),
            // Start at 1 so ids read naturally in logs
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a blob and return a URL referencing it
    pub fn create(&self, blob: Blob) -> String {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let url = format!("{OBJECT_URL_PREFIX}{id}");
        debug!(url = %url, size = blob.len(), "Created object URL");
        self.urls.insert(url.clone(), blob);
        url
    }

    /// Look up the blob behind an object URL
    pub fn resolve(&self, url: &str) -> Option<Blob> {
        self.urls.get(url)
    }

    /// Release an object URL; returns whether it was live
    pub fn revoke(&self, url: &str) -> bool {
        let existed = self.urls.remove(url).is_some();
        if existed {
            debug!(url = url, "Revoked object URL");
        }
        existed
    }

    /// Number of live object URLs
    pub fn len(&self) -> u64 {
        self.urls.run_pending_tasks();
        self.urls.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ObjectUrlRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_resolve_revoke() {
        let registry = ObjectUrlRegistry::new();
        let blob = Blob::new(vec![1u8, 2, 3], "image/png").unwrap();

        let url = registry.create(blob.clone());
        assert!(url.starts_with("blob:tile-blob-cache/"));
        assert_eq!(registry.resolve(&url), Some(blob));
        assert_eq!(registry.len(), 1);

        assert!(registry.revoke(&url));
        assert!(!registry.revoke(&url));
        assert_eq!(registry.resolve(&url), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_urls_are_unique() {
        let registry = ObjectUrlRegistry::new();
        let a = registry.create(Blob::untyped(vec![0u8]));
        let b = registry.create(Blob::untyped(vec![0u8]));
        assert_ne!(a, b);
    }
}
