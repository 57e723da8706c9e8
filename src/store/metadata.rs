//! Metadata records and the stores that persist them
//!
//! A record is a flat JSON object describing one cached blob: the original
//! URL, its content type, the key the blob store assigned to it, and any
//! extra fields the caller forwarded (usually HTTP response headers).

use std::path::PathBuf;

use async_trait::async_trait;
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::errors::{StoreError, StoreResult};
use super::write_atomic;

/// Field holding the original (non-canonical) URL
pub const KEY_FIELD: &str = "key";
/// Field holding the MIME type recorded at write time
pub const CONTENT_TYPE_FIELD: &str = "content-type";
/// Field holding the key assigned by the blob store
pub const BLOB_KEY_FIELD: &str = "blob-key";

/// Metadata record for a cached blob
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(Map<String, Value>);

impl Metadata {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record holding only `key`
    pub fn with_key(key: impl Into<String>) -> Self {
        let mut metadata = Self::new();
        metadata.set(KEY_FIELD, key.into());
        metadata
    }

    /// Get a field value
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Get a field if it holds a string
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// Set a field, replacing any previous value
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    /// Overlay every field of `other` onto this record
    pub fn merge(&mut self, other: &Metadata) {
        for (field, value) in &other.0 {
            self.0.insert(field.clone(), value.clone());
        }
    }

    /// Original URL the entry was stored under
    pub fn key(&self) -> Option<&str> {
        self.get_str(KEY_FIELD)
    }

    /// Recorded content type
    pub fn content_type(&self) -> Option<&str> {
        self.get_str(CONTENT_TYPE_FIELD)
    }

    /// Key assigned by the blob store, if it is usable
    pub fn blob_key(&self) -> Option<&str> {
        self.get_str(BLOB_KEY_FIELD).filter(|key| !key.is_empty())
    }

    /// Whether `key` is present and truthy (non-empty, non-zero, non-null, non-false)
    pub fn has_key(&self) -> bool {
        match self.get(KEY_FIELD) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
            Some(Value::Array(_)) | Some(Value::Object(_)) => true,
        }
    }

    /// Iterate over all fields
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Metadata {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Key-value store for metadata records, addressed by canonical cache key
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Fetch a record; missing keys yield [`StoreError::NotFound`]
    async fn get(&self, key: &str) -> StoreResult<Metadata>;

    /// Store a record, overwriting any previous one
    async fn put(&self, key: &str, record: &Metadata) -> StoreResult<()>;

    /// Delete a record; deleting a missing key succeeds
    async fn delete(&self, key: &str) -> StoreResult<()>;
}

/// Embedded on-disk metadata store
///
/// Each record is a JSON file whose name is derived from the key.
/// Writes go through a temp file and an atomic rename.
pub struct FsMetadataStore {
    root: PathBuf,
}

impl FsMetadataStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        info!(root = %root.display(), "Metadata store opened");
        Ok(Self { root })
    }

    fn record_path(&self, key: &str) -> PathBuf {
        super::encoded_path(&self.root, key, "json")
    }
}

#[async_trait]
impl MetadataStore for FsMetadataStore {
    async fn get(&self, key: &str) -> StoreResult<Metadata> {
        let data = tokio::fs::read(self.record_path(key))
            .await
            .map_err(|e| StoreError::from_io(key, e))?;
        Ok(serde_json::from_slice(&data)?)
    }

    async fn put(&self, key: &str, record: &Metadata) -> StoreResult<()> {
        let path = self.record_path(key);
        let data = serde_json::to_vec(record)?;

        tokio::task::spawn_blocking(move || write_atomic(&path, &data))
            .await
            .map_err(|e| StoreError::Backend(format!("metadata write task failed: {e}")))??;

        debug!(key = key, "Stored metadata record");
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        match tokio::fs::remove_file(self.record_path(key)).await {
            Ok(()) => {
                debug!(key = key, "Deleted metadata record");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

/// In-process metadata store backed by an unbounded Moka cache
pub struct MemoryMetadataStore {
    records: Cache<String, Metadata>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self {
            records: Cache::builder().name("metadata_records").build(),
        }
    }

    /// Whether a record exists for `key`
    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }
}

impl Default for MemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn get(&self, key: &str) -> StoreResult<Metadata> {
        self.records
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, record: &Metadata) -> StoreResult<()> {
        self.records.insert(key.to_string(), record.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.records.invalidate(key);
        Ok(())
    }
}
