//! Request normalization
//!
//! Every cache operation accepts either a bare URL or an options record
//! carrying `key` plus extra metadata. Both are turned into a
//! [`CacheRequest`] before any work happens.

use serde_json::Value;

use crate::store::metadata::Metadata;

/// URL used when the request carries no string `key`
pub const MISSING_KEY: &str = "undefined";

/// Normalized request: the URL plus caller-supplied metadata
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheRequest {
    options: Metadata,
}

impl CacheRequest {
    /// Request for a bare URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            options: Metadata::with_key(url),
        }
    }

    /// Add a metadata field to store with the entry
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.set(field, value);
        self
    }

    /// URL the request is about
    ///
    /// A missing or non-string `key` yields the literal `"undefined"`.
    pub fn url(&self) -> &str {
        self.options.key().unwrap_or(MISSING_KEY)
    }

    /// Caller-supplied metadata, including `key`
    pub fn options(&self) -> &Metadata {
        &self.options
    }

    pub fn into_options(self) -> Metadata {
        self.options
    }
}

impl From<&str> for CacheRequest {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

impl From<String> for CacheRequest {
    fn from(url: String) -> Self {
        Self::new(url)
    }
}

impl From<&String> for CacheRequest {
    fn from(url: &String) -> Self {
        Self::new(url.as_str())
    }
}

impl From<Metadata> for CacheRequest {
    fn from(options: Metadata) -> Self {
        Self { options }
    }
}

/// Strings are URLs, objects are options records, anything else has no key
impl From<Value> for CacheRequest {
    fn from(value: Value) -> Self {
        match value {
            Value::String(url) => Self::new(url),
            Value::Object(map) => Self::from(Metadata::from(map)),
            _ => Self::default(),
        }
    }
}
