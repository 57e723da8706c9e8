//! Store Error Types
//!
//! Shared by blob and metadata stores. `NotFound` is kept distinct from
//! backend failures so callers can treat a missing key as a normal outcome.

/// Store error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether this error only means the key is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Map an I/O error on `key`, turning `ENOENT` into `NotFound`
    pub fn from_io(key: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            StoreError::NotFound(key.to_string())
        } else {
            StoreError::Io(err)
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
