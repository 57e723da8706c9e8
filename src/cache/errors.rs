//! Cache Error Types
//!
//! Store failures pass through untouched; the coordinator only adds the
//! cases it detects itself.

use std::io;

use crate::store::StoreError;

/// Cache operation error types
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("expected blob: {0}")]
    Validation(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} while downloading {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Stream error: {0}")]
    Io(io::Error),
}

impl CacheError {
    /// Whether the requested entry is simply not cached
    pub fn is_not_found(&self) -> bool {
        match self {
            CacheError::KeyNotFound(_) => true,
            CacheError::Store(e) => e.is_not_found(),
            _ => false,
        }
    }
}

/// Carry a cache error through `AsyncRead`/`AsyncWrite`
impl From<CacheError> for io::Error {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Io(e) => e,
            other => {
                let kind = if other.is_not_found() {
                    io::ErrorKind::NotFound
                } else {
                    io::ErrorKind::Other
                };
                io::Error::new(kind, other)
            }
        }
    }
}

/// Recover a cache error that travelled through an I/O stream
impl From<io::Error> for CacheError {
    fn from(err: io::Error) -> Self {
        let is_cache_error = err
            .get_ref()
            .is_some_and(|inner| inner.is::<CacheError>());
        if !is_cache_error {
            return CacheError::Io(err);
        }
        match err.into_inner().map(|inner| inner.downcast::<CacheError>()) {
            Some(Ok(cache_err)) => *cache_err,
            _ => CacheError::Io(io::Error::other("unrecoverable stream error")),
        }
    }
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_not_found_message_contains_url() {
        let err = CacheError::KeyNotFound("http://t1.example.com/a.png".to_string());
        assert_eq!(err.to_string(), "key not found: http://t1.example.com/a.png");
    }

    #[test]
    fn test_store_errors_are_transparent() {
        let err = CacheError::from(StoreError::Backend("disk full".to_string()));
        assert_eq!(err.to_string(), "Store backend error: disk full");
        assert!(!err.is_not_found());
        assert!(CacheError::from(StoreError::NotFound("k".to_string())).is_not_found());
    }

    #[test]
    fn test_survives_io_round_trip() {
        let io_err = io::Error::from(CacheError::KeyNotFound("u".to_string()));
        assert_eq!(io_err.kind(), io::ErrorKind::NotFound);

        match CacheError::from(io_err) {
            CacheError::KeyNotFound(url) => assert_eq!(url, "u"),
            other => panic!("Expected KeyNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_plain_io_errors_stay_io() {
        let err = CacheError::from(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(matches!(err, CacheError::Io(e) if e.kind() == io::ErrorKind::BrokenPipe));
    }
}
