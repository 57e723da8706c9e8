//! Typed byte payloads

use bytes::Bytes;

use super::errors::{CacheError, CacheResult};

/// Byte payload with a MIME type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    data: Bytes,
    content_type: String,
}

impl Blob {
    /// Create a blob, rejecting malformed content types
    ///
    /// An empty content type is allowed and means "unknown". Anything else
    /// must parse as a MIME type, optionally followed by parameters.
    pub fn new(data: impl Into<Bytes>, content_type: impl Into<String>) -> CacheResult<Self> {
        let content_type = content_type.into();
        if !content_type.is_empty() {
            if let Err(e) = content_type.parse::<mime::Mime>() {
                return Err(CacheError::Validation(format!(
                    "invalid content type {content_type:?}: {e}"
                )));
            }
        }
        Ok(Self::from_parts(data, content_type))
    }

    /// Create a blob of unknown type
    pub fn untyped(data: impl Into<Bytes>) -> Self {
        Self::from_parts(data, String::new())
    }

    /// Trusted constructor for types coming out of the cache
    pub(crate) fn from_parts(data: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            content_type: content_type.into(),
        }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// MIME type, empty when unknown
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_mime_types() {
        let blob = Blob::new(&b"\x89PNG"[..], "image/png").unwrap();
        assert_eq!(blob.content_type(), "image/png");
        assert_eq!(blob.len(), 4);

        assert!(Blob::new(Vec::<u8>::new(), "text/plain; charset=utf-8").is_ok());
        assert!(Blob::new(Vec::<u8>::new(), "application/vnd.mapbox-vector-tile").is_ok());
        assert!(Blob::new(Vec::<u8>::new(), "").is_ok());
    }

    #[test]
    fn test_rejects_malformed_types() {
        for bad in ["png", "image/png/extra", "image png/x", "image/png; charset"] {
            let err = Blob::new(Vec::<u8>::new(), bad).unwrap_err();
            assert!(matches!(err, CacheError::Validation(_)), "{bad} accepted");
        }
    }

    #[test]
    fn test_untyped() {
        let blob = Blob::untyped(vec![1u8, 2, 3]);
        assert_eq!(blob.content_type(), "");
        assert_eq!(blob.into_data(), Bytes::from_static(&[1, 2, 3]));
    }
}
