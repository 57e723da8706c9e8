//! HTTP fetching for downloads
//!
//! Thin wrapper around a reqwest client. The timeout lives here, in the
//! transport; the cache itself never times out or retries.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, Response};
use tracing::debug;

use crate::cache::errors::{CacheError, CacheResult};
use crate::store::Metadata;

/// Default HTTP client timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Issues GET requests for the cache
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher with its own client
    pub fn new(timeout: Duration) -> CacheResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// GET `url`, failing on non-success statuses
    pub async fn get(&self, url: &str) -> CacheResult<Response> {
        debug!(url = url, "Fetching resource");

        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CacheError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response)
    }
}

/// Turn response headers into metadata fields
///
/// Names are lowercase; repeated headers are joined with `", "`. Values
/// that are not valid UTF-8 are converted lossily.
pub fn headers_to_metadata(headers: &HeaderMap) -> Metadata {
    let mut metadata = Metadata::new();
    for name in headers.keys() {
        let value = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect::<Vec<_>>()
            .join(", ");
        metadata.set(name.as_str(), value);
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, CONTENT_TYPE, ETAG, VARY};

    #[test]
    fn test_headers_to_metadata() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("image/png"));
        headers.insert(ETAG, HeaderValue::from_static("\"abc\""));
        headers.append(VARY, HeaderValue::from_static("Accept"));
        headers.append(VARY, HeaderValue::from_static("Origin"));

        let metadata = headers_to_metadata(&headers);
        assert_eq!(metadata.content_type(), Some("image/png"));
        assert_eq!(metadata.get_str("etag"), Some("\"abc\""));
        assert_eq!(metadata.get_str("vary"), Some("Accept, Origin"));
        assert_eq!(metadata.len(), 3);
    }

    #[test]
    fn test_fetcher_builds() {
        assert!(HttpFetcher::new(Duration::from_secs(5)).is_ok());
    }
}
