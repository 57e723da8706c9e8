//! HTTP transport used by downloads

pub mod fetch;

pub use fetch::{headers_to_metadata, HttpFetcher, DEFAULT_TIMEOUT};
