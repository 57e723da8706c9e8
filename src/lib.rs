//! Tile Blob Cache - offline cache for map tiles and other web resources
//!
//! Resources are stored by URL in a pluggable blob store, with a metadata
//! record per entry in a pluggable key-value store. URLs are canonicalized
//! first, so a tile fetched from `t1.tiles.example.com` over `https` is
//! found again when requested from `t2.tiles.example.com` over `http`.

pub mod cache;
pub mod http;
pub mod keys;
pub mod store;

pub use cache::{
    Blob, Cache, CacheError, CacheOptions, CacheReadStream, CacheRequest, CacheResult,
    CacheWriteStream,
};
pub use store::{Metadata, StoreError};
