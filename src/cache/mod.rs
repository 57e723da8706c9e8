//! Resource cache
//!
//! [`Cache`] stores downloaded resources (mainly map tiles and other images)
//! for offline use, keyed by canonicalized URL.

pub mod blob;
pub mod coordinator;
pub mod errors;
pub mod object_url;
pub mod options;
pub mod read_stream;
pub mod request;
pub mod write_stream;

pub use blob::Blob;
pub use coordinator::Cache;
pub use errors::{CacheError, CacheResult};
pub use object_url::ObjectUrlRegistry;
pub use options::CacheOptions;
pub use read_stream::{CacheReadStream, ReadPhase};
pub use request::CacheRequest;
pub use write_stream::CacheWriteStream;
