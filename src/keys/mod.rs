//! Cache key derivation
//!
//! Turns raw resource URLs into lookup keys and guesses content types
//! from file extensions.

pub mod canonical;
pub mod content_type;

pub use canonical::{canonicalize, UrlTransform};
pub use content_type::{resolve_by_extension, DEFAULT_CONTENT_TYPE};
