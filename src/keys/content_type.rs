//! Content-type guessing from file extensions
//!
//! Only the image formats commonly served by tile servers are recognized.

/// Content type served when nothing better is known
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

const CONTENT_TYPES: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("webp", "image/webp"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
];

/// Guess a content type from the extension of a path or URL
///
/// Accepts a bare extension (`"png"`), a dotted one (`".png"`) or a full
/// path. Returns `None` for unknown or missing extensions.
pub fn resolve_by_extension(path: &str) -> Option<&'static str> {
    let extension = extension(path)?.to_ascii_lowercase();
    CONTENT_TYPES
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, content_type)| *content_type)
}

/// Extension of the last path segment
///
/// A sentinel `x.` prefix lets bare extensions resolve while anything
/// containing a `/` is judged by its final segment only.
fn extension(path: &str) -> Option<String> {
    if path.is_empty() {
        return None;
    }
    let prefixed = format!("x.{path}");
    let file_name = prefixed.rsplit('/').next().unwrap_or(&prefixed);

    match file_name.rfind('.') {
        Some(0) | None => None,
        Some(dot) => Some(file_name[dot + 1..].to_string()),
    }
}
