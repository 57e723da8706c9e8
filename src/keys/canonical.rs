//! URL Canonicalization
//!
//! Map tile services shard downloads across numbered subdomains
//! (`t1.tiles.example.com`, `t2.tiles.example.com`, ...) to get past browser
//! limits on parallel requests per host. The tiles behind those hosts are
//! duplicates, so the default transform drops the trailing digit of every
//! subdomain label and strips the scheme, collapsing all mirrors of a tile
//! onto one cache key.
//!
//! This is a best guess. Two different resources that only differ by such a
//! subdomain digit (`img1.example.com/a.jpg` vs `img2.example.com/a.jpg`)
//! share one key and only the last one written is retrievable.

use std::sync::Arc;

use url::{Host, Position, Url};

/// Custom canonicalization function, fully replacing [`canonicalize`]
pub type UrlTransform = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Canonicalize a raw URL into a cache key
///
/// Never fails: input that cannot be parsed as a URL is returned with only
/// its scheme prefix removed.
///
/// # Example
/// ```
/// use tile_blob_cache::keys::canonicalize;
///
/// assert_eq!(
///     canonicalize("http://ecn.t1.tiles.virtualearth.net/tiles/a0313131311301.jpeg"),
///     "ecn.t.tiles.virtualearth.net/tiles/a0313131311301.jpeg"
/// );
/// ```
pub fn canonicalize(url: &str) -> String {
    match parse(url) {
        Some(parsed) if parsed.has_authority() => without_scheme(&parsed),
        Some(parsed) => parsed.as_str().to_string(),
        None => strip_scheme(url).to_string(),
    }
}

/// Parse absolute and protocol-relative (`//host/path`) URLs
fn parse(url: &str) -> Option<Url> {
    if url.starts_with("//") {
        return Url::parse(&format!("http:{url}")).ok();
    }
    Url::parse(url).ok()
}

/// Serialize everything after `scheme://`, with tile subdomains collapsed
fn without_scheme(parsed: &Url) -> String {
    let host = match parsed.host() {
        Some(Host::Domain(domain)) => collapse_subdomains(domain),
        // IP literals have no subdomains
        _ => parsed[Position::BeforeHost..Position::AfterHost].to_string(),
    };

    format!(
        "{}{}{}",
        &parsed[Position::BeforeUsername..Position::BeforeHost],
        host,
        &parsed[Position::AfterHost..]
    )
}

/// Drop one trailing digit from every label left of the registrable domain
fn collapse_subdomains(hostname: &str) -> String {
    // A fully-qualified host keeps its root dot but it is not a label
    let (name, root) = match hostname.strip_suffix('.') {
        Some(name) => (name, "."),
        None => (hostname, ""),
    };
    let labels: Vec<&str> = name.split('.').collect();
    let subdomain_count = labels.len().saturating_sub(2);

    let collapsed = labels
        .iter()
        .enumerate()
        .map(|(i, &label)| {
            if i < subdomain_count {
                label
                    .strip_suffix(|c: char| c.is_ascii_digit())
                    .unwrap_or(label)
            } else {
                label
            }
        })
        .collect::<Vec<_>>()
        .join(".");
    collapsed + root
}

/// Remove a leading `scheme://` or `//` from an unparseable string
fn strip_scheme(url: &str) -> &str {
    if let Some(rest) = url.strip_prefix("//") {
        return rest;
    }
    match url.split_once("://") {
        Some((scheme, rest)) if is_scheme(scheme) => rest,
        _ => url,
    }
}

fn is_scheme(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        _ => false,
    }
}
