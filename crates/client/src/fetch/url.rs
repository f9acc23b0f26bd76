//! URL resolution for consistent cache keys and precache matching.

use regex::Regex;
use url::Url;

/// Error type for request URL resolution failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Resolve a request URL the way the page would issue it.
///
/// 1. Trim leading/trailing whitespace
/// 2. Resolve relative URLs against the application origin
/// 3. Only http(s) is interceptable
/// 4. Remove fragment (#...), it never reaches the network
/// 5. Keep query string intact (do not reorder), it is part of the key
pub fn resolve(input: &str, origin: &Url) -> Result<Url, UrlError> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let mut parsed = origin.join(trimmed).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }

    parsed.set_fragment(None);

    Ok(parsed)
}

/// Drop query parameters whose name matches any of `patterns`.
pub fn strip_ignored_params(url: &Url, patterns: &[Regex]) -> Url {
    if url.query().is_none() || patterns.is_empty() {
        return url.clone();
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| !patterns.iter().any(|p| p.is_match(name)))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut stripped = url.clone();
    if kept.is_empty() {
        stripped.set_query(None);
    } else {
        stripped.query_pairs_mut().clear().extend_pairs(kept);
    }
    stripped
}

/// Map a directory URL (`/`, `/docs/`) to its `index.html`.
pub fn with_directory_index(url: &Url) -> Option<Url> {
    if !url.path().ends_with('/') {
        return None;
    }
    let mut indexed = url.clone();
    indexed.set_path(&format!("{}index.html", url.path()));
    Some(indexed)
}
