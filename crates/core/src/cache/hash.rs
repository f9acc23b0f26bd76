//! Cache key and fingerprint generation.

use sha2::{Digest, Sha256};

/// Compute the cache key for a request: method plus full URL.
pub fn compute_cache_key(method: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

/// Short, stable digest over an ordered list of parts.
pub fn fingerprint<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\n");
    }
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(16);
    digest
}
