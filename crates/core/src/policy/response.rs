//! Response snapshots and the cacheable-response filter.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Status reported for opaque cross-origin responses.
pub const OPAQUE_STATUS: u16 = 0;

/// A response body plus the metadata needed to replay it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ResponseSnapshot {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self { status, headers: Vec::new(), body: body.into() }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Decides whether a response may be written to any cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheableResponseFilter {
    statuses: BTreeSet<u16>,
}

impl Default for CacheableResponseFilter {
    fn default() -> Self {
        Self::new([OPAQUE_STATUS, 200])
    }
}

impl CacheableResponseFilter {
    /// Statuses >= 400 are dropped; an error response is never storable.
    pub fn new(statuses: impl IntoIterator<Item = u16>) -> Self {
        Self { statuses: statuses.into_iter().filter(|s| *s < 400).collect() }
    }

    pub fn is_cacheable(&self, response: &ResponseSnapshot) -> bool {
        self.statuses.contains(&response.status)
    }

    pub fn statuses(&self) -> impl Iterator<Item = u16> + '_ {
        self.statuses.iter().copied()
    }
}
