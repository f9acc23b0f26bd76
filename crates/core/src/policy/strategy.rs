//! Request-fulfillment strategies.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Strategy name as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
}

/// The closed set of fulfillment algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Serve from cache; the network is consulted only on a miss.
    CacheFirst,
    /// Prefer a live answer; degrade to the cache on failure or after
    /// `network_timeout`.
    NetworkFirst { network_timeout: Option<Duration> },
    /// Serve the cached copy at once and refresh it in the background.
    StaleWhileRevalidate,
}

impl Strategy {
    pub fn from_kind(kind: StrategyKind, network_timeout: Option<Duration>) -> Self {
        match kind {
            StrategyKind::CacheFirst => Strategy::CacheFirst,
            StrategyKind::NetworkFirst => Strategy::NetworkFirst { network_timeout },
            StrategyKind::StaleWhileRevalidate => Strategy::StaleWhileRevalidate,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::CacheFirst => "cache_first",
            Strategy::NetworkFirst { .. } => "network_first",
            Strategy::StaleWhileRevalidate => "stale_while_revalidate",
        }
    }
}
