//! SQLite-backed named response caches.
//!
//! Every cache is a keyed store of response snapshots owned by one layer
//! version. This module provides:
//!
//! - Request-identity keys (SHA-256 of method + URL)
//! - Entry reads/writes with lazy cache creation
//! - Count and age eviction
//! - Version bookkeeping and cleanup of caches from retired versions

pub mod connection;
pub mod entries;
pub mod eviction;
pub mod hash;
pub mod migrations;
pub mod versions;

pub use crate::Error;

pub use connection::CacheDb;
pub use entries::{CacheSummary, CachedEntry};
pub use eviction::{EvictionLimits, EvictionReport};

/// Name of the precache owned by `version`.
pub fn precache_name(version: &str) -> String {
    format!("{PRECACHE_PREFIX}{version}")
}

/// Name of a runtime cache owned by `version`.
pub fn runtime_cache_name(cache_name: &str, version: &str) -> String {
    format!("{cache_name}-{version}")
}

pub const PRECACHE_PREFIX: &str = "precache-";
