//! Count and age limits per cache.
//!
//! Both rules run independently after every write: entries past
//! `max_age_seconds` are deleted first, then least-recently-used entries are
//! deleted until at most `max_entries` remain.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;

use super::connection::CacheDb;
use crate::Error;

/// Eviction bounds for one cache. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionLimits {
    pub max_entries: Option<u32>,
    pub max_age_seconds: Option<u64>,
}

impl EvictionLimits {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_seconds.map(Duration::from_secs)
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_entries.is_none() && self.max_age_seconds.is_none()
    }
}

/// What a single enforcement pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub expired: u64,
    pub overflow: u64,
}

impl EvictionReport {
    pub fn total(&self) -> u64 {
        self.expired + self.overflow
    }
}

impl CacheDb {
    /// Apply both limits to `cache_name`.
    pub async fn enforce_limits(
        &self, cache_name: &str, limits: &EvictionLimits, now: DateTime<Utc>,
    ) -> Result<EvictionReport, Error> {
        let mut report = EvictionReport::default();
        if let Some(max_age) = limits.max_age() {
            report.expired = self.purge_expired_entries(cache_name, max_age, now).await?;
        }
        if let Some(max_entries) = limits.max_entries {
            report.overflow = self.purge_overflow_entries(cache_name, max_entries).await?;
        }
        if report.total() > 0 {
            tracing::debug!(
                cache = cache_name,
                expired = report.expired,
                overflow = report.overflow,
                "evicted cache entries"
            );
        }
        Ok(report)
    }

    /// Delete entries stored at or before `now - max_age`.
    pub async fn purge_expired_entries(
        &self, cache_name: &str, max_age: Duration, now: DateTime<Utc>,
    ) -> Result<u64, Error> {
        let Some(cutoff) = TimeDelta::from_std(max_age).ok().and_then(|age| now.checked_sub_signed(age)) else {
            return Ok(0);
        };
        let cutoff = cutoff.timestamp_millis();
        let cache_name = cache_name.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute(
                    "DELETE FROM cache_entries WHERE cache_name = ?1 AND stored_at_ms <= ?2",
                    params![cache_name, cutoff],
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete least-recently-used entries until count <= `max_entries`.
    pub async fn purge_overflow_entries(&self, cache_name: &str, max_entries: u32) -> Result<u64, Error> {
        let cache_name = cache_name.to_string();
        let max = max_entries as i64;
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM cache_entries WHERE cache_name = ?1",
                    params![cache_name],
                    |row| row.get(0),
                )?;
                if count <= max {
                    return Ok(0);
                }

                let deleted = conn.execute(
                    "DELETE FROM cache_entries WHERE cache_name = ?1 AND key_hash IN (
                        SELECT key_hash FROM cache_entries WHERE cache_name = ?1
                        ORDER BY last_used ASC LIMIT ?2
                    )",
                    params![cache_name, count - max],
                )?;
                Ok(deleted as u64)
            })
            .await
            .map_err(Error::from)
    }
}
