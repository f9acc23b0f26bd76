//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use std::collections::HashSet;

use crate::cache::PRECACHE_PREFIX;
use crate::config::AppConfig;
use crate::policy::StrategyKind;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `max_bytes` is 0 or exceeds 50MB
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `user_agent` is empty or `origin` is not an http(s) URL
    /// - `cacheable_statuses` contains an error status (>= 400)
    /// - a route is unnamed, duplicated, has no predicates, an empty or
    ///   reserved cache name, or a pattern that does not compile
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_bytes == 0 {
            return Err(invalid("max_bytes", "must be greater than 0"));
        }
        if self.max_bytes > 50 * 1024 * 1024 {
            return Err(invalid("max_bytes", "must not exceed 50MB"));
        }

        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        self.origin_url()?;

        for status in &self.cacheable_statuses {
            if *status >= 400 || (*status != 0 && *status < 100) {
                return Err(invalid("cacheable_statuses", format!("{status} can never be cached")));
            }
        }
        if self.cacheable_statuses.is_empty() {
            tracing::warn!("cacheable_statuses is empty; runtime caches will never be written");
        }

        if let Some(version) = &self.version
            && version.trim().is_empty()
        {
            return Err(invalid("version", "must not be blank"));
        }

        self.validate_routes()?;
        self.navigate_fallback_denylist_patterns()?;
        self.ignore_url_parameter_patterns()?;

        Ok(())
    }

    fn validate_routes(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for route in &self.routes {
            let field = format!("routes.{}", route.name);
            if route.name.trim().is_empty() {
                return Err(invalid("routes", "route name must not be empty"));
            }
            if !names.insert(route.name.as_str()) {
                return Err(invalid(field, "duplicate route name"));
            }
            if route.matches.is_empty() {
                return Err(invalid(field, "at least one match predicate is required"));
            }
            if route.cache_name.trim().is_empty() {
                return Err(invalid(field, "cache_name must not be empty"));
            }
            if route.cache_name.starts_with(PRECACHE_PREFIX.trim_end_matches('-')) {
                return Err(invalid(field, "cache_name is reserved for the precache"));
            }
            match (route.strategy, route.network_timeout_seconds) {
                (StrategyKind::NetworkFirst, Some(0)) => {
                    return Err(invalid(field, "network_timeout_seconds must be greater than 0"));
                }
                (StrategyKind::CacheFirst | StrategyKind::StaleWhileRevalidate, Some(_)) => {
                    tracing::warn!(route = %route.name, "network_timeout_seconds only applies to network_first");
                }
                _ => {}
            }
        }

        self.route_table()?;
        Ok(())
    }
}
