//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (BACKSTAGE_*)
//! 2. TOML config file (if BACKSTAGE_CONFIG_FILE set)
//! 3. Built-in defaults
//!
//! Route tables are only practical to write in TOML:
//!
//! ```toml
//! [[routes]]
//! name = "pages"
//! strategy = "network_first"
//! cache_name = "pages"
//! network_timeout_seconds = 3
//! max_entries = 50
//! match = [{ type = "navigate" }]
//! ```

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::policy::{CacheableResponseFilter, Destination, RouteConfig, RouteMatch, RouteTable, StrategyKind};

mod validation;

pub use validation::ConfigError;

const DAY_SECONDS: u64 = 24 * 60 * 60;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (BACKSTAGE_*)
/// 2. TOML config file (if BACKSTAGE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite cache store.
    ///
    /// Set via BACKSTAGE_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// User-Agent string for outgoing requests.
    ///
    /// Set via BACKSTAGE_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum response body size in bytes.
    ///
    /// Set via BACKSTAGE_MAX_BYTES environment variable.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// HTTP client timeout in milliseconds. Route-level network timeouts
    /// are separate and usually much shorter.
    ///
    /// Set via BACKSTAGE_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Origin the application is served from; relative URLs resolve
    /// against it.
    ///
    /// Set via BACKSTAGE_ORIGIN environment variable.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Statuses the cacheable-response filter lets through.
    #[serde(default = "default_cacheable_statuses")]
    pub cacheable_statuses: Vec<u16>,

    /// Ordered runtime caching routes.
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteConfig>,

    /// Precache manifest installed at startup.
    ///
    /// Set via BACKSTAGE_PRECACHE_MANIFEST environment variable.
    #[serde(default)]
    pub precache_manifest: Option<PathBuf>,

    /// Explicit version for the startup manifest; defaults to its fingerprint.
    ///
    /// Set via BACKSTAGE_VERSION environment variable.
    #[serde(default)]
    pub version: Option<String>,

    /// Precached document served when a navigation cannot be satisfied.
    #[serde(default = "default_navigate_fallback")]
    pub navigate_fallback: Option<String>,

    /// Path patterns that never get the navigation fallback.
    #[serde(default = "default_navigate_fallback_denylist")]
    pub navigate_fallback_denylist: Vec<String>,

    /// Query parameter names ignored when matching the precache.
    #[serde(default = "default_ignore_url_parameters")]
    pub ignore_url_parameters: Vec<String>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./backstage-cache.sqlite")
}

fn default_user_agent() -> String {
    "backstage/0.1".into()
}

fn default_max_bytes() -> usize {
    5_242_880 // 5MB
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_origin() -> String {
    "http://localhost:8080".into()
}

fn default_cacheable_statuses() -> Vec<u16> {
    vec![0, 200]
}

fn default_navigate_fallback() -> Option<String> {
    Some("/index.html".into())
}

fn default_navigate_fallback_denylist() -> Vec<String> {
    vec!["^/api/".into(), "^/rest/".into(), "^/auth/".into()]
}

fn default_ignore_url_parameters() -> Vec<String> {
    vec!["^utm_".into(), "^fbclid$".into()]
}

/// Runtime routes for the production app: pages and backend calls prefer
/// fresh data, build assets revalidate in the background, images rarely
/// change.
pub fn default_routes() -> Vec<RouteConfig> {
    let api = |name: &str, prefix: &str| RouteConfig {
        name: name.into(),
        matches: vec![RouteMatch::PathPrefix { prefix: prefix.into() }],
        strategy: StrategyKind::NetworkFirst,
        cache_name: "api".into(),
        network_timeout_seconds: Some(10),
        max_entries: Some(100),
        max_age_seconds: Some(5 * 60),
    };

    vec![
        RouteConfig {
            name: "pages".into(),
            matches: vec![RouteMatch::Navigate],
            strategy: StrategyKind::NetworkFirst,
            cache_name: "pages".into(),
            network_timeout_seconds: Some(3),
            max_entries: Some(50),
            max_age_seconds: Some(DAY_SECONDS),
        },
        api("rest-api", "/rest/v1/"),
        api("app-api", "/api/"),
        RouteConfig {
            name: "static-resources".into(),
            matches: vec![RouteMatch::Destination {
                destinations: vec![Destination::Style, Destination::Script, Destination::Font],
            }],
            strategy: StrategyKind::StaleWhileRevalidate,
            cache_name: "static-resources".into(),
            network_timeout_seconds: None,
            max_entries: Some(60),
            max_age_seconds: Some(30 * DAY_SECONDS),
        },
        RouteConfig {
            name: "images".into(),
            matches: vec![RouteMatch::Destination { destinations: vec![Destination::Image] }],
            strategy: StrategyKind::CacheFirst,
            cache_name: "images".into(),
            network_timeout_seconds: None,
            max_entries: Some(100),
            max_age_seconds: Some(30 * DAY_SECONDS),
        },
    ]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            user_agent: default_user_agent(),
            max_bytes: default_max_bytes(),
            timeout_ms: default_timeout_ms(),
            origin: default_origin(),
            cacheable_statuses: default_cacheable_statuses(),
            routes: default_routes(),
            precache_manifest: None,
            version: None,
            navigate_fallback: default_navigate_fallback(),
            navigate_fallback_denylist: default_navigate_fallback_denylist(),
            ignore_url_parameters: default_ignore_url_parameters(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `BACKSTAGE_`
    /// 2. TOML file from `BACKSTAGE_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file or environment cannot be parsed,
    /// or validation fails after loading.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("BACKSTAGE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("BACKSTAGE_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Parsed application origin.
    pub fn origin_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.origin)
            .map_err(|e| ConfigError::Invalid { field: "origin".into(), reason: e.to_string() })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(ConfigError::Invalid { field: "origin".into(), reason: format!("unsupported scheme {scheme}") }),
        }
    }

    pub fn response_filter(&self) -> CacheableResponseFilter {
        CacheableResponseFilter::new(self.cacheable_statuses.iter().copied())
    }

    pub fn route_table(&self) -> Result<RouteTable, ConfigError> {
        RouteTable::compile(&self.routes)
    }

    pub fn navigate_fallback_denylist_patterns(&self) -> Result<Vec<Regex>, ConfigError> {
        compile_patterns("navigate_fallback_denylist", &self.navigate_fallback_denylist)
    }

    pub fn ignore_url_parameter_patterns(&self) -> Result<Vec<Regex>, ConfigError> {
        compile_patterns("ignore_url_parameters", &self.ignore_url_parameters)
    }
}

fn compile_patterns(field: &str, patterns: &[String]) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| ConfigError::Invalid { field: field.into(), reason: format!("{p}: {e}") })
        })
        .collect()
}
