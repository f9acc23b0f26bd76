//! Route table: ordered (predicate, strategy, cache, limits) policies.
//!
//! Routes are evaluated top to bottom and the first one whose predicates all
//! hold decides how the request is fulfilled. A request no route claims
//! passes straight through to the network.

use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use super::request::{Destination, InterceptedRequest};
use super::strategy::{Strategy, StrategyKind};
use crate::cache::eviction::EvictionLimits;
use crate::config::ConfigError;

/// A single request predicate as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RouteMatch {
    /// Top-level page navigations.
    Navigate,
    PathExact { path: String },
    PathPrefix { prefix: String },
    /// Regular expression matched against the URL path.
    PathRegex { pattern: String },
    Destination { destinations: Vec<Destination> },
    /// Scheme + host + port, e.g. `https://xyz.supabase.co`.
    Origin { origin: String },
}

/// One entry of the `routes` configuration list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub name: String,
    /// Every predicate must hold for the route to match.
    #[serde(rename = "match")]
    pub matches: Vec<RouteMatch>,
    pub strategy: StrategyKind,
    pub cache_name: String,
    #[serde(default)]
    pub network_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub max_entries: Option<u32>,
    #[serde(default)]
    pub max_age_seconds: Option<u64>,
}

#[derive(Debug, Clone)]
enum Predicate {
    Navigate,
    PathExact(String),
    PathPrefix(String),
    PathRegex(Regex),
    Destination(Vec<Destination>),
    Origin(String),
}

impl Predicate {
    fn compile(route: &str, m: &RouteMatch) -> Result<Self, ConfigError> {
        Ok(match m {
            RouteMatch::Navigate => Predicate::Navigate,
            RouteMatch::PathExact { path } => Predicate::PathExact(path.clone()),
            RouteMatch::PathPrefix { prefix } => Predicate::PathPrefix(prefix.clone()),
            RouteMatch::PathRegex { pattern } => {
                Predicate::PathRegex(Regex::new(pattern).map_err(|e| ConfigError::Invalid {
                    field: format!("routes.{route}.match"),
                    reason: format!("bad path_regex: {e}"),
                })?)
            }
            RouteMatch::Destination { destinations } => Predicate::Destination(destinations.clone()),
            RouteMatch::Origin { origin } => {
                let parsed = Url::parse(origin).map_err(|e| ConfigError::Invalid {
                    field: format!("routes.{route}.match"),
                    reason: format!("bad origin {origin}: {e}"),
                })?;
                Predicate::Origin(parsed.origin().ascii_serialization())
            }
        })
    }

    fn matches(&self, request: &InterceptedRequest) -> bool {
        match self {
            Predicate::Navigate => request.navigation,
            Predicate::PathExact(path) => request.url.path() == path,
            Predicate::PathPrefix(prefix) => request.url.path().starts_with(prefix.as_str()),
            Predicate::PathRegex(re) => re.is_match(request.url.path()),
            Predicate::Destination(dests) => dests.contains(&request.destination),
            Predicate::Origin(origin) => request.url.origin().ascii_serialization() == *origin,
        }
    }
}

/// A compiled, immutable route.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    pub name: String,
    pub strategy: Strategy,
    /// Unversioned cache name; the layer suffixes the owning version.
    pub cache_name: String,
    pub limits: EvictionLimits,
    predicates: Vec<Predicate>,
}

impl RoutePolicy {
    pub fn compile(config: &RouteConfig) -> Result<Self, ConfigError> {
        let predicates = config
            .matches
            .iter()
            .map(|m| Predicate::compile(&config.name, m))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: config.name.clone(),
            strategy: Strategy::from_kind(config.strategy, config.network_timeout_seconds.map(Duration::from_secs)),
            cache_name: config.cache_name.clone(),
            limits: EvictionLimits { max_entries: config.max_entries, max_age_seconds: config.max_age_seconds },
            predicates,
        })
    }

    pub fn matches(&self, request: &InterceptedRequest) -> bool {
        !self.predicates.is_empty() && self.predicates.iter().all(|p| p.matches(request))
    }
}

/// Result of classifying a request.
#[derive(Debug, Clone, Copy)]
pub enum Classification<'a> {
    Policy(&'a RoutePolicy),
    PassThrough,
}

/// Ordered list of route policies.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<RoutePolicy>,
}

impl RouteTable {
    pub fn compile(configs: &[RouteConfig]) -> Result<Self, ConfigError> {
        let routes = configs.iter().map(RoutePolicy::compile).collect::<Result<Vec<_>, _>>()?;
        Ok(Self { routes })
    }

    /// First matching policy, or pass-through.
    pub fn classify(&self, request: &InterceptedRequest) -> Classification<'_> {
        match self.routes.iter().find(|r| r.matches(request)) {
            Some(policy) => Classification::Policy(policy),
            None => Classification::PassThrough,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(name: &str, matches: Vec<RouteMatch>, strategy: StrategyKind) -> RouteConfig {
        RouteConfig {
            name: name.into(),
            matches,
            strategy,
            cache_name: name.into(),
            network_timeout_seconds: None,
            max_entries: None,
            max_age_seconds: None,
        }
    }

    fn table() -> RouteTable {
        RouteTable::compile(&[
            route("pages", vec![RouteMatch::Navigate], StrategyKind::NetworkFirst),
            route(
                "api",
                vec![
                    RouteMatch::Origin { origin: "https://db.example.co".into() },
                    RouteMatch::PathPrefix { prefix: "/rest/v1/".into() },
                ],
                StrategyKind::NetworkFirst,
            ),
            route(
                "static",
                vec![RouteMatch::Destination {
                    destinations: vec![Destination::Style, Destination::Script, Destination::Font],
                }],
                StrategyKind::StaleWhileRevalidate,
            ),
            route(
                "images",
                vec![RouteMatch::Destination { destinations: vec![Destination::Image] }],
                StrategyKind::CacheFirst,
            ),
            route("manifest", vec![RouteMatch::PathExact { path: "/site.webmanifest".into() }], StrategyKind::CacheFirst),
            route("uploads", vec![RouteMatch::PathRegex { pattern: r"^/uploads/.+\.pdf$".into() }], StrategyKind::CacheFirst),
        ])
        .unwrap()
    }

    fn name_of(table: &RouteTable, req: &InterceptedRequest) -> Option<String> {
        match table.classify(req) {
            Classification::Policy(p) => Some(p.name.clone()),
            Classification::PassThrough => None,
        }
    }

    #[test]
    fn test_navigation_matches_pages() {
        let req = InterceptedRequest::navigate(Url::parse("https://app.test/schedule").unwrap());
        assert_eq!(name_of(&table(), &req).as_deref(), Some("pages"));
    }

    #[test]
    fn test_all_predicates_must_hold() {
        let t = table();
        let api = InterceptedRequest::get(Url::parse("https://db.example.co/rest/v1/riders").unwrap());
        assert_eq!(name_of(&t, &api).as_deref(), Some("api"));

        let other_origin = InterceptedRequest::get(Url::parse("https://elsewhere.test/rest/v1/riders").unwrap());
        assert_eq!(name_of(&t, &other_origin), None);
    }

    #[test]
    fn test_destination_match() {
        let t = table();
        let font = InterceptedRequest::get(Url::parse("https://app.test/a.woff2").unwrap())
            .with_destination(Destination::Font);
        assert_eq!(name_of(&t, &font).as_deref(), Some("static"));

        let img = InterceptedRequest::get(Url::parse("https://cdn.test/x.png").unwrap())
            .with_destination(Destination::Image);
        assert_eq!(name_of(&t, &img).as_deref(), Some("images"));
    }

    #[test]
    fn test_exact_and_regex_paths() {
        let t = table();
        let manifest = InterceptedRequest::get(Url::parse("https://app.test/site.webmanifest").unwrap());
        assert_eq!(name_of(&t, &manifest).as_deref(), Some("manifest"));

        let pdf = InterceptedRequest::get(Url::parse("https://app.test/uploads/rider.pdf").unwrap());
        assert_eq!(name_of(&t, &pdf).as_deref(), Some("uploads"));
    }

    #[test]
    fn test_first_match_wins() {
        let t = RouteTable::compile(&[
            route("first", vec![RouteMatch::PathPrefix { prefix: "/".into() }], StrategyKind::CacheFirst),
            route("second", vec![RouteMatch::Navigate], StrategyKind::NetworkFirst),
        ])
        .unwrap();
        let req = InterceptedRequest::navigate(Url::parse("https://app.test/").unwrap());
        assert_eq!(name_of(&t, &req).as_deref(), Some("first"));
    }

    #[test]
    fn test_no_match_passes_through() {
        let req = InterceptedRequest::get(Url::parse("https://app.test/health").unwrap());
        assert!(matches!(table().classify(&req), Classification::PassThrough));
    }

    #[test]
    fn test_empty_predicate_list_never_matches() {
        let t = RouteTable::compile(&[route("empty", vec![], StrategyKind::CacheFirst)]).unwrap();
        let req = InterceptedRequest::get(Url::parse("https://app.test/").unwrap());
        assert!(matches!(t.classify(&req), Classification::PassThrough));
    }

    #[test]
    fn test_bad_regex_rejected() {
        let result = RouteTable::compile(&[route(
            "bad",
            vec![RouteMatch::PathRegex { pattern: "(".into() }],
            StrategyKind::CacheFirst,
        )]);
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_network_timeout_compiled() {
        let mut cfg = route("pages", vec![RouteMatch::Navigate], StrategyKind::NetworkFirst);
        cfg.network_timeout_seconds = Some(3);
        cfg.max_entries = Some(50);
        let policy = RoutePolicy::compile(&cfg).unwrap();
        assert_eq!(policy.strategy, Strategy::NetworkFirst { network_timeout: Some(Duration::from_secs(3)) });
        assert_eq!(policy.limits.max_entries, Some(50));
    }
}
