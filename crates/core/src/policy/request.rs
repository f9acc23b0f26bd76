//! Intercepted request descriptor.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::Error;
use crate::cache::hash::compute_cache_key;

/// What the page intends to do with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    Document,
    Style,
    Script,
    Font,
    Image,
    Manifest,
    Worker,
    /// `fetch()`/XHR calls, the backend API traffic.
    #[default]
    Empty,
}

impl Destination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Destination::Document => "document",
            Destination::Style => "style",
            Destination::Script => "script",
            Destination::Font => "font",
            Destination::Image => "image",
            Destination::Manifest => "manifest",
            Destination::Worker => "worker",
            Destination::Empty => "empty",
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Destination {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "document" => Ok(Destination::Document),
            "style" => Ok(Destination::Style),
            "script" => Ok(Destination::Script),
            "font" => Ok(Destination::Font),
            "image" => Ok(Destination::Image),
            "manifest" => Ok(Destination::Manifest),
            "worker" => Ok(Destination::Worker),
            "" | "empty" => Ok(Destination::Empty),
            other => Err(Error::InvalidInput(format!("unknown destination: {other}"))),
        }
    }
}

/// A request as seen at the interception point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedRequest {
    /// Upper-case HTTP method.
    pub method: String,
    /// Absolute URL, fragment already removed.
    pub url: Url,
    /// Top-level page navigation rather than a subresource.
    pub navigation: bool,
    pub destination: Destination,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl InterceptedRequest {
    /// A subresource GET.
    pub fn get(url: Url) -> Self {
        Self {
            method: "GET".into(),
            url,
            navigation: false,
            destination: Destination::Empty,
            headers: Vec::new(),
            body: None,
        }
    }

    /// A full page navigation.
    pub fn navigate(url: Url) -> Self {
        Self { navigation: true, destination: Destination::Document, ..Self::get(url) }
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.method = method.trim().to_ascii_uppercase();
        self
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Only reads are ever answered from or written to a cache.
    pub fn is_cacheable_method(&self) -> bool {
        self.method == "GET"
    }

    /// Canonical cache identity: method plus full URL, query included.
    pub fn cache_key(&self) -> String {
        compute_cache_key(&self.method, self.url.as_str())
    }
}
