//! Network access for the interception layer.
//!
//! ### Network seam
//! - Strategies never call reqwest directly; they go through the `Network`
//!   trait so the layer can be driven by any transport (and by scripted
//!   networks in tests).
//!
//! ### HTTP implementation
//! - Forwards method, headers and body verbatim.
//! - Every status is returned as-is; deciding what is cacheable is the
//!   filter's job, not the transport's.
//! - Max redirects: 5
//! - Max body bytes: 5MB (configurable)

pub mod url;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Method, header};
use std::time::{Duration, Instant};

pub use self::url::{UrlError, resolve, strip_ignored_params, with_directory_index};

use backstage_core::policy::{InterceptedRequest, ResponseSnapshot};
use backstage_core::{AppConfig, Error};

/// Anything that can answer a request from the network.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &InterceptedRequest) -> Result<ResponseSnapshot, Error>;
}

/// Configuration for the HTTP network.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "backstage/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 5MB)
    pub max_bytes: usize,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "backstage/0.1".to_string(),
            max_bytes: 5 * 1024 * 1024,
            timeout: Duration::from_millis(20000),
            max_redirects: 5,
        }
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_bytes,
            timeout: config.timeout(),
            ..Default::default()
        }
    }
}

/// reqwest-backed network.
pub struct HttpNetwork {
    http: Client,
    config: FetchConfig,
}

impl HttpNetwork {
    /// Create a new HTTP network with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    fn too_large(&self, len: usize) -> Error {
        Error::ResponseTooLarge(format!("{len} bytes exceeds {}", self.config.max_bytes))
    }
}

fn map_send_error(err: reqwest::Error) -> Error {
    if err.is_timeout() { Error::NetworkTimeout(err.to_string()) } else { Error::Network(err.to_string()) }
}

fn snapshot_headers(headers: &header::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
        .collect()
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &InterceptedRequest) -> Result<ResponseSnapshot, Error> {
        let start = Instant::now();
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| Error::InvalidInput(format!("bad method {}: {e}", request.method)))?;

        let mut builder = self.http.request(method, request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(map_send_error)?;
        let status = response.status();

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_bytes
        {
            return Err(self.too_large(len as usize));
        }

        let headers = snapshot_headers(response.headers());
        let bytes: Bytes = response.bytes().await.map_err(map_send_error)?;

        if bytes.len() > self.config.max_bytes {
            return Err(self.too_large(bytes.len()));
        }

        tracing::debug!(
            method = %request.method,
            url = %request.url,
            status = status.as_u16(),
            bytes = bytes.len(),
            fetch_ms = start.elapsed().as_millis() as u64,
            "network response"
        );

        Ok(ResponseSnapshot { status: status.as_u16(), headers, body: bytes.to_vec() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_config_default() {
        let config = FetchConfig::default();
        assert_eq!(config.user_agent, "backstage/0.1");
        assert_eq!(config.max_bytes, 5 * 1024 * 1024);
        assert_eq!(config.timeout, Duration::from_millis(20000));
        assert_eq!(config.max_redirects, 5);
    }

    #[test]
    fn test_fetch_config_from_app_config() {
        let app = AppConfig { user_agent: "crew-app/2".into(), timeout_ms: 1500, ..Default::default() };
        let config = FetchConfig::from(&app);
        assert_eq!(config.user_agent, "crew-app/2");
        assert_eq!(config.timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_snapshot_headers() {
        let mut map = header::HeaderMap::new();
        map.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("text/html"));
        map.insert(header::ETAG, header::HeaderValue::from_static("\"abc\""));
        let headers = snapshot_headers(&map);
        assert!(headers.contains(&("content-type".to_string(), "text/html".to_string())));
        assert!(headers.contains(&("etag".to_string(), "\"abc\"".to_string())));
    }

    #[tokio::test]
    async fn test_http_network_new() {
        let network = HttpNetwork::new(FetchConfig::default());
        assert!(network.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let network = HttpNetwork::new(FetchConfig { timeout: Duration::from_secs(2), ..Default::default() }).unwrap();
        let request = InterceptedRequest::get(::url::Url::parse("http://127.0.0.1:9/").unwrap());
        let err = network.fetch(&request).await.unwrap_err();
        assert!(err.is_network(), "{err}");
    }
}
