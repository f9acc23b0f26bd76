//! fetch tool implementation.
//!
//! Issues one request through the interception layer, exactly as the page
//! would, and reports the response with where it came from.

use std::collections::BTreeMap;

use rmcp::ErrorData as McpError;
use rmcp::model::CallToolResult;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use backstage_client::fetch::resolve;
use backstage_client::{InterceptionLayer, ResponseSource};
use backstage_core::Error;
use backstage_core::policy::{Destination, InterceptedRequest};

use super::json_result;

/// Input parameters for the fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FetchParams {
    /// Absolute URL, or a path relative to the application origin.
    pub url: String,

    /// HTTP method (default: GET). Only GET is ever cached.
    #[serde(default = "default_method")]
    pub method: String,

    /// Whether this is a top-level page navigation.
    #[serde(default)]
    pub navigate: bool,

    /// Request destination (document, style, script, font, image, ...).
    #[serde(default)]
    pub destination: Option<Destination>,

    /// Extra request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Request body, sent as UTF-8.
    #[serde(default)]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".into()
}

/// Output structure for the fetch tool.
#[derive(Debug, Clone, Serialize)]
pub struct FetchOutput {
    pub url: String,
    pub status: u16,
    /// network, cache, precache or fallback.
    pub source: ResponseSource,
    pub headers: Vec<(String, String)>,
    /// Body decoded as UTF-8 (lossy).
    pub body: String,
    pub body_bytes: usize,
}

pub(crate) fn build_request(params: FetchParams, layer: &InterceptionLayer) -> Result<InterceptedRequest, Error> {
    let url = resolve(&params.url, layer.origin()).map_err(|e| Error::InvalidUrl(e.to_string()))?;
    if params.method.trim().is_empty() {
        return Err(Error::InvalidInput("method cannot be empty".into()));
    }

    let mut request = if params.navigate { InterceptedRequest::navigate(url) } else { InterceptedRequest::get(url) };
    request = request.with_method(&params.method);
    if let Some(destination) = params.destination {
        request = request.with_destination(destination);
    }
    for (name, value) in params.headers {
        request = request.with_header(name, value);
    }
    if let Some(body) = params.body {
        request = request.with_body(body.into_bytes());
    }
    Ok(request)
}

pub async fn fetch_impl(layer: &InterceptionLayer, params: FetchParams) -> Result<CallToolResult, McpError> {
    let request = build_request(params, layer)?;
    let outcome = layer.handle(&request).await?;

    let output = FetchOutput {
        url: request.url.to_string(),
        status: outcome.response.status,
        source: outcome.source,
        body: String::from_utf8_lossy(&outcome.response.body).into_owned(),
        body_bytes: outcome.response.body.len(),
        headers: outcome.response.headers,
    };
    json_result(&output)
}
