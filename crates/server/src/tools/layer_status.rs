//! layer_status tool implementation.
//!
//! Reports the lifecycle state (active, waiting, installing, open sessions)
//! and every cache with its owning version and entry count.

use rmcp::ErrorData as McpError;
use rmcp::model::CallToolResult;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use backstage_client::InterceptionLayer;

use super::json_result;

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct LayerStatusParams {}

pub async fn status_impl(layer: &InterceptionLayer, _params: LayerStatusParams) -> Result<CallToolResult, McpError> {
    let status = layer.status().await?;
    json_result(&status)
}
