//! open_session tool implementation.

use rmcp::ErrorData as McpError;
use rmcp::model::CallToolResult;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use backstage_client::InterceptionLayer;

use super::json_result;

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct OpenSessionParams {}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OpenSessionOutput {
    pub session: u64,
    /// Version controlling the session; null while uncontrolled.
    pub controller: Option<String>,
}

pub async fn open_impl(layer: &InterceptionLayer, _params: OpenSessionParams) -> Result<CallToolResult, McpError> {
    let id = layer.open_session();
    json_result(&OpenSessionOutput { session: id.0, controller: layer.controller_of(id) })
}
