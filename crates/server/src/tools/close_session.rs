//! close_session tool implementation.
//!
//! Closing the active version's last session lets a waiting version take
//! over.

use rmcp::ErrorData as McpError;
use rmcp::model::CallToolResult;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use backstage_client::InterceptionLayer;
use backstage_core::SessionId;

use super::json_result;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CloseSessionParams {
    /// Session id returned by open_session.
    pub session: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CloseSessionOutput {
    pub closed: u64,
    /// Version that took over because of this close, if any.
    pub activated: Option<String>,
}

pub async fn close_impl(layer: &InterceptionLayer, params: CloseSessionParams) -> Result<CallToolResult, McpError> {
    let activated = layer.close_session(SessionId(params.session)).await?;
    json_result(&CloseSessionOutput { closed: params.session, activated })
}
