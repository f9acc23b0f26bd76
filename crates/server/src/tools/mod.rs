//! MCP tool implementations.
//!
//! Every tool is a thin adapter: decode parameters, call the interception
//! layer, encode the result as JSON text.

pub mod activate_update;
pub mod close_session;
pub mod fetch;
pub mod install_update;
pub mod layer_status;
pub mod open_session;

use rmcp::ErrorData as McpError;
use rmcp::model::{CallToolResult, Content};
use serde::Serialize;

use crate::error::ToolError;

/// Encode a tool's output as pretty JSON text content.
pub(crate) fn json_result<T: Serialize>(output: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(output).map_err(ToolError::from)?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}
