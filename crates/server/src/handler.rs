//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the interception layer.
use std::sync::Arc;

use backstage_client::InterceptionLayer;

use crate::tools::activate_update::{ActivateUpdateParams, activate_impl};
use crate::tools::close_session::{CloseSessionParams, close_impl};
use crate::tools::fetch::{FetchParams, fetch_impl};
use crate::tools::install_update::{InstallUpdateParams, install_impl};
use crate::tools::layer_status::{LayerStatusParams, status_impl};
use crate::tools::open_session::{OpenSessionParams, open_impl};

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

/// The main MCP server handler for backstage.
#[derive(Clone)]
pub struct BackstageServer {
    layer: Arc<InterceptionLayer>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl BackstageServer {
    pub fn new(layer: Arc<InterceptionLayer>) -> Self {
        Self { layer, tool_router: Self::tool_router() }
    }

    #[tool(
        description = "Issue a request through the interception layer. Returns status, headers, body and the source (network, cache, precache or fallback)."
    )]
    async fn fetch(&self, params: Parameters<FetchParams>) -> Result<CallToolResult, McpError> {
        fetch_impl(&self.layer, params.0).await
    }

    #[tool(
        description = "Precache a manifest as a new layer version. The version waits until the active version's sessions close, or activates at once if none are open."
    )]
    async fn install_update(&self, params: Parameters<InstallUpdateParams>) -> Result<CallToolResult, McpError> {
        install_impl(&self.layer, params.0).await
    }

    #[tool(description = "Activate the waiting layer version now. It claims every open session.")]
    async fn activate_update(&self, params: Parameters<ActivateUpdateParams>) -> Result<CallToolResult, McpError> {
        activate_impl(&self.layer, params.0).await
    }

    #[tool(description = "Register an open page session, controlled by the active version.")]
    async fn open_session(&self, params: Parameters<OpenSessionParams>) -> Result<CallToolResult, McpError> {
        open_impl(&self.layer, params.0).await
    }

    #[tool(description = "Close a page session. Closing the last one lets a waiting version take over.")]
    async fn close_session(&self, params: Parameters<CloseSessionParams>) -> Result<CallToolResult, McpError> {
        close_impl(&self.layer, params.0).await
    }

    #[tool(description = "Report active, waiting and installing versions, open sessions, and caches with entry counts.")]
    async fn layer_status(&self, params: Parameters<LayerStatusParams>) -> Result<CallToolResult, McpError> {
        status_impl(&self.layer, params.0).await
    }
}

impl ServerHandler for BackstageServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "backstage".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}
