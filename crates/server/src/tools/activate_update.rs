//! activate_update tool implementation.
//!
//! The explicit "activate now" signal: a waiting version takes over at once
//! and claims every open session.

use rmcp::ErrorData as McpError;
use rmcp::model::CallToolResult;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use backstage_client::InterceptionLayer;

use super::json_result;

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ActivateUpdateParams {}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ActivateUpdateOutput {
    /// Version that took over; null when nothing was waiting.
    pub activated: Option<String>,
    pub active: Option<String>,
}

pub async fn activate_impl(layer: &InterceptionLayer, _params: ActivateUpdateParams) -> Result<CallToolResult, McpError> {
    let activated = layer.activate_waiting().await?;
    json_result(&ActivateUpdateOutput { activated, active: layer.active_version() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support;
    use backstage_core::PrecacheManifest;

    #[tokio::test]
    async fn test_nothing_waiting() {
        let layer = test_support::layer().await;
        let result = activate_impl(&layer, ActivateUpdateParams::default()).await.unwrap();
        let output = test_support::output(&result);
        assert!(output["activated"].is_null());
        assert!(output["active"].is_null());
    }

    #[tokio::test]
    async fn test_activates_waiting_version() {
        let layer = test_support::layer().await;
        let empty = PrecacheManifest::default();
        layer.install(&empty, Some("v1")).await.unwrap();
        let _session = layer.open_session();
        layer.install(&empty, Some("v2")).await.unwrap();

        let result = activate_impl(&layer, ActivateUpdateParams::default()).await.unwrap();
        let output = test_support::output(&result);
        assert_eq!(output["activated"], "v2");
        assert_eq!(output["active"], "v2");
    }
}
