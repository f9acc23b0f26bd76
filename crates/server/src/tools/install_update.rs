//! install_update tool implementation.
//!
//! Precaches a manifest as a new layer version. The version then waits for
//! open sessions of the active version to close, unless nothing holds it.

use rmcp::ErrorData as McpError;
use rmcp::model::CallToolResult;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use backstage_client::InterceptionLayer;
use backstage_core::{LifecycleState, PrecacheEntry, PrecacheManifest};

use super::json_result;
use crate::error::ToolError;

/// One manifest asset.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ManifestEntryParam {
    pub url: String,
    pub revision: String,
}

/// Input parameters for the install_update tool.
///
/// Exactly one of `manifest_path` and `entries` must be given.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct InstallUpdateParams {
    /// Path to a JSON manifest file.
    #[serde(default)]
    pub manifest_path: Option<String>,

    /// Inline manifest entries.
    #[serde(default)]
    pub entries: Option<Vec<ManifestEntryParam>>,

    /// Version identifier (default: manifest fingerprint).
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct InstallUpdateOutput {
    pub version: String,
    pub state: LifecycleState,
}

fn manifest_from(params: &InstallUpdateParams) -> Result<PrecacheManifest, McpError> {
    match (&params.manifest_path, &params.entries) {
        (Some(path), None) => Ok(PrecacheManifest::load(path)?),
        (None, Some(entries)) => Ok(PrecacheManifest::new(
            entries.iter().map(|e| PrecacheEntry::new(&e.url, &e.revision)).collect(),
        )?),
        _ => Err(ToolError::InvalidInput("give exactly one of manifest_path or entries".into()).into()),
    }
}

pub async fn install_impl(layer: &InterceptionLayer, params: InstallUpdateParams) -> Result<CallToolResult, McpError> {
    let manifest = manifest_from(&params)?;
    let version = match params.version.as_deref() {
        Some(v) => v.trim().to_string(),
        None => manifest.fingerprint(),
    };

    let state = layer.install(&manifest, Some(&version)).await?;
    json_result(&InstallUpdateOutput { version, state })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support;

    #[tokio::test]
    async fn test_requires_exactly_one_manifest_source() {
        let layer = test_support::layer().await;

        let err = install_impl(&layer, InstallUpdateParams::default()).await.unwrap_err();
        assert_eq!(err.code.0, -32602);

        let both = InstallUpdateParams {
            manifest_path: Some("precache.json".into()),
            entries: Some(Vec::new()),
            version: None,
        };
        assert!(install_impl(&layer, both).await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_entries_rejected() {
        let layer = test_support::layer().await;
        let entry = ManifestEntryParam { url: "/index.html".into(), revision: "a".into() };
        let params = InstallUpdateParams { entries: Some(vec![entry.clone(), entry]), ..Default::default() };

        let err = install_impl(&layer, params).await.unwrap_err();
        assert_eq!(err.code.0, -32014);
    }

    #[tokio::test]
    async fn test_empty_manifest_installs_and_activates() {
        let layer = test_support::layer().await;
        let params = InstallUpdateParams { entries: Some(Vec::new()), version: Some("v1".into()), ..Default::default() };

        let result = install_impl(&layer, params).await.unwrap();
        let output = test_support::output(&result);
        assert_eq!(output["version"], "v1");
        assert_eq!(output["state"], "active");
        assert_eq!(layer.active_version().as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn test_reports_trimmed_version() {
        let layer = test_support::layer().await;
        let params =
            InstallUpdateParams { entries: Some(Vec::new()), version: Some("  v1 \n".into()), ..Default::default() };

        let output = test_support::output(&install_impl(&layer, params).await.unwrap());
        assert_eq!(output["version"], "v1");
        assert_eq!(layer.active_version().as_deref(), Some("v1"));

        let blank = InstallUpdateParams { entries: Some(Vec::new()), version: Some("   ".into()), ..Default::default() };
        assert!(install_impl(&layer, blank).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_manifest_file() {
        let layer = test_support::layer().await;
        let params =
            InstallUpdateParams { manifest_path: Some("/nonexistent/precache.json".into()), ..Default::default() };

        let err = install_impl(&layer, params).await.unwrap_err();
        assert_eq!(err.code.0, -32014);
    }
}
