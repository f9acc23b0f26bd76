//! Unified error types for backstage.
//!
//! Every variant renders with a stable code prefix so callers (and the MCP
//! server) can tell failures apart without matching on message text.

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// Unified error types for the interception layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., an unknown destination name).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Request URL could not be resolved.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// Connection-level failure while talking to the network.
    #[error("NETWORK_ERROR: {0}")]
    Network(String),

    /// The network did not answer within the client timeout.
    #[error("NETWORK_TIMEOUT: {0}")]
    NetworkTimeout(String),

    /// Response body exceeded the configured byte limit.
    #[error("RESPONSE_TOO_LARGE: {0}")]
    ResponseTooLarge(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// A stored entry could not be decoded.
    #[error("CACHE_ERROR: corrupt entry: {0}")]
    CorruptEntry(String),

    /// A manifest entry could not be fetched; the whole install is abandoned.
    #[error("PRECACHE_FAILED: {url}: {reason}")]
    PrecacheFailed { url: String, reason: String },

    /// Precache manifest is malformed.
    #[error("INVALID_MANIFEST: {0}")]
    InvalidManifest(String),

    /// Lifecycle transition not allowed from the current state.
    #[error("LIFECYCLE_ERROR: {0}")]
    Lifecycle(String),
}

impl Error {
    /// Whether this error came from the network rather than local storage.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Network(_) | Error::NetworkTimeout(_) | Error::ResponseTooLarge(_))
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::CorruptEntry(err.to_string())
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let code = match &err {
            Error::InvalidInput(_) => -32602,
            Error::InvalidUrl(_) => -32003,
            Error::Network(_) => -32008,
            Error::NetworkTimeout(_) => -32006,
            Error::ResponseTooLarge(_) => -32007,
            Error::Database(_) | Error::MigrationFailed(_) | Error::CorruptEntry(_) => -32002,
            Error::PrecacheFailed { .. } => -32013,
            Error::InvalidManifest(_) => -32014,
            Error::Lifecycle(_) => -32015,
        };

        McpError { code: ErrorCode(code), message: err.to_string().into(), data: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::PrecacheFailed { url: "https://app.test/main.js".into(), reason: "status 404".into() };
        assert!(err.to_string().starts_with("PRECACHE_FAILED"));
        assert!(err.to_string().contains("main.js"));
    }

    #[test]
    fn test_error_to_mcp_error() {
        let err = Error::NetworkTimeout("3s".to_string());
        let mcp_err: McpError = err.into();
        assert_eq!(mcp_err.code.0, -32006);
    }

    #[test]
    fn test_is_network() {
        assert!(Error::Network("refused".into()).is_network());
        assert!(!Error::Lifecycle("busy".into()).is_network());
    }
}
