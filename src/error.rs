//! Gateway error types.
//!
//! Two layers of errors exist:
//!
//! - [`GatewayError`] is the crate-wide error returned by configuration,
//!   server startup and the pre-stream request path.
//! - [`FetchError`](crate::fetch::FetchError) is specific to the backoff
//!   fetcher and carries structured diagnostics for exhausted retries. It
//!   converts into [`GatewayError::Fetch`] while keeping its source chain.
//!
//! Errors that happen after a stream has started are never returned through
//! these types; they are reported in-band as a synthetic SSE error frame.

use thiserror::Error;

use crate::fetch::FetchError;

/// Gateway errors.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration could not be loaded or is invalid.
    #[error("Config error: {0}")]
    Config(String),

    /// Request from the client is unusable.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Client did not present a usable bearer credential.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Upstream call failed after classification and retries.
    ///
    /// Preserves the full [`FetchError`] so diagnostics (status, truncated
    /// body, attempt count) stay reachable through `source()`.
    #[error("Upstream fetch failed: {0}")]
    Fetch(#[source] FetchError),

    /// Network communication error outside the retry loop.
    #[error("Network error: {0}")]
    Network(String),

    /// Server-side error (bind, serve).
    #[error("Server error: {0}")]
    Server(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

impl From<FetchError> for GatewayError {
    fn from(err: FetchError) -> Self {
        GatewayError::Fetch(err)
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Network(err.to_string())
    }
}

impl From<toml::de::Error> for GatewayError {
    fn from(err: toml::de::Error) -> Self {
        GatewayError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for GatewayError {
    fn from(err: toml::ser::Error) -> Self {
        GatewayError::Config(format!("Failed to serialize config: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_fetch_error_keeps_source() {
        let err: GatewayError = FetchError::Terminal {
            status: 404,
            body: "not found".to_string(),
            content_type: None,
        }
        .into();

        assert!(err.to_string().contains("404"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_toml_error_maps_to_config() {
        let parsed: std::result::Result<toml::Value, _> = toml::from_str("a = ");
        let err: GatewayError = parsed.unwrap_err().into();
        assert!(matches!(err, GatewayError::Config(_)));
    }
}
