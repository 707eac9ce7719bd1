//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables (`DELTAGATE_*`)
//! - CLI arguments (applied last by the binary)

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::fetch::RetryPolicy;

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream API configuration
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Retry policy for the initial upstream request
    #[serde(default)]
    pub retry: RetryConfig,

    /// Stream session configuration
    #[serde(default)]
    pub stream: StreamConfig,

    /// Model list cache configuration
    #[serde(default)]
    pub models: ModelsConfig,
}

impl Config {
    /// Default config file location (`<config dir>/deltagate/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("deltagate").join("config.toml"))
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            GatewayError::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        toml::from_str(&content)
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load the file at `path`, or the default path if it exists, or defaults.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(path),
                None => Ok(Self::default()),
            },
        }
    }

    /// Apply `DELTAGATE_*` environment variables on top of this config
    pub fn with_env(self) -> Self {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// Apply environment overrides read through `lookup`
    pub fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            lookup(key).and_then(|v| v.trim().parse().ok())
        }

        // Server settings
        if let Some(host) = lookup("DELTAGATE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parsed(&lookup, "DELTAGATE_PORT") {
            self.server.port = port;
        }

        // Upstream settings
        if let Some(base_url) = lookup("DELTAGATE_UPSTREAM_URL") {
            self.upstream.base_url = base_url;
        }
        if let Some(api_key) = lookup("DELTAGATE_UPSTREAM_API_KEY") {
            self.upstream.api_key = Some(api_key);
        }
        if let Some(secs) = parsed(&lookup, "DELTAGATE_REQUEST_TIMEOUT_SECS") {
            self.upstream.request_timeout_secs = secs;
        }

        // Retry and stream settings
        if let Some(attempts) = parsed(&lookup, "DELTAGATE_RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = attempts;
        }
        if let Some(ms) = parsed(&lookup, "DELTAGATE_RETRY_BASE_DELAY_MS") {
            self.retry.base_delay_ms = ms;
        }
        if let Some(secs) = parsed(&lookup, "DELTAGATE_STREAM_TIMEOUT_SECS") {
            self.stream.timeout_secs = secs;
        }
        if let Some(secs) = parsed(&lookup, "DELTAGATE_MODELS_CACHE_TTL_SECS") {
            self.models.cache_ttl_secs = secs;
        }

        self
    }

    /// Check values that would make the gateway unusable
    pub fn validate(&self) -> Result<()> {
        if self.upstream.base_url.trim().is_empty() {
            return Err(GatewayError::Config("upstream.base_url must not be empty".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(GatewayError::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.stream.timeout_secs == 0 {
            return Err(GatewayError::Config("stream.timeout_secs must be at least 1".to_string()));
        }
        if self.upstream.override_client_key && self.upstream.api_key.is_none() {
            return Err(GatewayError::Config(
                "upstream.override_client_key requires upstream.api_key".to_string(),
            ));
        }
        Ok(())
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Listener configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Maximum request body size in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_body_size: 10 * 1024 * 1024, // 10 MB
        }
    }
}

impl ServerConfig {
    /// Get the full listen address
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Upstream API configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL including the version segment (e.g., https://api.openai.com/v1)
    pub base_url: String,

    /// Gateway-owned API key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Send `api_key` upstream instead of the client's token
    pub override_client_key: bool,

    /// Per-attempt request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            override_client_key: false,
            request_timeout_secs: 120,
        }
    }
}

impl UpstreamConfig {
    /// Join a path onto the base URL
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Credential to send upstream given the client's bearer token
    pub fn credential<'a>(&'a self, client_token: &'a str) -> &'a str {
        match (&self.api_key, self.override_client_key) {
            (Some(key), true) => key,
            _ => client_token,
        }
    }

    /// Request timeout as a duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts including the first one
    pub max_attempts: u32,

    /// Linear backoff base in milliseconds
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryConfig {
    /// Convert to a fetcher retry policy
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }
}

/// Stream session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Hard lifetime of one streaming response in seconds
    pub timeout_secs: u64,

    /// Frames buffered between the session and the client body
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            channel_capacity: 64,
        }
    }
}

impl StreamConfig {
    /// Stream timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Model list cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Cache TTL in seconds
    pub cache_ttl_secs: u64,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 3600, // 1 hour
        }
    }
}

impl ModelsConfig {
    /// Cache TTL as a duration
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}
