//! Upstream fetching with bounded, classified retries.
//!
//! Every call to the upstream API before a stream starts goes through the
//! [`BackoffFetcher`]. Each attempt is classified:
//!
//! | Attempt result                          | Disposition |
//! |-----------------------------------------|-------------|
//! | 2xx, non-HTML                           | success     |
//! | status >= 500                           | retryable   |
//! | `Content-Type: text/html` (any status)  | retryable   |
//! | transport error (DNS, reset, timeout)   | retryable   |
//! | any other non-2xx                       | terminal    |
//!
//! Retryable failures sleep `base_delay * attempt` before the next attempt
//! (linear backoff). Terminal failures return at once. When the attempt
//! budget runs out, [`FetchError::Exhausted`] carries the last status,
//! content type, headers and a body truncated to [`MAX_DIAGNOSTIC_BODY_CHARS`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use deltagate::fetch::{BackoffFetcher, RetryPolicy, UpstreamRequest};
//!
//! let fetcher = BackoffFetcher::new(reqwest::Client::new(), RetryPolicy::default());
//! let request = UpstreamRequest::get("https://api.example.com/v1/models");
//! let fetched = fetcher.fetch(&request).await?;
//! println!("{} after {} attempts", fetched.response.status(), fetched.attempts);
//! ```

mod backoff;
mod classify;

pub use backoff::{backoff_delay, BackoffFetcher, FetchedResponse, RetryPolicy, UpstreamRequest};
pub use classify::{classify_response, Disposition};

use thiserror::Error;

/// Upper bound on the number of body characters kept for diagnostics.
pub const MAX_DIAGNOSTIC_BODY_CHARS: usize = 1000;

/// Cap on a terminal error body relayed to the client.
pub const MAX_RELAYED_BODY_CHARS: usize = 64 * 1024;

/// Header carrying the zero-based attempt index on every upstream call.
pub const ATTEMPT_HEADER: &str = "x-deltagate-attempt";

/// Errors from the backoff fetcher.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Upstream answered with a non-retryable status.
    #[error("upstream returned status {status}")]
    Terminal {
        /// HTTP status code.
        status: u16,
        /// Response body as returned by upstream, capped at
        /// [`MAX_RELAYED_BODY_CHARS`].
        body: String,
        /// Upstream `content-type`, if any.
        content_type: Option<String>,
    },

    /// Every attempt failed with a retryable error.
    #[error("upstream still failing after {} attempts: {}", .0.attempts, .0.summary())]
    Exhausted(Box<FailureDiagnostics>),

    /// The request could not be built (bad URL, bad header value).
    #[error("invalid upstream request: {0}")]
    InvalidRequest(String),

    /// A successful response body could not be read to the end.
    #[error("failed to read upstream body: {0}")]
    Body(String),
}

impl FetchError {
    /// Diagnostics for an exhausted retry loop, if that is what this is.
    pub fn diagnostics(&self) -> Option<&FailureDiagnostics> {
        match self {
            FetchError::Exhausted(diag) => Some(diag),
            _ => None,
        }
    }
}

/// What the last failed attempt looked like.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureDiagnostics {
    /// Last HTTP status, `None` when the last attempt failed at transport level.
    pub status: Option<u16>,
    /// Last `Content-Type` header value.
    pub content_type: Option<String>,
    /// Last body, at most [`MAX_DIAGNOSTIC_BODY_CHARS`] characters.
    pub body: String,
    /// Last response headers.
    pub headers: Vec<(String, String)>,
    /// Transport error message of the last attempt.
    pub transport_error: Option<String>,
    /// Number of attempts performed.
    pub attempts: u32,
}

impl FailureDiagnostics {
    /// One-line description used in error messages and logs.
    pub fn summary(&self) -> String {
        match (self.status, &self.transport_error) {
            (Some(status), _) => format!(
                "status {} ({})",
                status,
                self.content_type.as_deref().unwrap_or("no content type")
            ),
            (None, Some(err)) => format!("transport error: {err}"),
            (None, None) => "unknown failure".to_string(),
        }
    }
}

/// Keep at most `max_chars` characters of `text`.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_bounds_length() {
        let long = "é".repeat(1500);
        let cut = truncate_chars(&long, MAX_DIAGNOSTIC_BODY_CHARS);
        assert_eq!(cut.chars().count(), MAX_DIAGNOSTIC_BODY_CHARS);

        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn test_summary_prefers_status() {
        let diag = FailureDiagnostics {
            status: Some(502),
            content_type: Some("text/html".to_string()),
            attempts: 3,
            ..Default::default()
        };
        assert_eq!(diag.summary(), "status 502 (text/html)");

        let diag = FailureDiagnostics {
            transport_error: Some("connection refused".to_string()),
            ..Default::default()
        };
        assert_eq!(diag.summary(), "transport error: connection refused");
    }

    #[test]
    fn test_exhausted_message_mentions_attempts() {
        let err = FetchError::Exhausted(Box::new(FailureDiagnostics {
            status: Some(500),
            attempts: 3,
            ..Default::default()
        }));
        assert!(err.to_string().contains("3 attempts"));
        assert_eq!(err.diagnostics().map(|d| d.attempts), Some(3));
    }
}
