//! Linear-backoff retry loop around `reqwest`.

use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, Response};

use super::classify::{classify_response, Disposition};
use super::{
    truncate_chars, FailureDiagnostics, FetchError, ATTEMPT_HEADER, MAX_DIAGNOSTIC_BODY_CHARS,
    MAX_RELAYED_BODY_CHARS,
};

/// Retry budget and backoff base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Never below 1.
    pub max_attempts: u32,
    /// Delay unit; attempt `n` failing sleeps `base_delay * n`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Create a policy; `max_attempts` is clamped to at least 1.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }
}

/// Delay to sleep after the 1-based `attempt` failed.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt)
}

/// A replayable upstream request.
///
/// The body is held as [`Bytes`] so every attempt sends the same payload
/// without re-serializing.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// Headers sent on every attempt.
    pub headers: HeaderMap,
    /// Optional request body.
    pub body: Option<Bytes>,
}

impl UpstreamRequest {
    /// GET request without a body.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// POST request with a JSON body.
    pub fn post_json(url: impl Into<String>, body: &serde_json::Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            method: Method::POST,
            url: url.into(),
            headers,
            body: Some(Bytes::from(body.to_string())),
        }
    }

    /// Add a header, rejecting values that are not valid header text.
    pub fn with_header(mut self, name: HeaderName, value: &str) -> Result<Self, FetchError> {
        let value = HeaderValue::from_str(value)
            .map_err(|e| FetchError::InvalidRequest(format!("header {name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Add a bearer `Authorization` header.
    pub fn with_bearer(self, token: &str) -> Result<Self, FetchError> {
        self.with_header(
            reqwest::header::AUTHORIZATION,
            &format!("Bearer {token}"),
        )
    }
}

/// Successful upstream response plus how many attempts it took.
#[derive(Debug)]
pub struct FetchedResponse {
    /// The untouched upstream response; the caller owns its body.
    pub response: Response,
    /// Attempts performed, including the successful one.
    pub attempts: u32,
}

/// HTTP client wrapper that retries retryable failures with linear backoff.
#[derive(Debug, Clone)]
pub struct BackoffFetcher {
    client: Client,
    policy: RetryPolicy,
}

impl BackoffFetcher {
    /// Create a fetcher around an existing client.
    pub fn new(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// The retry policy in effect.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Fetch using the configured attempt budget.
    pub async fn fetch(&self, request: &UpstreamRequest) -> Result<FetchedResponse, FetchError> {
        self.fetch_with_attempts(request, self.policy.max_attempts)
            .await
    }

    /// Fetch with an explicit attempt budget.
    pub async fn fetch_with_attempts(
        &self,
        request: &UpstreamRequest,
        max_attempts: u32,
    ) -> Result<FetchedResponse, FetchError> {
        let max_attempts = max_attempts.max(1);
        let mut last = FailureDiagnostics::default();

        for attempt in 1..=max_attempts {
            match self.send_once(request, attempt).await {
                Ok(response) => {
                    let status = response.status();
                    match classify_response(status, response.headers()) {
                        Disposition::Success => {
                            tracing::debug!(attempt, status = status.as_u16(), "upstream ok");
                            return Ok(FetchedResponse { response, attempts: attempt });
                        },
                        Disposition::Terminal => {
                            tracing::warn!(
                                attempt,
                                status = status.as_u16(),
                                url = %request.url,
                                "upstream returned terminal status"
                            );
                            let content_type = response
                                .headers()
                                .get(CONTENT_TYPE)
                                .and_then(|v| v.to_str().ok())
                                .map(String::from);
                            let body = read_bounded_body(response, MAX_RELAYED_BODY_CHARS).await;
                            return Err(FetchError::Terminal {
                                status: status.as_u16(),
                                body,
                                content_type,
                            });
                        },
                        Disposition::Retryable => {
                            last = diagnose_response(response, attempt).await;
                            tracing::warn!(
                                attempt,
                                max_attempts,
                                status = status.as_u16(),
                                content_type = last.content_type.as_deref().unwrap_or(""),
                                "retryable upstream response"
                            );
                        },
                    }
                },
                Err(err) => {
                    tracing::warn!(attempt, max_attempts, error = %err, "upstream transport error");
                    last = FailureDiagnostics {
                        transport_error: Some(err.to_string()),
                        attempts: attempt,
                        ..Default::default()
                    };
                },
            }

            if attempt < max_attempts {
                tokio::time::sleep(backoff_delay(self.policy.base_delay, attempt)).await;
            }
        }

        tracing::error!(attempts = last.attempts, "upstream retries exhausted: {}", last.summary());
        Err(FetchError::Exhausted(Box::new(last)))
    }

    async fn send_once(
        &self,
        request: &UpstreamRequest,
        attempt: u32,
    ) -> Result<Response, reqwest::Error> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone())
            .header(ATTEMPT_HEADER, (attempt - 1).to_string());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        builder.send().await
    }
}

/// Capture status, headers and a bounded prefix of the body.
async fn diagnose_response(response: Response, attempt: u32) -> FailureDiagnostics {
    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    FailureDiagnostics {
        status: Some(status),
        content_type,
        body: read_bounded_body(response, MAX_DIAGNOSTIC_BODY_CHARS).await,
        headers,
        transport_error: None,
        attempts: attempt,
    }
}

/// Read at most enough bytes to produce `max_chars` characters.
///
/// A UTF-8 character is at most 4 bytes, so stopping after `4 * max_chars`
/// bytes never cuts the kept prefix short.
async fn read_bounded_body(response: Response, max_chars: usize) -> String {
    let byte_limit = max_chars.saturating_mul(4);
    let mut collected: Vec<u8> = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                let room = byte_limit.saturating_sub(collected.len());
                collected.extend_from_slice(&bytes[..bytes.len().min(room)]);
                if collected.len() >= byte_limit {
                    break;
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, read = collected.len(), "upstream body read failed");
                break;
            },
        }
    }

    truncate_chars(&String::from_utf8_lossy(&collected), max_chars)
}
