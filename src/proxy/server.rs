//! OpenAI-compatible gateway server with streaming delta normalization.
//!
//! # Architecture
//!
//! ```text
//! Client App            deltagate                 LLM Provider
//!     |                     |                          |
//!     |-- POST /v1/chat --->|                          |
//!     |                     |-- POST (with retries) -->|
//!     |                     |<-- cumulative SSE -------|
//!     |<-- incremental SSE -|                          |
//!     |<-- data: [DONE] ----|                          |
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use deltagate::{Config, ProxyServer};
//!
//! let server = ProxyServer::new(Config::default())?;
//! server.run().await?;
//! ```

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::stream::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::bearer_token;
use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::fetch::{BackoffFetcher, FetchError, FetchedResponse, UpstreamRequest};
use crate::models::ModelCache;
use crate::stream::{ChannelSink, StreamSession};

use super::stats::{ProxyStats, StatsSummary};

/// Response header carrying the stream session id.
pub const SESSION_HEADER: &str = "x-deltagate-session";

/// Shared gateway state
pub struct ProxyState {
    config: Config,
    fetcher: BackoffFetcher,
    models: ModelCache,
    stats: Arc<ProxyStats>,
}

impl ProxyState {
    fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let client = Client::builder()
            .timeout(config.upstream.request_timeout())
            .build()
            .map_err(|e| GatewayError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            fetcher: BackoffFetcher::new(client, config.retry.policy()),
            models: ModelCache::new(config.models.cache_ttl()),
            stats: Arc::new(ProxyStats::new()),
            config,
        })
    }
}

/// Gateway server
pub struct ProxyServer {
    state: Arc<ProxyState>,
}

impl ProxyServer {
    /// Create a new gateway from a validated configuration
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self {
            state: Arc::new(ProxyState::new(config)?),
        })
    }

    /// Get the router for the gateway
    pub fn router(&self) -> Router {
        Router::new()
            // Health and status
            .route("/health", get(health_handler))
            .route("/stats", get(stats_handler))
            .route("/stats/reset", post(reset_stats_handler))
            // OpenAI-compatible endpoints
            .route("/v1/chat/completions", post(chat_completions_handler))
            .route("/chat/completions", post(chat_completions_handler))
            .route("/v1/models", get(models_handler))
            .route("/models", get(models_handler))
            .layer(DefaultBodyLimit::max(self.state.config.server.max_body_size))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until Ctrl-C.
    pub async fn run(&self) -> Result<()> {
        let addr = self.state.config.server.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| GatewayError::Server(format!("Failed to bind {addr}: {e}")))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until Ctrl-C.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local = listener
            .local_addr()
            .map_err(|e| GatewayError::Server(format!("Listener has no address: {e}")))?;

        tracing::info!("deltagate listening on http://{}", local);
        tracing::info!("Upstream: {}", self.state.config.upstream.base_url);
        tracing::info!(
            "Retry: {} attempts, {}ms base; stream timeout {}s",
            self.state.config.retry.max_attempts,
            self.state.config.retry.base_delay_ms,
            self.state.config.stream.timeout_secs
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Shutdown signal received");
                }
            })
            .await
            .map_err(|e| GatewayError::Server(format!("Server error: {e}")))
    }

    /// Get statistics
    pub fn stats(&self) -> StatsSummary {
        self.state.stats.summary()
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            // Client-facing messages go out without the variant prefix.
            GatewayError::BadRequest(message) => {
                return error_response(StatusCode::BAD_REQUEST, message);
            },
            GatewayError::Unauthorized(message) => {
                return error_response(StatusCode::UNAUTHORIZED, message);
            },
            GatewayError::Json(_) => StatusCode::BAD_REQUEST,
            GatewayError::Fetch(FetchError::Terminal {
                status,
                body,
                content_type,
            }) => {
                // Relay what upstream said, verbatim.
                let status = StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY);
                let content_type = content_type.as_deref().unwrap_or("application/json");
                return (status, [(header::CONTENT_TYPE, content_type.to_string())], body.clone())
                    .into_response();
            },
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error_response(status, &self.to_string())
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": true, "message": message }))).into_response()
}

// === Handlers ===

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "deltagate",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn stats_handler(State(state): State<Arc<ProxyState>>) -> impl IntoResponse {
    Json(state.stats.summary())
}

async fn reset_stats_handler(State(state): State<Arc<ProxyState>>) -> impl IntoResponse {
    state.stats.reset();
    Json(json!({"status": "reset"}))
}

/// Chat completions handler, streaming and non-streaming
async fn chat_completions_handler(
    State(state): State<Arc<ProxyState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match forward_chat(&state, &headers, &body).await {
        Ok(response) => response,
        Err(err) => {
            state.stats.record_error();
            tracing::warn!(error = %err, "chat completion rejected");
            err.into_response()
        },
    }
}

async fn forward_chat(state: &Arc<ProxyState>, headers: &HeaderMap, body: &[u8]) -> Result<Response> {
    let start = Instant::now();

    let token = bearer_token(headers).map_err(|e| GatewayError::Unauthorized(e.to_string()))?;
    let payload: Value = serde_json::from_slice(body)
        .map_err(|e| GatewayError::BadRequest(format!("Invalid JSON body: {e}")))?;

    let model = payload
        .get("model")
        .and_then(Value::as_str)
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| GatewayError::BadRequest("Model parameter is required".to_string()))?;

    let is_streaming = payload
        .get("stream")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    tracing::debug!(model, stream = is_streaming, "forwarding chat completion");

    let request = UpstreamRequest::post_json(
        state.config.upstream.endpoint("chat/completions"),
        &payload,
    )
    .with_bearer(state.config.upstream.credential(token))?;

    let fetched = state.fetcher.fetch(&request).await?;

    if is_streaming {
        Ok(start_stream(state, fetched))
    } else {
        relay_body(state, fetched, start).await
    }
}

/// Relay a non-streaming upstream response as-is
async fn relay_body(state: &ProxyState, fetched: FetchedResponse, start: Instant) -> Result<Response> {
    let status = fetched.response.status();
    let bytes = fetched
        .response
        .bytes()
        .await
        .map_err(|e| GatewayError::Fetch(FetchError::Body(e.to_string())))?;

    state.stats.record_request(fetched.attempts, start.elapsed());

    Ok((
        StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::OK),
        [(header::CONTENT_TYPE, "application/json")],
        bytes,
    )
        .into_response())
}

/// Spawn a stream session and return its output as the response body
fn start_stream(state: &Arc<ProxyState>, fetched: FetchedResponse) -> Response {
    state.stats.record_streaming_request(fetched.attempts);

    let (sink, rx) = ChannelSink::new(state.config.stream.channel_capacity);
    let session = StreamSession::new(sink, state.config.stream.timeout());
    let session_id = session.id().to_string();
    let upstream = fetched.response.bytes_stream();

    let stats = Arc::clone(&state.stats);
    tokio::spawn(async move {
        let report = session.run(upstream).await;
        stats.record_session(&report);
    });

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    let mut response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        body,
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

/// Model list handler, served from the TTL cache
async fn models_handler(State(state): State<Arc<ProxyState>>, headers: HeaderMap) -> Response {
    let token = match bearer_token(&headers) {
        Ok(token) => token,
        Err(e) => return GatewayError::Unauthorized(e.to_string()).into_response(),
    };

    let url = state.config.upstream.endpoint("models");
    let credential = state.config.upstream.credential(token);
    match state
        .models
        .get_or_fetch(&state.fetcher, &url, Some(credential))
        .await
    {
        Ok(list) => {
            state.stats.record_model_lookup(list.cached);
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                list.body,
            )
                .into_response()
        },
        Err(err) => {
            state.stats.record_error();
            tracing::warn!(error = %err, "model list unavailable");
            GatewayError::from(err).into_response()
        },
    }
}
