//! # deltagate - Streaming Chat-Completions Gateway
//!
//! An OpenAI-compatible gateway for upstreams whose streaming endpoint sends
//! *cumulative* deltas: every SSE event repeats all text generated so far.
//! Relaying those events as-is duplicates content on the client. deltagate
//! rewrites each event into a true increment and guarantees every client
//! stream terminates cleanly.
//!
//! ## Features
//!
//! - **Retry with backoff**: Initial upstream calls are classified and retried
//! - **Line reassembly**: SSE lines survive arbitrary transport chunking
//! - **Delta normalization**: Cumulative content becomes incremental content
//! - **Exactly-once termination**: One terminal `[DONE]`, one close, whatever ends the stream
//! - **Bounded lifetime**: Streams are force-closed after a configurable timeout
//!
//! ### State Machine
//!
//! ```text
//!                 end of stream
//!     [Active] ────────────────────> [Completed] ──┐
//!        │      read/write error                   │
//!        ├─────────────────────────> [Failed] ─────┼──> [Closed]
//!        │      timer fired                        │
//!        └─────────────────────────> [TimedOut] ───┘
//! ```
//!
//! ### Wire Format
//!
//! | Direction          | Frame                                           |
//! |--------------------|-------------------------------------------------|
//! | Upstream → gateway | `data: {"choices":[{"delta":{"content":"Hi there"}}]}` |
//! | Gateway → client   | `data: {"choices":[{"delta":{"content":" there"}}]}`   |
//! | Failure / timeout  | `data: {"error":true,"message":"..."}`          |
//! | Terminal           | `data: [DONE]`                                  |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use deltagate::{Config, ProxyServer};
//!
//! let config = Config::load(None)?.with_env();
//! ProxyServer::new(config)?.run().await?;
//! ```
//!
//! ### Normalizing Deltas Directly
//!
//! ```
//! use deltagate::stream::DeltaNormalizer;
//!
//! let mut normalizer = DeltaNormalizer::new();
//! assert_eq!(normalizer.advance("Hi").as_deref(), Some("Hi"));
//! assert_eq!(normalizer.advance("Hi there").as_deref(), Some(" there"));
//! assert_eq!(normalizer.advance("Hi there").as_deref(), None);
//! ```
//!
//! ## Modules
//!
//! - [`fetch`]: Classifying retry-with-backoff HTTP fetcher
//! - [`stream`]: Frame buffer, delta normalizer, lifecycle timer, stream session
//! - [`proxy`]: HTTP gateway (Axum-based) and statistics
//! - [`auth`]: Bearer credential extraction
//! - [`models`]: Model list TTL cache
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod auth;
pub mod config;
pub mod error;
pub mod fetch;
pub mod models;
pub mod proxy;
pub mod stream;

// Re-exports for convenience
pub use auth::{bearer_token, AuthError};
pub use config::Config;
pub use error::{GatewayError, Result};
pub use fetch::{BackoffFetcher, FetchError, RetryPolicy, UpstreamRequest};
pub use models::ModelCache;
pub use proxy::{ProxyServer, ProxyStats, StatsSummary};
pub use stream::{
    incremental_suffix, DeltaNormalizer, FrameBuffer, LifecycleState, LifecycleTimer,
    SessionReport, StreamSession,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
