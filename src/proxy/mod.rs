//! OpenAI-compatible gateway with streaming delta normalization.
//!
//! This module provides a drop-in server that sits between your application
//! and an LLM provider whose streaming endpoint repeats the whole response
//! in every delta. Clients receive proper incremental deltas.
//!
//! # Features
//!
//! - **Drop-in replacement**: Same endpoints as the OpenAI API
//! - **Resilient upstream calls**: Linear-backoff retries before a stream starts
//! - **Incremental streaming**: Cumulative deltas rewritten on the fly
//! - **Bounded streams**: Every stream ends with exactly one terminal `[DONE]`
//! - **Statistics**: Retries, timeouts, frames and latencies
//!
//! # Endpoints
//!
//! | Endpoint | Method | Description |
//! |----------|--------|-------------|
//! | `/health` | GET | Health check |
//! | `/stats` | GET | Gateway statistics |
//! | `/stats/reset` | POST | Reset statistics |
//! | `/v1/chat/completions` | POST | OpenAI-compatible chat endpoint |
//! | `/v1/models` | GET | Cached upstream model list |
//!
//! Both OpenAI routes are also served without the `/v1` prefix.
//!
//! # Client Configuration
//!
//! Point your OpenAI client at the gateway:
//!
//! ```python
//! from openai import OpenAI
//!
//! client = OpenAI(
//!     base_url="http://localhost:8080/v1",
//!     api_key="your-api-key"
//! )
//! ```

mod server;
mod stats;

pub use server::{ProxyServer, SESSION_HEADER};
pub use stats::{ProxyStats, StatsSummary};
