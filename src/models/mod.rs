//! Upstream model list.
//!
//! `GET /v1/models` is answered from a single process-wide entry that is
//! refreshed through the [`BackoffFetcher`](crate::fetch::BackoffFetcher)
//! once it is older than the TTL (one hour by default).

mod cache;

pub use cache::{ModelCache, ModelList, DEFAULT_MODEL_CACHE_TTL};
