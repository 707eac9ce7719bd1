//! TTL cache for the upstream model list.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::fetch::{BackoffFetcher, FetchError, UpstreamRequest};

/// Default freshness window for the cached model list.
pub const DEFAULT_MODEL_CACHE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
struct CacheEntry {
    body: String,
    fetched_at: Instant,
}

/// Model list text plus where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelList {
    /// Raw JSON text as returned by upstream.
    pub body: String,
    /// Served from cache without contacting upstream.
    pub cached: bool,
}

/// Process-wide cache of the upstream `/models` response.
///
/// Holds a single entry. A refresh fetches outside the lock and swaps the
/// entry in whole, so readers never see a half-written list. Concurrent
/// misses may each fetch; the last one stored wins.
#[derive(Debug)]
pub struct ModelCache {
    ttl: Duration,
    entry: RwLock<Option<CacheEntry>>,
}

impl Default for ModelCache {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL_CACHE_TTL)
    }
}

impl ModelCache {
    /// Create an empty cache.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: RwLock::new(None),
        }
    }

    /// Configured TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached body if it is still fresh.
    pub fn get(&self) -> Option<String> {
        let entry = self.entry.read().ok()?;
        entry
            .as_ref()
            .filter(|e| e.fetched_at.elapsed() < self.ttl)
            .map(|e| e.body.clone())
    }

    /// Store a freshly fetched body.
    pub fn store(&self, body: String) {
        if let Ok(mut entry) = self.entry.write() {
            *entry = Some(CacheEntry {
                body,
                fetched_at: Instant::now(),
            });
        }
    }

    /// Drop the cached entry.
    pub fn invalidate(&self) {
        if let Ok(mut entry) = self.entry.write() {
            *entry = None;
        }
    }

    /// Time since the cached entry was fetched, stale or not.
    pub fn age(&self) -> Option<Duration> {
        self.entry
            .read()
            .ok()?
            .as_ref()
            .map(|e| e.fetched_at.elapsed())
    }

    /// Return the fresh cached list, or fetch it from `url` and cache it.
    ///
    /// Only a 2xx body is stored; a terminal or exhausted fetch leaves the
    /// previous entry untouched.
    pub async fn get_or_fetch(
        &self,
        fetcher: &BackoffFetcher,
        url: &str,
        bearer: Option<&str>,
    ) -> Result<ModelList, FetchError> {
        if let Some(body) = self.get() {
            tracing::debug!("model list served from cache");
            return Ok(ModelList { body, cached: true });
        }

        let mut request = UpstreamRequest::get(url);
        if let Some(token) = bearer {
            request = request.with_bearer(token)?;
        }

        let fetched = fetcher.fetch(&request).await?;
        let body = fetched
            .response
            .text()
            .await
            .map_err(|e| FetchError::Body(e.to_string()))?;

        tracing::info!(attempts = fetched.attempts, bytes = body.len(), "model list refreshed");
        self.store(body.clone());
        Ok(ModelList { body, cached: false })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::RetryPolicy;
    use httpmock::prelude::*;

    const MODELS: &str = r#"{"object":"list","data":[{"id":"gpt-4o","object":"model"}]}"#;

    fn fetcher() -> BackoffFetcher {
        BackoffFetcher::new(
            reqwest::Client::new(),
            RetryPolicy::new(2, Duration::from_millis(5)),
        )
    }

    #[test]
    fn test_empty_cache() {
        let cache = ModelCache::default();
        assert_eq!(cache.get(), None);
        assert_eq!(cache.age(), None);
        assert_eq!(cache.ttl(), DEFAULT_MODEL_CACHE_TTL);
    }

    #[test]
    fn test_store_and_invalidate() {
        let cache = ModelCache::new(Duration::from_secs(60));
        cache.store(MODELS.to_string());
        assert_eq!(cache.get().as_deref(), Some(MODELS));
        assert!(cache.age().is_some());

        cache.invalidate();
        assert_eq!(cache.get(), None);
    }

    #[test]
    fn test_expired_entry_is_not_served() {
        let cache = ModelCache::new(Duration::ZERO);
        cache.store(MODELS.to_string());
        assert_eq!(cache.get(), None);
        assert!(cache.age().is_some());
    }

    #[tokio::test]
    async fn test_second_call_hits_cache() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/v1/models")
                .header("authorization", "Bearer sk-test");
            then.status(200)
                .header("content-type", "application/json")
                .body(MODELS);
        });

        let cache = ModelCache::default();
        let url = server.url("/v1/models");

        let first = cache.get_or_fetch(&fetcher(), &url, Some("sk-test")).await.unwrap();
        let second = cache.get_or_fetch(&fetcher(), &url, Some("sk-test")).await.unwrap();

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(second.body, MODELS);
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET).path("/v1/models");
            then.status(401).body(r#"{"error":"bad key"}"#);
        });

        let cache = ModelCache::default();
        let url = server.url("/v1/models");

        let err = cache.get_or_fetch(&fetcher(), &url, None).await.unwrap_err();
        assert!(matches!(err, FetchError::Terminal { status: 401, .. }));
        assert_eq!(cache.get(), None);

        cache.get_or_fetch(&fetcher(), &url, None).await.unwrap_err();
        assert_eq!(mock.calls(), 2);
    }
}
