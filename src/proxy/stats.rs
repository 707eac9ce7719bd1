//! Gateway statistics tracking.
//!
//! Tracks request counts, upstream retries, stream outcomes, model cache
//! efficiency and request latencies.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::stream::{LifecycleState, SessionReport};

/// Latency samples kept for percentile calculation
const LATENCY_WINDOW: usize = 1000;

/// Thread-safe gateway statistics
#[derive(Debug, Default)]
pub struct ProxyStats {
    /// Total chat-completion requests accepted
    requests: AtomicU64,
    /// Requests served as SSE streams
    streaming_requests: AtomicU64,
    /// Extra upstream attempts beyond the first
    retries: AtomicU64,
    /// Requests that failed before or during streaming
    errors: AtomicU64,
    /// Streams force-closed by the lifecycle timer
    timeouts: AtomicU64,
    /// Normalized frames written to clients
    frames_forwarded: AtomicU64,
    /// Deltas that normalized to nothing
    empty_deltas: AtomicU64,
    /// Malformed lines forwarded verbatim
    passthrough_lines: AtomicU64,
    /// Upstream stream bytes read
    bytes_in: AtomicU64,
    /// Model list served from cache
    cache_hits: AtomicU64,
    /// Model list fetched from upstream
    cache_misses: AtomicU64,
    /// Request latencies (for percentile calculation)
    latencies: RwLock<VecDeque<Duration>>,
    /// Start time
    started_at: RwLock<Option<Instant>>,
}

impl ProxyStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self {
            started_at: RwLock::new(Some(Instant::now())),
            ..Default::default()
        }
    }

    /// Record a completed non-streaming request
    pub fn record_request(&self, attempts: u32, latency: Duration) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.record_attempts(attempts);
        self.record_latency(latency);
    }

    /// Record a streaming request whose upstream response was accepted
    pub fn record_streaming_request(&self, attempts: u32) {
        self.streaming_requests.fetch_add(1, Ordering::Relaxed);
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.record_attempts(attempts);
    }

    /// Fold a finished stream session into the totals
    pub fn record_session(&self, report: &SessionReport) {
        self.frames_forwarded
            .fetch_add(report.frames_written, Ordering::Relaxed);
        self.empty_deltas
            .fetch_add(report.empty_deltas, Ordering::Relaxed);
        self.passthrough_lines
            .fetch_add(report.passthrough_lines, Ordering::Relaxed);
        self.bytes_in.fetch_add(report.bytes_in, Ordering::Relaxed);

        match report.outcome {
            LifecycleState::TimedOut => {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
            },
            LifecycleState::Failed => self.record_error(),
            _ => {},
        }
        self.record_latency(report.elapsed);
    }

    /// Record an error
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a model list lookup
    pub fn record_model_lookup(&self, cached: bool) {
        if cached {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_attempts(&self, attempts: u32) {
        let extra = u64::from(attempts.saturating_sub(1));
        self.retries.fetch_add(extra, Ordering::Relaxed);
    }

    fn record_latency(&self, latency: Duration) {
        if let Ok(mut latencies) = self.latencies.write() {
            latencies.push_back(latency);
            if latencies.len() > LATENCY_WINDOW {
                latencies.pop_front();
            }
        }
    }

    /// Get total requests
    pub fn total_requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Get streaming requests count
    pub fn streaming_requests(&self) -> u64 {
        self.streaming_requests.load(Ordering::Relaxed)
    }

    /// Get upstream retries
    pub fn total_retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Get total errors
    pub fn total_errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Get stream timeouts
    pub fn total_timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Get frames forwarded
    pub fn frames_forwarded(&self) -> u64 {
        self.frames_forwarded.load(Ordering::Relaxed)
    }

    /// Model cache hit ratio (0.0-1.0), `None` before any lookup
    pub fn cache_hit_ratio(&self) -> Option<f64> {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let total = hits + self.cache_misses.load(Ordering::Relaxed);
        (total > 0).then(|| hits as f64 / total as f64)
    }

    /// Get p50 latency
    pub fn p50_latency(&self) -> Option<Duration> {
        self.percentile_latency(50)
    }

    /// Get p95 latency
    pub fn p95_latency(&self) -> Option<Duration> {
        self.percentile_latency(95)
    }

    /// Get p99 latency
    pub fn p99_latency(&self) -> Option<Duration> {
        self.percentile_latency(99)
    }

    /// Calculate percentile latency
    fn percentile_latency(&self, percentile: usize) -> Option<Duration> {
        let latencies = self.latencies.read().ok()?;
        if latencies.is_empty() {
            return None;
        }

        let mut sorted: Vec<_> = latencies.iter().copied().collect();
        sorted.sort();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        Some(sorted[idx])
    }

    /// Get uptime
    pub fn uptime(&self) -> Duration {
        self.started_at
            .read()
            .ok()
            .and_then(|s| s.map(|start| start.elapsed()))
            .unwrap_or_default()
    }

    /// Get summary as JSON-compatible struct
    pub fn summary(&self) -> StatsSummary {
        StatsSummary {
            total_requests: self.total_requests(),
            streaming_requests: self.streaming_requests(),
            upstream_retries: self.total_retries(),
            total_errors: self.total_errors(),
            stream_timeouts: self.total_timeouts(),
            frames_forwarded: self.frames_forwarded(),
            empty_deltas_suppressed: self.empty_deltas.load(Ordering::Relaxed),
            passthrough_lines: self.passthrough_lines.load(Ordering::Relaxed),
            upstream_bytes: self.bytes_in.load(Ordering::Relaxed),
            model_cache_hits: self.cache_hits.load(Ordering::Relaxed),
            model_cache_misses: self.cache_misses.load(Ordering::Relaxed),
            model_cache_hit_ratio: self.cache_hit_ratio(),
            p50_latency_ms: self.p50_latency().map(|d| d.as_secs_f64() * 1000.0),
            p95_latency_ms: self.p95_latency().map(|d| d.as_secs_f64() * 1000.0),
            p99_latency_ms: self.p99_latency().map(|d| d.as_secs_f64() * 1000.0),
            uptime_secs: self.uptime().as_secs(),
        }
    }

    /// Reset all statistics
    pub fn reset(&self) {
        for counter in [
            &self.requests,
            &self.streaming_requests,
            &self.retries,
            &self.errors,
            &self.timeouts,
            &self.frames_forwarded,
            &self.empty_deltas,
            &self.passthrough_lines,
            &self.bytes_in,
            &self.cache_hits,
            &self.cache_misses,
        ] {
            counter.store(0, Ordering::Relaxed);
        }

        if let Ok(mut latencies) = self.latencies.write() {
            latencies.clear();
        }

        if let Ok(mut started) = self.started_at.write() {
            *started = Some(Instant::now());
        }
    }
}

/// Statistics summary for serialization.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatsSummary {
    /// Total number of chat-completion requests.
    pub total_requests: u64,
    /// Number of streaming requests.
    pub streaming_requests: u64,
    /// Upstream attempts beyond the first.
    pub upstream_retries: u64,
    /// Total number of errors encountered.
    pub total_errors: u64,
    /// Streams closed by the timeout.
    pub stream_timeouts: u64,
    /// Normalized frames written to clients.
    pub frames_forwarded: u64,
    /// Cumulative deltas that carried no new text.
    pub empty_deltas_suppressed: u64,
    /// Malformed upstream lines forwarded verbatim.
    pub passthrough_lines: u64,
    /// Upstream stream bytes read.
    pub upstream_bytes: u64,
    /// Model list lookups served from cache.
    pub model_cache_hits: u64,
    /// Model list lookups that went upstream.
    pub model_cache_misses: u64,
    /// Cache hit ratio, absent before any lookup.
    pub model_cache_hit_ratio: Option<f64>,
    /// 50th percentile latency in milliseconds.
    pub p50_latency_ms: Option<f64>,
    /// 95th percentile latency in milliseconds.
    pub p95_latency_ms: Option<f64>,
    /// 99th percentile latency in milliseconds.
    pub p99_latency_ms: Option<f64>,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(outcome: LifecycleState, frames: u64) -> SessionReport {
        SessionReport {
            session_id: "s".to_string(),
            outcome,
            lines_seen: frames + 1,
            frames_written: frames,
            empty_deltas: 1,
            passthrough_lines: 0,
            bytes_in: 256,
            elapsed: Duration::from_millis(40),
        }
    }

    #[test]
    fn test_stats_recording() {
        let stats = ProxyStats::new();

        stats.record_request(1, Duration::from_millis(50));
        stats.record_request(3, Duration::from_millis(100));

        assert_eq!(stats.total_requests(), 2);
        assert_eq!(stats.total_retries(), 2);
        assert_eq!(stats.streaming_requests(), 0);
    }

    #[test]
    fn test_session_outcomes() {
        let stats = ProxyStats::new();

        stats.record_streaming_request(1);
        stats.record_session(&report(LifecycleState::Completed, 3));
        stats.record_streaming_request(2);
        stats.record_session(&report(LifecycleState::TimedOut, 1));
        stats.record_streaming_request(1);
        stats.record_session(&report(LifecycleState::Failed, 0));

        let summary = stats.summary();
        assert_eq!(summary.streaming_requests, 3);
        assert_eq!(summary.total_requests, 3);
        assert_eq!(summary.upstream_retries, 1);
        assert_eq!(summary.frames_forwarded, 4);
        assert_eq!(summary.stream_timeouts, 1);
        assert_eq!(summary.total_errors, 1);
        assert_eq!(summary.empty_deltas_suppressed, 3);
        assert_eq!(summary.upstream_bytes, 768);
    }

    #[test]
    fn test_cache_hit_ratio() {
        let stats = ProxyStats::new();
        assert_eq!(stats.cache_hit_ratio(), None);

        stats.record_model_lookup(false);
        stats.record_model_lookup(true);
        stats.record_model_lookup(true);
        stats.record_model_lookup(true);

        assert!((stats.cache_hit_ratio().unwrap() - 0.75).abs() < 0.01);
    }

    #[test]
    fn test_latency_percentiles() {
        let stats = ProxyStats::new();

        // Add 100 latencies
        for i in 1..=100 {
            stats.record_request(1, Duration::from_millis(i));
        }

        let p50 = stats.p50_latency().unwrap();
        let p95 = stats.p95_latency().unwrap();
        let p99 = stats.p99_latency().unwrap();

        assert!(p50.as_millis() >= 49 && p50.as_millis() <= 51);
        assert!(p95.as_millis() >= 94 && p95.as_millis() <= 96);
        assert!(p99.as_millis() >= 98 && p99.as_millis() <= 100);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let stats = ProxyStats::new();
        for i in 0..(LATENCY_WINDOW as u64 + 500) {
            stats.record_request(1, Duration::from_millis(i));
        }
        assert_eq!(stats.latencies.read().unwrap().len(), LATENCY_WINDOW);
        assert!(stats.p50_latency().unwrap() >= Duration::from_millis(500));
    }

    #[test]
    fn test_reset() {
        let stats = ProxyStats::new();
        stats.record_streaming_request(3);
        stats.record_session(&report(LifecycleState::TimedOut, 5));
        stats.record_model_lookup(true);

        stats.reset();

        let summary = stats.summary();
        assert_eq!(summary.total_requests, 0);
        assert_eq!(summary.upstream_retries, 0);
        assert_eq!(summary.stream_timeouts, 0);
        assert_eq!(summary.frames_forwarded, 0);
        assert_eq!(summary.model_cache_hit_ratio, None);
        assert_eq!(summary.p50_latency_ms, None);
    }
}
