//! Stream session: one upstream SSE body in, one normalized SSE body out.
//!
//! # State Machine
//!
//! ```text
//!                 end of stream
//!     [Active] ────────────────────> [Completed] ──┐
//!        │  │   read/write error                   │
//!        │  └──────────────────────> [Failed] ─────┼──> [Closed]
//!        │      deadline                           │
//!        └─────────────────────────> [TimedOut] ───┘
//! ```
//!
//! Leaving `Active` is a compare-and-set on an atomic; only the first
//! caller (read loop or deadline) wins and performs the terminal writes:
//! an optional error frame, `data: [DONE]`, then closing the sink. Every
//! regular write re-checks the state while holding the sink lock, so
//! nothing reaches the client after a terminal transition was claimed.
//!
//! A regular write blocked on a client that stopped reading is abandoned as
//! soon as the state leaves `Active`. Terminal writes wait at most
//! [`TERMINAL_WRITE_TIMEOUT`] each before the sink is closed regardless.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

use super::frame::{FrameBuffer, DATA_PREFIX};
use super::normalize::DeltaNormalizer;
use super::sink::{FrameSink, SinkClosed};
use super::timer::LifecycleTimer;

/// Terminal sentinel frame.
pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// Longest a terminal frame may wait on a stalled client.
pub const TERMINAL_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

const CONTENT_POINTER: &str = "/choices/0/delta/content";

/// Lifecycle of a stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Forwarding frames
    Active,
    /// Upstream ended normally
    Completed,
    /// Deadline fired first
    TimedOut,
    /// Read or write failed
    Failed,
    /// Sink closed
    Closed,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Active,
            1 => Self::Completed,
            2 => Self::TimedOut,
            3 => Self::Failed,
            _ => Self::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Completed => 1,
            Self::TimedOut => 2,
            Self::Failed => 3,
            Self::Closed => 4,
        }
    }
}

/// Encode `{"error":true,"message":...}` as an SSE frame.
pub fn error_frame(message: &str) -> Bytes {
    data_frame(&json!({ "error": true, "message": message }))
}

fn data_frame(payload: &Value) -> Bytes {
    Bytes::from(format!("{DATA_PREFIX}{payload}\n\n"))
}

/// State shared between the read loop and the deadline task.
struct SessionCore<S> {
    id: String,
    /// Terminal kind once claimed; never goes back to `Active`.
    state: AtomicU8,
    closed: AtomicBool,
    sink: Mutex<S>,
    state_tx: watch::Sender<LifecycleState>,
}

impl<S: FrameSink> SessionCore<S> {
    fn new(id: String, sink: S) -> Self {
        let (state_tx, _) = watch::channel(LifecycleState::Active);
        Self {
            id,
            state: AtomicU8::new(LifecycleState::Active.as_u8()),
            closed: AtomicBool::new(false),
            sink: Mutex::new(sink),
            state_tx,
        }
    }

    fn is_active(&self) -> bool {
        self.state.load(Ordering::Acquire) == LifecycleState::Active.as_u8()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn outcome(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state_tx.subscribe()
    }

    /// Write a frame unless the session already left `Active`.
    ///
    /// A send blocked on backpressure is dropped when the state changes,
    /// releasing the sink lock for the terminal path. Returns whether the
    /// frame was written.
    async fn write(&self, frame: Bytes) -> Result<bool, SinkClosed> {
        let mut state_rx = self.subscribe();
        let send = async {
            let mut sink = self.sink.lock().await;
            if !self.is_active() {
                return Ok(false);
            }
            sink.send(frame).await.map(|()| true)
        };

        tokio::select! {
            biased;
            _ = state_rx.wait_for(|state| *state != LifecycleState::Active) => Ok(false),
            written = send => written,
        }
    }

    /// Claim the terminal transition and emit the terminal frames.
    ///
    /// Returns `false` without touching the sink if another path already
    /// claimed it.
    async fn terminate(&self, outcome: LifecycleState, error: Option<String>) -> bool {
        let claimed = self
            .state
            .compare_exchange(
                LifecycleState::Active.as_u8(),
                outcome.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if !claimed {
            tracing::debug!(session_id = %self.id, ?outcome, "terminal transition already claimed");
            return false;
        }
        self.state_tx.send_replace(outcome);

        let mut sink = self.sink.lock().await;
        if let Some(message) = error {
            self.send_terminal(&mut sink, error_frame(&message), "error frame").await;
        }
        self.send_terminal(&mut sink, Bytes::from_static(DONE_FRAME), "[DONE]").await;
        sink.close();
        drop(sink);

        self.closed.store(true, Ordering::Release);
        self.state_tx.send_replace(LifecycleState::Closed);
        true
    }

    async fn send_terminal(&self, sink: &mut S, frame: Bytes, what: &'static str) {
        match tokio::time::timeout(TERMINAL_WRITE_TIMEOUT, sink.send(frame)).await {
            Ok(Ok(())) => {},
            Ok(Err(SinkClosed)) => {
                tracing::debug!(session_id = %self.id, frame = what, "client gone before terminal frame");
            },
            Err(_) => {
                tracing::warn!(session_id = %self.id, frame = what, "client not reading, terminal frame dropped");
            },
        }
    }
}

/// Summary of a finished session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    /// Session identifier used in logs.
    pub session_id: String,
    /// Which terminal path won.
    pub outcome: LifecycleState,
    /// `data:` lines received from upstream.
    pub lines_seen: u64,
    /// Frames written before the terminal frames.
    pub frames_written: u64,
    /// Content deltas that normalized to nothing and were dropped.
    pub empty_deltas: u64,
    /// Lines forwarded verbatim because they were not JSON.
    pub passthrough_lines: u64,
    /// Upstream body bytes read.
    pub bytes_in: u64,
    /// Wall time from start to close.
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

#[derive(Debug, Default)]
struct Counters {
    lines_seen: u64,
    frames_written: u64,
    empty_deltas: u64,
    passthrough_lines: u64,
    bytes_in: u64,
}

/// Normalizes one upstream SSE body into a sink.
pub struct StreamSession<S> {
    core: Arc<SessionCore<S>>,
    frames: FrameBuffer,
    normalizer: DeltaNormalizer,
    timeout: Duration,
    counters: Counters,
}

impl<S: FrameSink> StreamSession<S> {
    /// Create a session writing to `sink`, force-closed after `timeout`.
    pub fn new(sink: S, timeout: Duration) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        Self {
            core: Arc::new(SessionCore::new(id, sink)),
            frames: FrameBuffer::new(),
            normalizer: DeltaNormalizer::new(),
            timeout,
            counters: Counters::default(),
        }
    }

    /// Session identifier.
    pub fn id(&self) -> &str {
        &self.core.id
    }

    /// Drive the session until the sink is closed.
    ///
    /// Never returns an error: failures are reported to the client in-band
    /// and summarized in the returned report.
    pub async fn run<St, E>(mut self, upstream: St) -> SessionReport
    where
        St: Stream<Item = Result<Bytes, E>> + Send,
        E: Display + Send,
    {
        let started = Instant::now();
        let mut state_rx = self.core.subscribe();
        let timer = self.arm_deadline();
        let mut upstream = std::pin::pin!(upstream);

        tracing::debug!(session_id = %self.core.id, timeout = ?self.timeout, "stream session started");

        let natural_end = loop {
            if !self.core.is_active() {
                break None;
            }
            tokio::select! {
                biased;
                changed = state_rx.changed() => {
                    if changed.is_err() || !self.core.is_active() {
                        break None;
                    }
                },
                chunk = upstream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        self.counters.bytes_in += bytes.len() as u64;
                        let lines = self.frames.feed(&bytes);
                        if let Err(SinkClosed) = self.forward_lines(lines).await {
                            break Some((LifecycleState::Failed, Some("Client stream closed".to_string())));
                        }
                    },
                    Some(Err(err)) => {
                        tracing::warn!(session_id = %self.core.id, error = %err, "upstream read failed");
                        break Some((LifecycleState::Failed, Some(format!("Upstream stream error: {err}"))));
                    },
                    None => {
                        let tail: Vec<String> = self.frames.flush().into_iter().collect();
                        if let Err(SinkClosed) = self.forward_lines(tail).await {
                            break Some((LifecycleState::Failed, Some("Client stream closed".to_string())));
                        }
                        break Some((LifecycleState::Completed, None));
                    },
                },
            }
        };

        if let Some((outcome, error)) = natural_end {
            if self.core.terminate(outcome, error).await {
                timer.disarm();
            }
        }

        // The deadline task may still be writing its terminal frames.
        while !self.core.is_closed() {
            if state_rx.changed().await.is_err() {
                break;
            }
        }

        let report = SessionReport {
            session_id: self.core.id.clone(),
            outcome: self.core.outcome(),
            lines_seen: self.counters.lines_seen,
            frames_written: self.counters.frames_written,
            empty_deltas: self.counters.empty_deltas,
            passthrough_lines: self.counters.passthrough_lines,
            bytes_in: self.counters.bytes_in,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            session_id = %report.session_id,
            outcome = ?report.outcome,
            frames = report.frames_written,
            lines = report.lines_seen,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "stream session closed"
        );
        report
    }

    fn arm_deadline(&self) -> LifecycleTimer {
        let core = Arc::clone(&self.core);
        let timeout = self.timeout;
        LifecycleTimer::arm(timeout, move || async move {
            let message = format!("Stream timed out after {timeout:?}");
            if core.terminate(LifecycleState::TimedOut, Some(message)).await {
                tracing::warn!(session_id = %core.id, ?timeout, "stream session timed out");
            }
        })
    }

    async fn forward_lines(&mut self, lines: Vec<String>) -> Result<(), SinkClosed> {
        for line in lines {
            self.counters.lines_seen += 1;
            if let Some(frame) = self.transform_line(&line) {
                if self.core.write(frame).await? {
                    self.counters.frames_written += 1;
                }
            }
        }
        Ok(())
    }

    /// Turn one upstream `data:` line into the frame to forward, if any.
    ///
    /// Never drops a line it cannot understand: non-JSON payloads are
    /// forwarded verbatim. Only content deltas are rewritten.
    fn transform_line(&mut self, line: &str) -> Option<Bytes> {
        let payload = line.strip_prefix(DATA_PREFIX).unwrap_or(line).trim();

        // Includes upstream's own `[DONE]`, which does not end the session.
        let Ok(mut json) = serde_json::from_str::<Value>(payload) else {
            self.counters.passthrough_lines += 1;
            return Some(Bytes::from(format!("{line}\n\n")));
        };

        let Some(current) = json.pointer(CONTENT_POINTER).and_then(Value::as_str) else {
            return Some(data_frame(&json));
        };

        match self.normalizer.advance(current) {
            Some(increment) => {
                if let Some(slot) = json.pointer_mut(CONTENT_POINTER) {
                    *slot = Value::String(increment);
                }
                Some(data_frame(&json))
            },
            None => {
                self.counters.empty_deltas += 1;
                None
            },
        }
    }
}
