//! SSE stream normalization.
//!
//! The upstream emits `choices[0].delta.content` as the cumulative text
//! so far. This module turns that into the incremental deltas clients
//! expect and guarantees each client stream ends with exactly one
//! terminal `data: [DONE]` frame of its own, whatever ends it first. An
//! upstream `[DONE]` line is forwarded like any other non-JSON line.
//!
//! ## Components
//!
//! - [`FrameBuffer`]: reassembles `data:` lines from transport chunks
//! - [`DeltaNormalizer`]: cumulative content to increments
//! - [`LifecycleTimer`]: single-shot deadline that force-closes a stream
//! - [`StreamSession`]: drives the above into a [`FrameSink`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use deltagate::stream::{ChannelSink, StreamSession};
//!
//! # async fn demo(upstream: reqwest::Response) {
//! let (sink, mut rx) = ChannelSink::new(32);
//! let session = StreamSession::new(sink, Duration::from_secs(60));
//! tokio::spawn(session.run(upstream.bytes_stream()));
//!
//! while let Some(frame) = rx.recv().await {
//!     print!("{}", String::from_utf8_lossy(&frame));
//! }
//! # }
//! ```

mod frame;
mod normalize;
mod session;
mod sink;
mod timer;

pub use frame::{FrameBuffer, DATA_PREFIX};
pub use normalize::{incremental_suffix, DeltaNormalizer};
pub use session::{
    error_frame, LifecycleState, SessionReport, StreamSession, DONE_FRAME, TERMINAL_WRITE_TIMEOUT,
};
pub use sink::{ChannelSink, FrameSink, SinkClosed};
pub use timer::{LifecycleTimer, DEFAULT_STREAM_TIMEOUT};
