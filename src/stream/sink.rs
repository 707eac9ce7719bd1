//! Output side of a stream session.

use std::future::Future;

use bytes::Bytes;
use tokio::sync::mpsc;

/// The sink was closed or its reader went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("frame sink closed")]
pub struct SinkClosed;

/// Destination for encoded SSE frames.
///
/// A session calls [`close`](Self::close) exactly once, after the terminal
/// sentinel.
pub trait FrameSink: Send + 'static {
    /// Deliver one encoded frame.
    fn send(&mut self, frame: Bytes) -> impl Future<Output = Result<(), SinkClosed>> + Send;

    /// Close the sink; later sends fail with [`SinkClosed`].
    fn close(&mut self);
}

/// Sink backed by a bounded tokio channel.
///
/// The receiving half becomes the HTTP response body. Closing drops the
/// sender so the body stream ends.
#[derive(Debug)]
pub struct ChannelSink {
    tx: Option<mpsc::Sender<Bytes>>,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }
}

impl FrameSink for ChannelSink {
    async fn send(&mut self, frame: Bytes) -> Result<(), SinkClosed> {
        let tx = self.tx.as_ref().ok_or(SinkClosed)?;
        tx.send(frame).await.map_err(|_| SinkClosed)
    }

    fn close(&mut self) {
        self.tx = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_delivers_then_closes() {
        let (mut sink, mut rx) = ChannelSink::new(4);
        sink.send(Bytes::from_static(b"data: 1\n\n")).await.unwrap();
        sink.close();

        assert_eq!(rx.recv().await, Some(Bytes::from_static(b"data: 1\n\n")));
        assert_eq!(rx.recv().await, None);
        assert_eq!(sink.send(Bytes::from_static(b"late")).await, Err(SinkClosed));
    }

    #[tokio::test]
    async fn test_dropped_receiver_fails_send() {
        let (mut sink, rx) = ChannelSink::new(1);
        drop(rx);
        assert_eq!(sink.send(Bytes::from_static(b"x")).await, Err(SinkClosed));
    }
}
