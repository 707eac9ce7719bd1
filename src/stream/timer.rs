//! Single-shot, cancellable stream deadline.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Default lifetime of a stream session before it is force-terminated.
pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(60);

/// Handle to an armed deadline.
///
/// Dropping the handle does not cancel the deadline; call
/// [`disarm`](Self::disarm). Disarming after the deadline fired, or twice,
/// does nothing.
#[derive(Debug)]
pub struct LifecycleTimer {
    task: JoinHandle<()>,
    duration: Duration,
}

impl LifecycleTimer {
    /// Run `on_expire` once `duration` elapses, unless disarmed first.
    pub fn arm<F, Fut>(duration: Duration, on_expire: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            tracing::debug!(?duration, "stream deadline reached");
            on_expire().await;
        });
        Self { task, duration }
    }

    /// Cancel the deadline.
    pub fn disarm(&self) {
        self.task.abort();
    }

    /// Whether the deadline task has finished (fired or disarmed).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Configured duration.
    pub fn duration(&self) -> Duration {
        self.duration
    }
}
