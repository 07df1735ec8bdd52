//! Progress reporting for layer transfers.
//!
//! A [`ProgressSink`] receives raw byte counts while content streams through
//! the engines, plus status lines describing what is happening. Sinks are
//! shared between concurrent layer transfers, so every method takes `&self`.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;

/// Receives transfer progress.
///
/// Implementations must tolerate `write`/`advance` from several tasks at
/// once, interleaved with status callbacks.
pub trait ProgressSink: Send + Sync {
    /// Record bytes that passed through a transfer stream.
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.advance(buf.len() as u64);
        Ok(buf.len())
    }

    /// Record `bytes` as transferred without supplying the data.
    fn advance(&self, bytes: u64);

    /// In-progress status line.
    fn update(&self, message: &str);

    /// Terminal success status.
    fn success(&self, message: &str);

    /// Terminal failure status.
    fn failure(&self, message: &str);
}

/// Sink in which every call succeeds without doing anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardProgress;

impl ProgressSink for DiscardProgress {
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn advance(&self, _bytes: u64) {}

    fn update(&self, _message: &str) {}

    fn success(&self, _message: &str) {}

    fn failure(&self, _message: &str) {}
}

/// Sink that keeps a running byte total and reports status via `tracing`.
#[derive(Debug, Default)]
pub struct LogProgress {
    transferred: AtomicU64,
    total: Option<u64>,
}

impl LogProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sink that knows how many bytes to expect.
    pub fn with_total(total: u64) -> Self {
        Self {
            transferred: AtomicU64::new(0),
            total: Some(total),
        }
    }

    /// Bytes reported so far.
    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }
}

impl ProgressSink for LogProgress {
    fn advance(&self, bytes: u64) {
        self.transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    fn update(&self, message: &str) {
        tracing::info!(
            transferred = self.transferred(),
            total = ?self.total,
            "{}",
            message
        );
    }

    fn success(&self, message: &str) {
        tracing::info!(transferred = self.transferred(), "{}", message);
    }

    fn failure(&self, message: &str) {
        tracing::error!(transferred = self.transferred(), "{}", message);
    }
}

/// Returns the given sink, or a [`DiscardProgress`] when none is supplied.
pub fn or_discard(sink: Option<Arc<dyn ProgressSink>>) -> Arc<dyn ProgressSink> {
    sink.unwrap_or_else(|| Arc::new(DiscardProgress))
}

/// `AsyncWrite` adapter that reports every accepted chunk to a sink.
pub struct ProgressWriter<W> {
    inner: W,
    sink: Arc<dyn ProgressSink>,
}

impl<W> ProgressWriter<W> {
    pub fn new(inner: W, sink: Arc<dyn ProgressSink>) -> Self {
        Self { inner, sink }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for ProgressWriter<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                this.sink.write(&buf[..n])?;
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
