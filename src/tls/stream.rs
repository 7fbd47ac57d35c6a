//! Stream decoration for TLS connections.
//!
//! [`PassThroughStream`] delegates every operation to the stream it wraps;
//! the platform's connection handlers only ever see the wrapper, so the
//! underlying TLS type can change without touching them.
//!
//! [`DeferredHeaderStream`] carries the one stateful quirk: legacy tooling
//! expects its agent identification header and the first payload to arrive
//! in a single write, so a first write containing the header marker is held
//! back and prefixed onto the next write. The quirk is isolated here so it
//! can be tested on its own — it affects wire compatibility.

use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

/// First-write marker identifying the legacy client agent header.
const AGENT_HEADER_MARKER: &[u8] = b"Agent-Name: ectools";

/// Transparent adapter delegating every read and write to the wrapped
/// stream.
#[derive(Debug)]
pub struct PassThroughStream<S> {
    inner: S,
}

impl<S> PassThroughStream<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PassThroughStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PassThroughStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// In-flight merged header+payload write.
#[derive(Debug)]
struct MergedWrite {
    buf: Vec<u8>,
    written: usize,
    /// What to report to the caller once the whole buffer is out: the
    /// caller only handed us the payload part.
    payload_len: usize,
}

/// Write adapter that merges the deferred agent header into the next write.
///
/// Only the very first write is inspected; a first write without the marker
/// makes the adapter fully transparent from then on.
#[derive(Debug)]
pub struct DeferredHeaderStream<S> {
    inner: S,
    first_write: bool,
    held_header: Option<Vec<u8>>,
    merged: Option<MergedWrite>,
}

impl<S> DeferredHeaderStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            first_write: true,
            held_header: None,
            merged: None,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncWrite + Unpin> DeferredHeaderStream<S> {
    /// Push the in-flight merged buffer into the inner stream. Ready only
    /// once every byte is out.
    fn poll_drain_merged(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<usize>> {
        let Some(merged) = self.merged.as_mut() else {
            return Poll::Ready(Ok(0));
        };
        while merged.written < merged.buf.len() {
            match Pin::new(&mut self.inner).poll_write(cx, &merged.buf[merged.written..]) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Ok(0)) => {
                    return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
                }
                Poll::Ready(Ok(n)) => merged.written += n,
                Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
            }
        }
        let payload_len = merged.payload_len;
        self.merged = None;
        Poll::Ready(Ok(payload_len))
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for DeferredHeaderStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for DeferredHeaderStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.merged.is_some() {
            return this.poll_drain_merged(cx);
        }
        if this.first_write {
            this.first_write = false;
            if contains_marker(buf) {
                debug!("agent header held back until the next write");
                this.held_header = Some(buf.to_vec());
                return Poll::Ready(Ok(buf.len()));
            }
        }
        if let Some(header) = this.held_header.take() {
            let mut merged = Vec::with_capacity(header.len() + buf.len());
            merged.extend_from_slice(&header);
            merged.extend_from_slice(buf);
            this.merged = Some(MergedWrite {
                buf: merged,
                written: 0,
                payload_len: buf.len(),
            });
            return this.poll_drain_merged(cx);
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.merged.is_some() {
            match this.poll_drain_merged(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
                Poll::Ready(Ok(_)) => {}
            }
        }
        // A header still held back stays held: flushing must not break the
        // single-write guarantee the next payload relies on.
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.merged.is_some() {
            match this.poll_drain_merged(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
                Poll::Ready(Ok(_)) => {}
            }
        }
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

fn contains_marker(buf: &[u8]) -> bool {
    buf.len() >= AGENT_HEADER_MARKER.len()
        && buf
            .windows(AGENT_HEADER_MARKER.len())
            .any(|window| window == AGENT_HEADER_MARKER)
}
