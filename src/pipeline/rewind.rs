//! Stream adapter replaying bytes read past the upgrade head.
//!
//! The handshake reads the HTTP head in chunks, so the first frames may
//! already sit in its buffer. `RewindStream` yields those bytes before
//! delegating reads to the underlying stream. Writes always pass through.

use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// A stream that yields `leftover` before reading from `inner`.
#[derive(Debug)]
pub struct RewindStream<S> {
    leftover: Bytes,
    inner: S,
}

impl<S> RewindStream<S> {
    /// Create a `RewindStream` replaying `leftover` ahead of `inner`.
    pub fn new(leftover: impl Into<Bytes>, inner: S) -> Self {
        Self {
            leftover: leftover.into(),
            inner,
        }
    }

    /// Bytes still waiting to be replayed.
    #[must_use]
    pub fn pending(&self) -> usize { self.leftover.len() }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &S { &self.inner }
}

impl<S: AsyncRead + Unpin> AsyncRead for RewindStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.leftover.has_remaining() {
            let take = self.leftover.len().min(buf.remaining());
            let chunk = self.leftover.split_to(take);
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for RewindStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    use super::*;

    #[tokio::test]
    async fn replays_leftover_before_inner() {
        let (mut near, far) = duplex(64);
        near.write_all(b" world").await.expect("write");
        drop(near);

        let mut stream = RewindStream::new(b"hello".to_vec(), far);
        assert_eq!(stream.pending(), 5);
        let mut out = String::new();
        stream.read_to_string(&mut out).await.expect("read");
        assert_eq!(out, "hello world");
        assert_eq!(stream.pending(), 0);
    }

    #[tokio::test]
    async fn small_reads_drain_leftover_in_order() {
        let mut stream = RewindStream::new(Bytes::from_static(b"abc"), tokio::io::empty());
        let mut one = [0_u8; 2];
        assert_eq!(stream.read(&mut one).await.expect("read"), 2);
        assert_eq!(&one, b"ab");
        assert_eq!(stream.read(&mut one).await.expect("read"), 1);
        assert_eq!(one[0], b'c');
        assert_eq!(stream.read(&mut one).await.expect("read"), 0);
    }
}
