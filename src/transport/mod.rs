//! Byte transport with independently closable directions.
//!
//! [`Transport`] wraps any ordered, reliable byte stream and tracks the
//! [`DirectionState`] of each half. Shutting down the write half (see
//! [`Transport::close_send`]) leaves the read half usable so the framing
//! engine can finish a close handshake while inbound frames drain. Writes
//! after a half-close fail with [`ConnectionClosed`].

use std::{
    io,
    net::SocketAddr,
    pin::Pin,
    task::{Context, Poll, ready},
};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

pub mod memory;
mod state;
mod tcp;

pub use state::DirectionState;
pub use tcp::{TransportListener, connect};

/// Trait alias for byte streams that can carry a pipeline.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}
impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Addresses of the two endpoints of a transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Remote endpoint address, if known.
    pub peer_addr: Option<SocketAddr>,
    /// Local bound address, if known.
    pub local_addr: Option<SocketAddr>,
}

/// Marker error carried inside [`io::Error`] when writing to a closed half.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("connection closed")]
pub struct ConnectionClosed;

pub(crate) fn connection_closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, ConnectionClosed)
}

/// Returns `true` if `error` was raised by writing to a closed send half.
#[must_use]
pub fn is_connection_closed(error: &io::Error) -> bool {
    error
        .get_ref()
        .is_some_and(|inner| inner.is::<ConnectionClosed>())
}

/// Returns `true` for error kinds a peer produces by tearing the socket down.
#[must_use]
pub fn is_peer_reset(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

/// Byte transport enforcing half-close semantics over an inner stream.
#[derive(Debug)]
pub struct Transport<S> {
    inner: S,
    info: ConnectionInfo,
    state: DirectionState,
}

impl<S> Transport<S> {
    /// Wrap `inner`, recording the endpoint addresses in `info`.
    pub fn new(inner: S, info: ConnectionInfo) -> Self {
        Self {
            inner,
            info,
            state: DirectionState::Open,
        }
    }

    /// Endpoint addresses of this transport.
    #[must_use]
    pub fn info(&self) -> ConnectionInfo { self.info }

    /// Current directional state.
    #[must_use]
    pub fn state(&self) -> DirectionState { self.state }

    /// Borrow the wrapped stream.
    pub fn get_ref(&self) -> &S { &self.inner }

    /// Unwrap the inner stream, discarding state tracking.
    pub fn into_inner(self) -> S { self.inner }
}

impl<S: AsyncWrite + Unpin> Transport<S> {
    /// Half-close the send direction. Reading remains possible.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] if the inner stream fails to shut down. The
    /// send direction is considered closed either way.
    pub async fn close_send(&mut self) -> io::Result<()> { self.shutdown().await }

    /// Close both directions. Subsequent reads report end of stream.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] if the inner stream fails to shut down.
    pub async fn close_full(&mut self) -> io::Result<()> {
        let result = self.close_send().await;
        self.state = self.state.close_receive();
        result
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Transport<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.state.can_receive() {
            return Poll::Ready(Ok(()));
        }
        let before = buf.filled().len();
        ready!(Pin::new(&mut self.inner).poll_read(cx, buf))?;
        if buf.filled().len() == before && buf.remaining() > 0 {
            self.state = self.state.close_receive();
        }
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Transport<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if !self.state.can_send() {
            return Poll::Ready(Err(connection_closed()));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if !self.state.can_send() {
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if !self.state.can_send() {
            return Poll::Ready(Ok(()));
        }
        let result = ready!(Pin::new(&mut self.inner).poll_shutdown(cx));
        self.state = self.state.close_send();
        Poll::Ready(result)
    }
}
