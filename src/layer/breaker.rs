//! Fault-injection layer that severs stream directions on command.
//!
//! [`BreakerLayer`] is inserted into a layer stack like any other stage. Its
//! [`BreakerHandle`] can later cut the inbound or outbound direction of every
//! stream the layer wrapped, either completing it (clean end of stream) or
//! failing it (connection reset), to simulate abrupt peer disconnects.

use std::{
    io,
    pin::Pin,
    sync::{
        Arc,
        Mutex,
        PoisonError,
        Weak,
        atomic::{AtomicU8, AtomicUsize, Ordering},
    },
    task::{Context, Poll, ready},
};

use futures::{
    future::{self, BoxFuture},
    task::AtomicWaker,
};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::{LayerError, StreamLayer};
use crate::{Role, transport::ByteStream};

const OPEN: u8 = 0;
const COMPLETE: u8 = 1;
const FAIL: u8 = 2;

/// Directions a [`BreakerHandle`] can sever.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Bytes arriving from the peer.
    Inbound,
    /// Bytes sent to the peer.
    Outbound,
    /// Both directions.
    Both,
}

/// How a severed direction behaves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severance {
    /// Reads report end of stream; writes are silently discarded.
    Complete,
    /// Reads fail with `ConnectionReset`; writes fail with `BrokenPipe`.
    Fail,
}

impl Severance {
    fn code(self) -> u8 {
        match self {
            Self::Complete => COMPLETE,
            Self::Fail => FAIL,
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    inbound: AtomicU8,
    outbound: AtomicU8,
    wrapped: AtomicUsize,
    readers: Mutex<Vec<Weak<AtomicWaker>>>,
}

impl Shared {
    fn wake_readers(&self) {
        let mut readers = self.readers.lock().unwrap_or_else(PoisonError::into_inner);
        readers.retain(|reader| {
            reader.upgrade().is_some_and(|waker| {
                waker.wake();
                true
            })
        });
    }
}

/// Layer whose wrapped streams can be severed through a [`BreakerHandle`].
#[derive(Clone, Debug)]
pub struct BreakerLayer {
    shared: Arc<Shared>,
}

/// Control handle paired with a [`BreakerLayer`].
#[derive(Clone, Debug)]
pub struct BreakerHandle {
    shared: Arc<Shared>,
}

impl BreakerLayer {
    /// Create a layer and the handle that controls it.
    #[must_use]
    pub fn new() -> (Self, BreakerHandle) {
        let shared = Arc::new(Shared::default());
        (
            Self {
                shared: Arc::clone(&shared),
            },
            BreakerHandle { shared },
        )
    }
}

impl BreakerHandle {
    /// Sever `direction` on every stream the paired layer wrapped.
    ///
    /// Severing is permanent and applies to streams wrapped later as well.
    /// Pending reads are woken so they observe the new state immediately.
    pub fn sever(&self, direction: Direction, how: Severance) {
        let code = how.code();
        if matches!(direction, Direction::Inbound | Direction::Both) {
            self.shared.inbound.store(code, Ordering::Release);
        }
        if matches!(direction, Direction::Outbound | Direction::Both) {
            self.shared.outbound.store(code, Ordering::Release);
        }
        log::debug!("breaker severed: direction={direction:?}, how={how:?}");
        self.shared.wake_readers();
    }

    /// Number of streams the paired layer has wrapped so far.
    #[must_use]
    pub fn wrapped(&self) -> usize { self.shared.wrapped.load(Ordering::Acquire) }
}

impl<S: ByteStream> StreamLayer<S> for BreakerLayer {
    type Stream = Breaker<S>;

    fn wrap(&self, stream: S, _role: Role) -> BoxFuture<'static, Result<Breaker<S>, LayerError>> {
        let reader = Arc::new(AtomicWaker::new());
        {
            let mut readers = self.shared.readers.lock().unwrap_or_else(PoisonError::into_inner);
            readers.retain(|weak| weak.strong_count() > 0);
            readers.push(Arc::downgrade(&reader));
        }
        self.shared.wrapped.fetch_add(1, Ordering::AcqRel);
        Box::pin(future::ready(Ok(Breaker {
            inner: stream,
            shared: Arc::clone(&self.shared),
            reader,
            shut_down: false,
        })))
    }
}

/// Stream produced by [`BreakerLayer`].
#[derive(Debug)]
pub struct Breaker<S> {
    inner: S,
    shared: Arc<Shared>,
    reader: Arc<AtomicWaker>,
    shut_down: bool,
}

impl<S> Breaker<S> {
    fn inbound(&self) -> u8 { self.shared.inbound.load(Ordering::Acquire) }

    fn outbound(&self) -> u8 { self.shared.outbound.load(Ordering::Acquire) }
}

impl<S: AsyncRead + Unpin> AsyncRead for Breaker<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.inbound() {
            COMPLETE => return Poll::Ready(Ok(())),
            FAIL => return Poll::Ready(Err(io::ErrorKind::ConnectionReset.into())),
            _ => {}
        }
        self.reader.register(cx.waker());
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if poll.is_pending() {
            // re-check after registering so a concurrent sever is not missed
            match self.inbound() {
                COMPLETE => return Poll::Ready(Ok(())),
                FAIL => return Poll::Ready(Err(io::ErrorKind::ConnectionReset.into())),
                _ => {}
            }
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Breaker<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.outbound() {
            OPEN => Pin::new(&mut self.inner).poll_write(cx, buf),
            COMPLETE => {
                if !self.shut_down {
                    let _ = ready!(Pin::new(&mut self.inner).poll_shutdown(cx));
                    self.shut_down = true;
                }
                Poll::Ready(Ok(buf.len()))
            }
            _ => Poll::Ready(Err(io::ErrorKind::BrokenPipe.into())),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.outbound() {
            OPEN => Pin::new(&mut self.inner).poll_flush(cx),
            COMPLETE => Poll::Ready(Ok(())),
            _ => Poll::Ready(Err(io::ErrorKind::BrokenPipe.into())),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.shut_down {
            return Poll::Ready(Ok(()));
        }
        match self.outbound() {
            FAIL => Poll::Ready(Err(io::ErrorKind::BrokenPipe.into())),
            _ => {
                let result = ready!(Pin::new(&mut self.inner).poll_shutdown(cx));
                self.shut_down = true;
                Poll::Ready(result)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::transport::memory;

    #[tokio::test]
    async fn complete_inbound_wakes_pending_read_with_eof() {
        let (a, _b) = memory::pair(64);
        let (layer, handle) = BreakerLayer::new();
        let mut stream = layer.wrap(a, Role::Client).await.expect("wrap");
        assert_eq!(handle.wrapped(), 1);

        let reader = tokio::spawn(async move {
            let mut buf = [0_u8; 4];
            stream.read(&mut buf).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.sever(Direction::Inbound, Severance::Complete);

        let read = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("read should wake")
            .expect("join")
            .expect("read result");
        assert_eq!(read, 0);
    }

    #[rstest]
    #[case(Direction::Inbound, io::ErrorKind::ConnectionReset, true)]
    #[case(Direction::Outbound, io::ErrorKind::BrokenPipe, false)]
    #[tokio::test]
    async fn fail_severance_surfaces_io_errors(
        #[case] direction: Direction,
        #[case] kind: io::ErrorKind,
        #[case] reading: bool,
    ) {
        let (a, _b) = memory::pair(64);
        let (layer, handle) = BreakerLayer::new();
        let mut stream = layer.wrap(a, Role::Server).await.expect("wrap");
        handle.sever(direction, Severance::Fail);

        let err = if reading {
            let mut buf = [0_u8; 4];
            stream.read(&mut buf).await.expect_err("read must fail")
        } else {
            stream.write_all(b"x").await.expect_err("write must fail")
        };
        assert_eq!(err.kind(), kind);
    }

    #[tokio::test]
    async fn wrapping_prunes_readers_of_dropped_streams() {
        let (layer, handle) = BreakerLayer::new();
        for _ in 0..10 {
            let (a, _b) = memory::pair(64);
            drop(layer.wrap(a, Role::Server).await.expect("wrap"));
        }
        let (a, _b) = memory::pair(64);
        let _live = layer.wrap(a, Role::Server).await.expect("wrap");

        let readers = layer.shared.readers.lock().expect("readers lock").len();
        assert_eq!(readers, 1);
        assert_eq!(handle.wrapped(), 11);
    }

    #[tokio::test]
    async fn complete_outbound_discards_writes_and_ends_peer_stream() {
        let (a, mut b) = memory::pair(64);
        let (layer, handle) = BreakerLayer::new();
        let mut stream = layer.wrap(a, Role::Client).await.expect("wrap");
        stream.write_all(b"before").await.expect("write before");
        handle.sever(Direction::Outbound, Severance::Complete);
        stream.write_all(b"after").await.expect("discarded write");

        let mut received = Vec::new();
        b.read_to_end(&mut received).await.expect("peer drains");
        assert_eq!(received, b"before");
    }
}
