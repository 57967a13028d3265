//! WebSocket framing engine.
//!
//! The engine owns an upgraded byte stream and runs two halves concurrently.
//! The reader decodes frames, reassembles messages, answers pings and hands
//! messages to the application through a bounded channel. The writer drains
//! the application's outbound stream, fragments messages and performs the
//! close handshake. The halves share the [`ConnectionState`] published
//! through a [`ConnectionHandle`].

mod counter;
mod reader;
mod state;
#[cfg(test)]
mod tests;
mod writer;

use std::{
    num::NonZeroUsize,
    pin::Pin,
    sync::{Arc, OnceLock},
    task::{Context, Poll},
    time::Duration,
};

pub use counter::active_connection_count;
pub(crate) use counter::ActiveConnection;
use futures::{Stream, stream::BoxStream};
pub use state::{CloseOutcome, ConnectionState};
pub(crate) use state::StateCell;
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::timeout,
};
use tokio_util::{
    codec::{FramedRead, FramedWrite},
    sync::CancellationToken,
};

use self::{
    reader::{ReadEnd, Reader},
    writer::{WriteEnd, Writer},
};
use crate::{
    error::PipelineError,
    frame::FrameCodec,
    handshake::HandshakeResult,
    message::{Assembler, Fragmenter, Message},
    role::Role,
    session::ConnectionId,
    transport::{ByteStream, ConnectionInfo},
};

/// Item yielded by a connection's inbound stream.
pub type Inbound = Result<Message, PipelineError>;

const CONTROL_CAPACITY: usize = 16;

/// Per-connection engine limits.
#[derive(Clone, Copy, Debug)]
pub(crate) struct EngineConfig {
    pub role: Role,
    pub max_frame_size: usize,
    pub max_message_size: NonZeroUsize,
    pub fragment_size: NonZeroUsize,
    pub close_grace: Duration,
}

#[derive(Debug, Default)]
struct Shared {
    info: OnceLock<ConnectionInfo>,
    handshake: OnceLock<HandshakeResult>,
}

/// Observer and controller for one connection.
///
/// Handles are cheap to clone. Dropping every handle does not close the
/// connection; call [`ConnectionHandle::abort`] for that.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    pub(crate) fn new(id: ConnectionId, cell: &StateCell, cancel: CancellationToken) -> Self {
        Self {
            id,
            state: cell.subscribe(),
            cancel,
            shared: Arc::default(),
        }
    }

    pub(crate) fn set_info(&self, info: ConnectionInfo) { let _ = self.shared.info.set(info); }

    pub(crate) fn set_handshake(&self, result: HandshakeResult) {
        let _ = self.shared.handshake.set(result);
    }

    /// Identifier of this connection.
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.id }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState { *self.state.borrow() }

    /// Transport addresses, once the byte stream is connected.
    #[must_use]
    pub fn info(&self) -> Option<ConnectionInfo> { self.shared.info.get().copied() }

    /// Upgrade outcome, once the handshake succeeded.
    #[must_use]
    pub fn handshake(&self) -> Option<&HandshakeResult> { self.shared.handshake.get() }

    /// Tear the connection down without a close handshake.
    ///
    /// The connection ends in `Closed(Cancelled)`.
    pub fn abort(&self) { self.cancel.cancel(); }

    /// Wait until the connection reaches a terminal state.
    pub async fn closed(&self) -> CloseOutcome {
        let mut state = self.state.clone();
        let waited = state.wait_for(|state| state.is_terminal()).await.map(|state| *state);
        let terminal = match waited {
            Ok(terminal) => terminal,
            Err(_) => *state.borrow(),
        };
        match terminal {
            ConnectionState::Closed(outcome) => outcome,
            ConnectionState::Failed => CloseOutcome::Error,
            _ => CloseOutcome::Cancelled,
        }
    }
}

impl CloseOutcome {
    /// Map the outcome onto the error a caller waiting for closure sees.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ForcedClose`] for `Forced` and
    /// [`PipelineError::ConnectionClosed`] for `Error`.
    pub fn into_result(self) -> Result<(), PipelineError> {
        match self {
            Self::Clean | Self::Cancelled => Ok(()),
            Self::Forced => Err(PipelineError::ForcedClose),
            Self::Error => Err(PipelineError::ConnectionClosed),
        }
    }
}

/// Messages received from the peer, in arrival order.
///
/// The stream ends after the peer's Close, after the connection fails (the
/// failure is the last item) or when the connection is torn down.
#[derive(Debug)]
pub struct MessageStream {
    rx: mpsc::Receiver<Inbound>,
}

impl MessageStream {
    pub(crate) fn new(rx: mpsc::Receiver<Inbound>) -> Self { Self { rx } }

    /// Receive the next inbound item.
    pub async fn recv(&mut self) -> Option<Inbound> { self.rx.recv().await }
}

impl Stream for MessageStream {
    type Item = Inbound;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Build an inbound channel whose receiving side is a [`MessageStream`].
pub(crate) fn inbound_channel(capacity: usize) -> (mpsc::Sender<Inbound>, MessageStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, MessageStream::new(rx))
}

/// Run the framing engine over an upgraded stream until both halves finish.
///
/// `state` must already be [`ConnectionState::Open`]. The final state is
/// `Closed` with the returned outcome.
pub(crate) async fn run<S: ByteStream>(
    stream: S,
    config: &EngineConfig,
    outbound: BoxStream<'static, Message>,
    inbound: mpsc::Sender<Inbound>,
    state: &StateCell,
    cancel: &CancellationToken,
) -> CloseOutcome {
    let halt = cancel.child_token();
    let codec = FrameCodec::new(config.role, config.max_frame_size);
    let (read_half, write_half) = tokio::io::split(stream);
    let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
    let (deadline_tx, deadline_rx) = watch::channel(None);
    let (failure_tx, failure_rx) = oneshot::channel();

    let reader = Reader {
        frames: FramedRead::new(read_half, codec.decoder()),
        assembler: Assembler::new(config.max_message_size),
        inbound: Some(inbound),
        control: control_tx,
        close_deadline: deadline_rx,
        writer_failure: Some(failure_rx),
        cancel: halt.clone(),
        grace: config.close_grace,
    };
    let writer = Writer {
        sink: FramedWrite::new(write_half, codec.encoder()),
        fragmenter: Fragmenter::new(config.fragment_size),
        outbound,
        control: control_rx,
        close_deadline: deadline_tx,
        failure: Some(failure_tx),
        cancel: halt.clone(),
        grace: config.close_grace,
    };

    let read = reader.run(state);
    let write = writer.run(state);
    tokio::pin!(read, write);
    // the halves enforce the grace period themselves; this catches one
    // stuck in transport I/O
    let backstop = config.close_grace.saturating_mul(2);
    let (read_end, write_end) = tokio::select! {
        end = &mut read => (Some(end), settle(write, backstop, &halt).await),
        end = &mut write => (settle(read, backstop, &halt).await, Some(end)),
    };

    let outcome = outcome(read_end, write_end, cancel.is_cancelled());
    state.advance(ConnectionState::Closed(outcome));
    outcome
}

/// Let the remaining half finish, halting it once `limit` elapses.
///
/// Returns `None` if it had to be halted.
async fn settle<F: Future + Unpin>(
    mut half: F,
    limit: Duration,
    halt: &CancellationToken,
) -> Option<F::Output> {
    if let Ok(end) = timeout(limit, &mut half).await {
        return Some(end);
    }
    log::debug!("connection half did not finish after close; halting");
    halt.cancel();
    let _ = half.await;
    None
}

fn outcome(read: Option<ReadEnd>, write: Option<WriteEnd>, cancelled: bool) -> CloseOutcome {
    if cancelled || read == Some(ReadEnd::Cancelled) || write == Some(WriteEnd::Cancelled) {
        return CloseOutcome::Cancelled;
    }
    if read == Some(ReadEnd::Failed) || write == Some(WriteEnd::Failed) {
        return CloseOutcome::Error;
    }
    if read.is_none()
        || write.is_none()
        || read == Some(ReadEnd::Forced)
        || write == Some(WriteEnd::Forced)
    {
        return CloseOutcome::Forced;
    }
    CloseOutcome::Clean
}
