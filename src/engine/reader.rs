//! Inbound half of the framing engine.

use std::{io, time::Duration};

use bytes::Bytes;
use futures::StreamExt;
use tokio::{
    io::AsyncRead,
    sync::{mpsc, oneshot, watch},
    time::{Instant, sleep_until, timeout},
};
use tokio_util::{codec::FramedRead, sync::CancellationToken};

use super::{ConnectionState, Inbound, StateCell};
use crate::{
    error::{PipelineError, ProtocolError},
    frame::{FrameDecoder, protocol_error},
    message::{Assembler, CloseFrame, Message},
    metrics::{self, Direction},
    transport::is_peer_reset,
};

/// Requests from the reader to the writer.
#[derive(Debug)]
pub(super) enum Control {
    /// Answer a ping with this payload.
    Pong(Bytes),
    /// The peer sent Close; drain outbound, then reply.
    PeerClosed(Option<CloseFrame>),
    /// The peer violated the protocol; send Close with the matching code.
    Fail(ProtocolError),
    /// The peer ended its byte stream without a close handshake.
    PeerGone,
}

/// Why the reader stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum ReadEnd {
    PeerClosed,
    PeerGone,
    Failed,
    Forced,
    Cancelled,
}

pub(super) struct Reader<R> {
    pub(super) frames: FramedRead<R, FrameDecoder>,
    pub(super) assembler: Assembler,
    pub(super) inbound: Option<mpsc::Sender<Inbound>>,
    pub(super) control: mpsc::Sender<Control>,
    pub(super) close_deadline: watch::Receiver<Option<Instant>>,
    pub(super) writer_failure: Option<oneshot::Receiver<PipelineError>>,
    pub(super) cancel: CancellationToken,
    pub(super) grace: Duration,
}

impl<R: AsyncRead + Unpin> Reader<R> {
    pub(super) async fn run(mut self, state: &StateCell) -> ReadEnd {
        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return ReadEnd::Cancelled,
                error = writer_failure(&mut self.writer_failure) => {
                    self.deliver_final(Err(error)).await;
                    return ReadEnd::Failed;
                }
                () = local_close_elapsed(&mut self.close_deadline) => {
                    log::debug!("close reply not received within grace period");
                    return ReadEnd::Forced;
                }
                next = self.frames.next() => next,
            };
            let frame = match next {
                Some(Ok(frame)) => frame,
                Some(Err(error)) => return self.read_failed(error).await,
                None if self.assembler.in_progress() => {
                    let truncated = io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "byte stream ended inside a fragmented message",
                    );
                    return self.read_failed(truncated).await;
                }
                None => return self.peer_gone().await,
            };
            metrics::inc_frames(Direction::Inbound);

            let message = match self.assembler.push(frame) {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(error) => return self.protocol_failure(error).await,
            };
            match &message {
                Message::Ping(payload) => {
                    if let Err(end) = self.signal(Control::Pong(payload.clone())).await {
                        return end;
                    }
                }
                Message::Close(frame) => {
                    state.advance(ConnectionState::HalfClosedRemote);
                    let frame = frame.clone();
                    if let Err(end) = self.signal(Control::PeerClosed(frame)).await {
                        return end;
                    }
                    return match timeout(self.grace, self.deliver(Ok(message))).await {
                        Ok(Ok(())) => ReadEnd::PeerClosed,
                        Ok(Err(end)) => end,
                        Err(_) => ReadEnd::Forced,
                    };
                }
                _ => {}
            }
            if let Err(end) = self.deliver(Ok(message)).await {
                return end;
            }
        }
    }

    /// Hand a message to the application, suspending while it is busy.
    async fn deliver(&mut self, item: Inbound) -> Result<(), ReadEnd> {
        let Some(inbound) = &self.inbound else {
            return Ok(());
        };
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ReadEnd::Cancelled),
            () = local_close_elapsed(&mut self.close_deadline) => Err(ReadEnd::Forced),
            sent = inbound.send(item) => {
                if sent.is_err() {
                    log::debug!("inbound receiver dropped; discarding further messages");
                    self.inbound = None;
                }
                Ok(())
            }
        }
    }

    /// Deliver a terminal error, giving up after the grace period.
    async fn deliver_final(&mut self, item: Inbound) {
        let Some(inbound) = self.inbound.take() else {
            return;
        };
        if timeout(self.grace, inbound.send(item)).await.is_err() {
            log::debug!("terminal error not consumed within grace period");
        }
    }

    async fn signal(&mut self, control: Control) -> Result<(), ReadEnd> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ReadEnd::Cancelled),
            // fails once the writer has finished
            _ = self.control.send(control) => Ok(()),
        }
    }

    async fn peer_gone(&mut self) -> ReadEnd {
        let _ = self.signal(Control::PeerGone).await;
        ReadEnd::PeerGone
    }

    async fn read_failed(mut self, error: io::Error) -> ReadEnd {
        if let Some(protocol) = protocol_error(&error) {
            return self.protocol_failure(protocol.clone()).await;
        }
        // only a reset between messages counts as the peer leaving
        if is_peer_reset(&error) && !self.assembler.in_progress() {
            log::debug!("peer reset the byte stream: error={error}");
            return self.peer_gone().await;
        }
        log::warn!("connection read failed: error={error}");
        metrics::inc_errors("io");
        let _ = self.signal(Control::PeerGone).await;
        self.deliver_final(Err(PipelineError::Io(error))).await;
        ReadEnd::Failed
    }

    async fn protocol_failure(mut self, error: ProtocolError) -> ReadEnd {
        tracing::warn!(error = %error, close_code = %error.close_code(), "protocol violation");
        metrics::inc_errors("protocol");
        let _ = self.signal(Control::Fail(error.clone())).await;
        self.deliver_final(Err(PipelineError::Protocol(error))).await;
        ReadEnd::Failed
    }
}

/// Resolves once the writer reports a failure; pending otherwise.
async fn writer_failure(rx: &mut Option<oneshot::Receiver<PipelineError>>) -> PipelineError {
    if let Some(failure) = rx {
        if let Ok(error) = failure.await {
            return error;
        }
        *rx = None;
    }
    std::future::pending().await
}

/// Resolves when the grace period after a locally sent Close elapses.
async fn local_close_elapsed(rx: &mut watch::Receiver<Option<Instant>>) {
    loop {
        let deadline = *rx.borrow_and_update();
        if let Some(deadline) = deadline {
            sleep_until(deadline).await;
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
