//! Outbound half of the framing engine.

use std::time::Duration;

use futures::{FutureExt, SinkExt, StreamExt, stream::BoxStream};
use tokio::{
    io::AsyncWrite,
    sync::{mpsc, oneshot, watch},
    task::unconstrained,
    time::{Instant, timeout},
};
use tokio_util::{codec::FramedWrite, sync::CancellationToken};

use super::{ConnectionState, StateCell, reader::Control};
use crate::{
    error::PipelineError,
    frame::FrameEncoder,
    message::{CloseCode, CloseFrame, Fragmenter, Message},
    metrics::{self, Direction},
};

/// Why the writer stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum WriteEnd {
    /// Close was sent, either first or as the reply.
    Closed,
    PeerGone,
    Failed,
    Forced,
    Cancelled,
}

pub(super) struct Writer<W> {
    pub(super) sink: FramedWrite<W, FrameEncoder>,
    pub(super) fragmenter: Fragmenter,
    pub(super) outbound: BoxStream<'static, Message>,
    pub(super) control: mpsc::Receiver<Control>,
    pub(super) close_deadline: watch::Sender<Option<Instant>>,
    pub(super) failure: Option<oneshot::Sender<PipelineError>>,
    pub(super) cancel: CancellationToken,
    pub(super) grace: Duration,
}

impl<W: AsyncWrite + Unpin> Writer<W> {
    pub(super) async fn run(mut self, state: &StateCell) -> WriteEnd {
        let end = self.drive(state).await;
        if end != WriteEnd::Cancelled
            && let Err(error) = self.sink.close().await
        {
            log::debug!("send half shutdown failed: error={error}");
        }
        end
    }

    async fn drive(&mut self, state: &StateCell) -> WriteEnd {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return WriteEnd::Cancelled,
                control = self.control.recv() => match control {
                    Some(Control::Pong(payload)) => {
                        if let Err(error) = self.send(Message::Pong(payload)).await {
                            return self.failed(error);
                        }
                    }
                    Some(Control::PeerClosed(frame)) => return self.reply(state, frame).await,
                    Some(Control::Fail(error)) => {
                        let close = CloseFrame::new(error.close_code(), error.to_string());
                        if let Err(send_error) = self.send(Message::Close(Some(close))).await {
                            log::debug!("failed to send protocol close: error={send_error}");
                        }
                        return WriteEnd::Failed;
                    }
                    Some(Control::PeerGone) | None => return WriteEnd::PeerGone,
                },
                message = self.outbound.next() => match message {
                    Some(Message::Close(frame)) => return self.close(state, None, frame).await,
                    Some(message) => {
                        if let Err(error) = self.send(message).await {
                            return self.failed(error);
                        }
                    }
                    None => {
                        let normal = Some(CloseFrame::new(CloseCode::NORMAL, ""));
                        return self.close(state, None, normal).await;
                    }
                },
            }
        }
    }

    /// Answer the peer's Close after flushing the messages the producer
    /// already has ready. Gives up once writing takes longer than the grace
    /// period.
    async fn reply(&mut self, state: &StateCell, peer: Option<CloseFrame>) -> WriteEnd {
        let grace = self.grace;
        match timeout(grace, self.drain_ready(state, peer)).await {
            Ok(end) => end,
            Err(_) => {
                log::debug!("close reply not written within grace period");
                WriteEnd::Forced
            }
        }
    }

    async fn drain_ready(&mut self, state: &StateCell, peer: Option<CloseFrame>) -> WriteEnd {
        // outside the task budget: only an idle producer ends the drain
        while let Some(next) = unconstrained(self.outbound.next()).now_or_never() {
            match next {
                Some(Message::Close(frame)) => return self.close(state, Some(peer), frame).await,
                Some(message) => {
                    if let Err(error) = self.send(message).await {
                        return self.failed(error);
                    }
                }
                None => break,
            }
        }
        self.close(state, Some(peer), None).await
    }

    /// Send Close: as the reply if the peer closed first, else as the opener.
    async fn close(
        &mut self,
        state: &StateCell,
        peer_close: Option<Option<CloseFrame>>,
        local: Option<CloseFrame>,
    ) -> WriteEnd {
        let opening = peer_close.is_none();
        let frame = match peer_close {
            Some(peer) => local.or_else(|| reply_to(peer)),
            None => local,
        };
        if let Err(error) = self.send(Message::Close(frame)).await {
            return self.failed(error);
        }
        if opening {
            let _ = self.close_deadline.send(Some(Instant::now() + self.grace));
            state.advance(ConnectionState::HalfClosedLocal);
        }
        WriteEnd::Closed
    }

    async fn send(&mut self, message: Message) -> Result<(), PipelineError> {
        for frame in self.fragmenter.frames(message)? {
            self.sink.feed(frame).await?;
            metrics::inc_frames(Direction::Outbound);
        }
        self.sink.flush().await?;
        Ok(())
    }

    fn failed(&mut self, error: PipelineError) -> WriteEnd {
        log::warn!("connection write failed: error={error}");
        metrics::inc_errors("write");
        if let Some(failure) = self.failure.take() {
            let _ = failure.send(error);
        }
        WriteEnd::Failed
    }
}

/// Close frame echoed back to a peer that closed first.
fn reply_to(peer: Option<CloseFrame>) -> Option<CloseFrame> {
    peer.map(|frame| CloseFrame::new(frame.code, ""))
}
