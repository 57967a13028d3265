//! Engine behaviour over in-memory transports, with one side driven by raw
//! frames where the test needs to misbehave.

use std::{
    cell::Cell,
    io,
    marker::PhantomData,
    num::NonZeroUsize,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use futures::{SinkExt, StreamExt, stream};
use rstest::{fixture, rstest};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio_util::{
    codec::{FramedRead, FramedWrite},
    sync::CancellationToken,
};

use super::*;
use crate::{
    error::ProtocolError,
    frame::{Frame, FrameDecoder, FrameEncoder, OpCode},
    layer::{self, BreakerLayer, Severance, StreamLayer},
    message::{CloseCode, CloseFrame},
    transport::{Transport, memory},
};

const GRACE: Duration = Duration::from_millis(300);

fn config(role: Role) -> EngineConfig {
    EngineConfig {
        role,
        max_frame_size: 1 << 16,
        max_message_size: NonZeroUsize::new(1 << 16).expect("non-zero"),
        fragment_size: NonZeroUsize::new(1024).expect("non-zero"),
        close_grace: GRACE,
    }
}

fn open_cell() -> StateCell {
    let (cell, _rx) = StateCell::new();
    assert!(cell.advance(ConnectionState::Handshaking));
    assert!(cell.advance(ConnectionState::Open));
    cell
}

#[fixture]
fn link() -> (Transport<DuplexStream>, Transport<DuplexStream>) { memory::pair(64 * 1024) }

/// Client-side raw frame access to a server engine.
struct RawPeer {
    frames: FramedRead<tokio::io::ReadHalf<Transport<DuplexStream>>, FrameDecoder>,
    sink: FramedWrite<tokio::io::WriteHalf<Transport<DuplexStream>>, FrameEncoder>,
}

impl RawPeer {
    fn new(stream: Transport<DuplexStream>) -> Self {
        let codec = FrameCodec::new(Role::Client, 1 << 16);
        let (read, write) = tokio::io::split(stream);
        Self {
            frames: FramedRead::new(read, codec.decoder()),
            sink: FramedWrite::new(write, codec.encoder()),
        }
    }

    async fn next_frame(&mut self) -> Frame {
        self.frames
            .next()
            .await
            .expect("stream ended")
            .expect("decode failed")
    }
}

async fn spawn_server(
    stream: Transport<DuplexStream>,
    outbound: BoxStream<'static, Message>,
) -> (MessageStream, tokio::task::JoinHandle<CloseOutcome>) {
    let (tx, rx) = inbound_channel(16);
    let handle = tokio::spawn(async move {
        let cell = open_cell();
        run(
            stream,
            &config(Role::Server),
            outbound,
            tx,
            &cell,
            &CancellationToken::new(),
        )
        .await
    });
    (rx, handle)
}

#[rstest]
#[tokio::test]
async fn both_sides_closing_together_is_clean(
    link: (Transport<DuplexStream>, Transport<DuplexStream>),
) {
    let (client, server) = link;
    let (client_tx, mut client_rx) = inbound_channel(16);
    let (server_tx, mut server_rx) = inbound_channel(16);
    let greetings = stream::iter(["one", "two", "three"].map(Message::text)).boxed();

    let client_task = tokio::spawn(async move {
        let cell = open_cell();
        let outcome = run(
            client,
            &config(Role::Client),
            greetings,
            client_tx,
            &cell,
            &CancellationToken::new(),
        )
        .await;
        (outcome, cell.get())
    });
    let server_task = tokio::spawn(async move {
        let cell = open_cell();
        run(
            server,
            &config(Role::Server),
            stream::empty().boxed(),
            server_tx,
            &cell,
            &CancellationToken::new(),
        )
        .await
    });

    let mut received = Vec::new();
    while let Some(item) = server_rx.recv().await {
        received.push(item.expect("inbound error"));
    }
    assert_eq!(
        received,
        vec![
            Message::text("one"),
            Message::text("two"),
            Message::text("three"),
            Message::close(CloseCode::NORMAL, ""),
        ]
    );
    assert!(matches!(
        client_rx.recv().await,
        Some(Ok(Message::Close(Some(frame)))) if frame.code == CloseCode::NORMAL
    ));

    let (client_outcome, client_state) = client_task.await.expect("client task");
    assert_eq!(client_outcome, CloseOutcome::Clean);
    assert_eq!(client_state, ConnectionState::Closed(CloseOutcome::Clean));
    assert_eq!(server_task.await.expect("server task"), CloseOutcome::Clean);
}

#[rstest]
#[tokio::test]
async fn ping_is_answered_and_delivered(link: (Transport<DuplexStream>, Transport<DuplexStream>)) {
    let (client, server) = link;
    let mut peer = RawPeer::new(client);
    let (mut inbound, task) = spawn_server(server, stream::pending().boxed()).await;

    peer.sink
        .send(Frame::new(OpCode::Ping, Bytes::from_static(b"hi")))
        .await
        .expect("send ping");
    let pong = peer.next_frame().await;
    assert_eq!(pong.opcode, OpCode::Pong);
    assert_eq!(pong.payload, Bytes::from_static(b"hi"));
    assert!(matches!(
        inbound.recv().await,
        Some(Ok(Message::Ping(payload))) if payload == Bytes::from_static(b"hi")
    ));

    drop(peer);
    assert_eq!(task.await.expect("server task"), CloseOutcome::Clean);
}

#[rstest]
#[tokio::test]
async fn reserved_bits_close_with_protocol_error(
    link: (Transport<DuplexStream>, Transport<DuplexStream>),
) {
    let (mut client, server) = link;
    let (mut inbound, task) = spawn_server(server, stream::pending().boxed()).await;

    // FIN + RSV1 + text, masked, empty payload
    client
        .write_all(&[0xC1, 0x80, 1, 2, 3, 4])
        .await
        .expect("write raw frame");
    let mut peer = RawPeer::new(client);
    let close = peer.next_frame().await;
    assert_eq!(close.opcode, OpCode::Close);
    let frame = CloseFrame::parse(&close.payload)
        .expect("valid close payload")
        .expect("close code present");
    assert_eq!(frame.code, CloseCode::PROTOCOL_ERROR);

    assert!(matches!(
        inbound.recv().await,
        Some(Err(PipelineError::Protocol(ProtocolError::ReservedBits { .. })))
    ));
    assert!(inbound.recv().await.is_none());
    assert_eq!(task.await.expect("server task"), CloseOutcome::Error);
}

#[rstest]
#[tokio::test]
async fn invalid_utf8_closes_with_1007(link: (Transport<DuplexStream>, Transport<DuplexStream>)) {
    let (client, server) = link;
    let mut peer = RawPeer::new(client);
    let (mut inbound, task) = spawn_server(server, stream::pending().boxed()).await;

    peer.sink
        .send(Frame::new(OpCode::Text, vec![0xFF, 0xFE]))
        .await
        .expect("send text");
    let close = peer.next_frame().await;
    let frame = CloseFrame::parse(&close.payload)
        .expect("valid close payload")
        .expect("close code present");
    assert_eq!(frame.code, CloseCode::INVALID_PAYLOAD);
    assert!(matches!(
        inbound.recv().await,
        Some(Err(PipelineError::Protocol(ProtocolError::InvalidUtf8)))
    ));
    assert_eq!(task.await.expect("server task"), CloseOutcome::Error);
}

#[rstest]
#[tokio::test]
async fn idle_producer_replies_to_peer_close_at_once(
    link: (Transport<DuplexStream>, Transport<DuplexStream>),
) {
    let (client, server) = link;
    let mut peer = RawPeer::new(client);
    let (mut inbound, task) = spawn_server(server, stream::pending().boxed()).await;

    let close = CloseFrame::new(CloseCode::GOING_AWAY, "bye");
    peer.sink
        .send(Frame::new(OpCode::Close, close.to_payload()))
        .await
        .expect("send close");
    assert!(matches!(inbound.recv().await, Some(Ok(Message::Close(_)))));

    let reply = peer.next_frame().await;
    assert_eq!(reply.opcode, OpCode::Close);
    let frame = CloseFrame::parse(&reply.payload)
        .expect("valid close payload")
        .expect("close code present");
    assert_eq!(frame.code, CloseCode::GOING_AWAY);
    let outcome = tokio::time::timeout(GRACE / 2, task)
        .await
        .expect("reply sent without waiting out the grace period")
        .expect("server task");
    assert_eq!(outcome, CloseOutcome::Clean);
}

#[rstest]
#[case::end_of_stream(Severance::Complete)]
#[case::reset(Severance::Fail)]
#[tokio::test]
async fn stream_ending_inside_a_fragmented_message_fails(
    link: (Transport<DuplexStream>, Transport<DuplexStream>),
    #[case] how: Severance,
) {
    let (client, server) = link;
    let (breaker, handle) = BreakerLayer::new();
    let server = breaker.wrap(server, Role::Server).await.expect("wrap");
    let mut peer = RawPeer::new(client);
    let (tx, mut inbound) = inbound_channel(16);
    let task = tokio::spawn(async move {
        let cell = open_cell();
        run(
            server,
            &config(Role::Server),
            stream::pending().boxed(),
            tx,
            &cell,
            &CancellationToken::new(),
        )
        .await
    });

    peer.sink
        .send(Frame::fragment(OpCode::Text, "half a mess", false))
        .await
        .expect("send fragment");
    peer.sink
        .send(Frame::new(OpCode::Ping, "sync"))
        .await
        .expect("send ping");
    assert_eq!(peer.next_frame().await.opcode, OpCode::Pong);
    assert!(matches!(inbound.recv().await, Some(Ok(Message::Ping(_)))));

    handle.sever(layer::Direction::Inbound, how);
    assert!(matches!(inbound.recv().await, Some(Err(PipelineError::Io(_)))));
    assert!(inbound.recv().await.is_none());
    assert_eq!(task.await.expect("server task"), CloseOutcome::Error);
}

#[rstest]
#[tokio::test]
async fn local_close_keeps_receiving(link: (Transport<DuplexStream>, Transport<DuplexStream>)) {
    let (client, server) = link;
    let mut peer = RawPeer::new(client);
    let (mut inbound, task) = spawn_server(server, stream::empty().boxed()).await;

    let close = peer.next_frame().await;
    assert_eq!(close.opcode, OpCode::Close);
    for n in 0..5 {
        peer.sink
            .send(Frame::new(OpCode::Text, format!("late {n}")))
            .await
            .expect("send text");
    }
    peer.sink
        .send(Frame::new(OpCode::Close, close.payload))
        .await
        .expect("send close");

    for n in 0..5 {
        let message = inbound.recv().await.expect("item").expect("message");
        assert_eq!(message, Message::text(format!("late {n}")));
    }
    assert!(matches!(inbound.recv().await, Some(Ok(Message::Close(_)))));
    assert_eq!(task.await.expect("server task"), CloseOutcome::Clean);
}

#[rstest]
#[tokio::test]
async fn silent_peer_after_local_close_is_forced(
    link: (Transport<DuplexStream>, Transport<DuplexStream>),
) {
    let (client, server) = link;
    let mut peer = RawPeer::new(client);
    let (_inbound, task) = spawn_server(server, stream::empty().boxed()).await;

    assert_eq!(peer.next_frame().await.opcode, OpCode::Close);
    assert_eq!(task.await.expect("server task"), CloseOutcome::Forced);
}

#[rstest]
#[tokio::test]
async fn peer_ending_byte_stream_is_clean(
    link: (Transport<DuplexStream>, Transport<DuplexStream>),
) {
    let (client, server) = link;
    let (mut inbound, task) = spawn_server(server, stream::pending().boxed()).await;
    drop(client);

    assert!(inbound.recv().await.is_none());
    assert_eq!(task.await.expect("server task"), CloseOutcome::Clean);
}

#[rstest]
#[tokio::test]
async fn abort_cancels_connection(link: (Transport<DuplexStream>, Transport<DuplexStream>)) {
    let (_client, server) = link;
    let (tx, _rx) = inbound_channel(1);
    let cancel = CancellationToken::new();
    let (cell, _state) = StateCell::new();
    let handle = ConnectionHandle::new(ConnectionId::next(), &cell, cancel.clone());
    cell.advance(ConnectionState::Handshaking);
    cell.advance(ConnectionState::Open);

    let task = tokio::spawn(async move {
        run(
            server,
            &config(Role::Server),
            stream::pending().boxed(),
            tx,
            &cell,
            &cancel,
        )
        .await
    });
    handle.abort();
    assert_eq!(handle.closed().await, CloseOutcome::Cancelled);
    assert_eq!(task.await.expect("server task"), CloseOutcome::Cancelled);
    assert_eq!(
        handle.state(),
        ConnectionState::Closed(CloseOutcome::Cancelled)
    );
}

#[test]
fn outcomes_map_to_errors() {
    assert!(CloseOutcome::Clean.into_result().is_ok());
    assert!(CloseOutcome::Cancelled.into_result().is_ok());
    assert!(matches!(
        CloseOutcome::Forced.into_result(),
        Err(PipelineError::ForcedClose)
    ));
    assert!(matches!(
        CloseOutcome::Error.into_result(),
        Err(PipelineError::ConnectionClosed)
    ));
}

/// Byte stream that may move between threads but not be shared by them.
struct Unshared {
    inner: Transport<DuplexStream>,
    _not_sync: PhantomData<Cell<()>>,
}

impl AsyncRead for Unshared {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for Unshared {
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

#[rstest]
#[tokio::test]
async fn engine_task_is_send_over_streams_that_are_not_sync(
    link: (Transport<DuplexStream>, Transport<DuplexStream>),
) {
    let (client, server) = link;
    let server = Unshared {
        inner: server,
        _not_sync: PhantomData,
    };
    let (tx, mut inbound) = inbound_channel(16);
    let task = tokio::spawn(async move {
        let cell = open_cell();
        run(
            server,
            &config(Role::Server),
            stream::pending().boxed(),
            tx,
            &cell,
            &CancellationToken::new(),
        )
        .await
    });
    drop(client);

    assert!(inbound.recv().await.is_none());
    assert_eq!(task.await.expect("server task"), CloseOutcome::Clean);
}
