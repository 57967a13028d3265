//! Opening handshake outcomes: timeouts, rejections, layers and
//! subprotocol negotiation.

use std::time::Duration;

use futures::{
    future::{self, BoxFuture},
    stream,
};
use rstest::rstest;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    time::timeout,
};
use wspipe::{
    Accepted,
    ByteStream,
    CloseOutcome,
    ConnectionState,
    LayerExt,
    MessageStream,
    PassThrough,
    PipelineConfig,
    PipelineError,
    ProtocolError,
    Role,
    StreamLayer,
    layer::{BreakerLayer, LayerError},
    transport::memory,
};
use wspipe_testing::{echo, link, pipeline};

mod common;

use common::read_head;

/// Layer that refuses every stream.
struct Refuse;

impl<S: ByteStream> StreamLayer<S> for Refuse {
    type Stream = S;

    fn wrap(&self, _stream: S, _role: Role) -> BoxFuture<'static, Result<S, LayerError>> {
        Box::pin(future::ready(Err(LayerError::Handshake("certificate refused".into()))))
    }
}

#[tokio::test(start_paused = true)]
async fn silent_server_times_out_the_client() {
    let pipeline = pipeline().with_config(
        PipelineConfig::default().handshake_timeout(Duration::from_millis(200)),
    );
    let (client, _silent) = memory::pair(4096);
    let mut conn = pipeline.open_on(client, "ws://memory/", stream::pending());

    let err = conn.handshake.await.expect_err("handshake must time out");
    assert!(matches!(err, PipelineError::HandshakeTimeout));
    assert!(err.is_handshake_failure());
    assert!(conn.inbound.recv().await.is_none());
    assert_eq!(conn.handle.state(), ConnectionState::Failed);
    assert_eq!(conn.handle.closed().await, CloseOutcome::Error);
}

#[tokio::test(start_paused = true)]
async fn silent_client_times_out_the_server() {
    let pipeline = pipeline().with_config(
        PipelineConfig::default().handshake_timeout(Duration::from_millis(200)),
    );
    let (_silent, server) = memory::pair(4096);
    let handle = pipeline.serve_on(server, echo);
    assert_eq!(handle.closed().await, CloseOutcome::Error);
    assert_eq!(handle.state(), ConnectionState::Failed);
    assert!(handle.handshake().is_none());
}

#[rstest]
#[case("GET / HTTP/1.1\r\nHost: memory\r\n\r\n", "HTTP/1.1 400")]
#[case(
    "GET / HTTP/1.1\r\nHost: memory\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
     Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 8\r\n\r\n",
    "HTTP/1.1 426"
)]
#[tokio::test]
async fn invalid_upgrade_requests_are_answered_and_fail(#[case] request: &str, #[case] status: &str) {
    let pipeline = pipeline();
    let (mut client, server) = memory::pair(4096);
    let handle = pipeline.serve_on(server, echo);
    client.write_all(request.as_bytes()).await.expect("write");

    let head = read_head(&mut client).await;
    assert!(head.starts_with(status), "unexpected response: {head}");
    assert_eq!(handle.closed().await, CloseOutcome::Error);
}

#[tokio::test]
async fn rejecting_server_fails_the_client() {
    let pipeline = pipeline();
    let (client, mut server) = memory::pair(4096);
    let mut conn = pipeline.open_on(client, "ws://memory/missing", stream::pending());

    let mut request = vec![0; 1024];
    let read = server.read(&mut request).await.expect("request");
    let request = String::from_utf8_lossy(&request[..read]);
    assert!(request.starts_with("GET /missing HTTP/1.1\r\n"));
    assert!(request.to_ascii_lowercase().contains("host: memory\r\n"));
    server
        .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
        .await
        .expect("response");

    let err = conn.handshake.await.expect_err("upgrade rejected");
    assert!(matches!(
        err,
        PipelineError::Protocol(ProtocolError::UpgradeRejected { status: 404, .. })
    ));
    assert!(conn.inbound.recv().await.is_none());
    assert_eq!(conn.handle.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn invalid_target_fails_through_the_handshake() {
    let pipeline = pipeline();
    let (client, _server) = memory::pair(4096);
    let conn = pipeline.open_on(client, "http://memory/", stream::pending());
    let err = conn.handshake.await.expect_err("scheme rejected");
    assert!(matches!(err, PipelineError::Connect(_)));
    assert_eq!(conn.handle.closed().await, CloseOutcome::Error);
}

#[tokio::test]
async fn subprotocol_is_negotiated_in_client_preference_order() {
    let server = pipeline().with_config(PipelineConfig::default().subprotocols(["chat", "mqtt"]));
    let client = pipeline().with_config(PipelineConfig::default().subprotocols(["mqtt", "chat"]));
    let (client_end, server_end) = memory::pair(4096);
    let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
    server.serve_on(server_end, move |accepted: Accepted, inbound: MessageStream| {
        let _ = seen_tx.send(accepted.handshake.subprotocol.clone());
        echo(accepted, inbound)
    });

    let conn = client.open_on(client_end, "ws://memory/", stream::empty());
    let result = conn.handshake.await.expect("handshake");
    assert_eq!(result.subprotocol.as_deref(), Some("mqtt"));
    assert_eq!(conn.handle.handshake(), Some(&result));
    assert_eq!(
        seen_rx.recv().await.expect("handler ran").as_deref(),
        Some("mqtt")
    );
}

#[tokio::test]
async fn failing_layer_stops_before_any_frame() {
    let pipeline = pipeline().with_layer(Refuse);
    let link = link(&pipeline, "/", echo, stream::pending());
    let err = link.client.handshake.await.expect_err("layer refused");
    assert!(matches!(err, PipelineError::Layer(LayerError::Handshake(_))));
    assert_eq!(link.server.closed().await, CloseOutcome::Error);
}

#[tokio::test]
async fn every_stacked_layer_wraps_both_ends() {
    let (breaker, handle) = BreakerLayer::new();
    let pipeline = pipeline().with_layer(PassThrough.stack(breaker));
    let link = link(&pipeline, "/", echo, stream::empty());
    link.client.handshake.await.expect("handshake");
    assert_eq!(handle.wrapped(), 2);
    let outcome = timeout(Duration::from_secs(5), link.client.handle.closed())
        .await
        .expect("closed");
    assert_eq!(outcome, CloseOutcome::Clean);
}
