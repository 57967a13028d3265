//! Abrupt disconnects injected through the breaker layer.

use std::time::Duration;

use futures::{Stream, stream};
use rstest::rstest;
use tokio::{sync::mpsc, time::timeout};
use wspipe::{
    ClientConnection,
    CloseOutcome,
    Message,
    layer::{BreakerHandle, BreakerLayer, Direction, Severance},
    transport::memory,
};
use wspipe_testing::{echo, gated, pipeline, sink};

const LIMIT: Duration = Duration::from_secs(5);

/// Serve `echo` without layers and open a client whose stream passes
/// through a breaker.
fn broken_link<O>(outbound: O) -> (ClientConnection, BreakerHandle)
where
    O: Stream<Item = Message> + Send + 'static,
{
    let (breaker, handle) = BreakerLayer::new();
    let server = pipeline();
    let client = pipeline().with_layer(breaker);
    let (client_end, server_end) = memory::pair(1 << 16);
    server.serve_on(server_end, echo);
    let conn = client.open_on(client_end, "ws://memory/", outbound);
    (conn, handle)
}

#[rstest]
#[case(Severance::Complete)]
#[case(Severance::Fail)]
#[tokio::test]
async fn severed_inbound_ends_the_connection_without_error(#[case] how: Severance) {
    let (_release, outbound) = gated(Vec::new());
    let (mut conn, breaker) = broken_link(outbound);
    (&mut conn.handshake).await.expect("handshake");

    breaker.sever(Direction::Inbound, how);
    let end = timeout(LIMIT, conn.inbound.recv()).await.expect("in time");
    assert!(end.is_none());
    assert_eq!(conn.handle.closed().await, CloseOutcome::Clean);
}

#[tokio::test]
async fn failed_outbound_surfaces_as_an_error() {
    let (tx, mut rx) = mpsc::channel(1);
    let outbound = stream::poll_fn(move |cx| rx.poll_recv(cx));
    let (mut conn, breaker) = broken_link(outbound);
    (&mut conn.handshake).await.expect("handshake");

    breaker.sever(Direction::Outbound, Severance::Fail);
    tx.send(Message::text("lost")).await.expect("outbound open");
    let item = timeout(LIMIT, conn.inbound.recv())
        .await
        .expect("in time")
        .expect("terminal error delivered");
    assert!(item.is_err());
    assert_eq!(conn.handle.closed().await, CloseOutcome::Error);
}

#[tokio::test]
async fn severing_one_client_leaves_the_server_serving_others() {
    let pipeline = pipeline();
    let (breaker, handle) = BreakerLayer::new();
    let doomed_client = wspipe_testing::pipeline().with_layer(breaker);
    let (doomed_end, doomed_server) = memory::pair(1 << 16);
    let doomed_handle = pipeline.serve_on(doomed_server, sink);
    let (_hold, outbound) = gated(Vec::new());
    let mut doomed = doomed_client.open_on(doomed_end, "ws://memory/", outbound);
    (&mut doomed.handshake).await.expect("handshake");

    handle.sever(Direction::Both, Severance::Complete);
    assert_eq!(
        timeout(LIMIT, doomed_handle.closed()).await.expect("server side ended"),
        CloseOutcome::Clean
    );

    let (client_end, server_end) = memory::pair(1 << 16);
    pipeline.serve_on(server_end, echo);
    let mut healthy = pipeline.open_on(
        client_end,
        "ws://memory/",
        stream::iter([Message::text("ok")]),
    );
    (&mut healthy.handshake).await.expect("handshake");
    let reply = healthy.inbound.recv().await.expect("reply").expect("no error");
    assert_eq!(reply, Message::text("ok"));
}
