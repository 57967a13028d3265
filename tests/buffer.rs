//! Bounded buffers between producers and slow consumers.

use std::time::Duration;

use futures::{StreamExt, stream};
use rstest::rstest;
use tokio::{sync::mpsc, time::timeout};
use wspipe::{
    Message,
    buffer::{BufferBuilder, OverflowError, OverflowPolicy, attach, broadcast},
};
use wspipe_testing::{echo, link, pipeline, texts};

fn channel_stream(mut rx: mpsc::Receiver<u32>) -> impl futures::Stream<Item = u32> + Send + 'static {
    stream::poll_fn(move |cx| rx.poll_recv(cx))
}

#[rstest]
#[case(10, 100)]
#[case(1, 5)]
#[case(16, 16)]
#[tokio::test]
async fn drop_oldest_retains_the_newest_elements(#[case] capacity: usize, #[case] produced: u32) {
    let mut rx = attach(stream::iter(0..produced), capacity, OverflowPolicy::DropOldest)
        .expect("valid buffer");
    tokio::task::yield_now().await;

    let kept: Vec<_> = rx
        .by_ref()
        .map(|item| item.expect("no overflow"))
        .collect()
        .await;
    let retained = produced.min(u32::try_from(capacity).expect("small capacity"));
    assert_eq!(kept, (produced - retained..produced).collect::<Vec<_>>());

    let stats = rx.stats();
    assert_eq!(stats.accepted, produced as usize);
    assert_eq!(stats.dropped, (produced - retained) as usize);
    assert!(stats.is_balanced());
}

#[tokio::test]
async fn broadcast_branches_progress_independently() {
    let (tx, rx) = mpsc::channel(1);
    let branches = vec![BufferBuilder::new(10, OverflowPolicy::DropOldest); 3];
    let mut receivers = broadcast(channel_stream(rx), branches).expect("valid branches");
    let ignored = receivers.pop().expect("third branch");
    let mut second = receivers.pop().expect("second branch");
    let mut first = receivers.pop().expect("first branch");

    for i in 0..100 {
        tx.send(i).await.expect("upstream open");
        assert_eq!(first.next().await, Some(Ok(i)));
        assert_eq!(second.next().await, Some(Ok(i)));
    }
    drop(tx);
    assert_eq!(first.next().await, None);
    assert_eq!(second.next().await, None);

    let stats = ignored.stats();
    assert_eq!(stats.accepted, 100);
    assert_eq!(stats.dropped, 90);
    assert_eq!(stats.remaining, 10);
    let kept: Vec<_> = ignored.map(|item| item.expect("no overflow")).collect().await;
    assert_eq!(kept, (90..100).collect::<Vec<_>>());
}

#[tokio::test]
async fn failed_branch_is_detached_without_stopping_the_others() {
    let branches = [
        BufferBuilder::new(2, OverflowPolicy::Fail),
        BufferBuilder::new(64, OverflowPolicy::DropNewest),
    ];
    let mut receivers = broadcast(stream::iter(0..20_u32), branches).expect("valid branches");
    let healthy = receivers.pop().expect("healthy branch");
    let failing = receivers.pop().expect("failing branch");
    tokio::task::yield_now().await;

    let failed: Vec<_> = failing.collect().await;
    assert_eq!(
        failed,
        vec![Ok(0), Ok(1), Err(OverflowError { capacity: 2 })]
    );
    let all: Vec<_> = healthy.map(|item| item.expect("no overflow")).collect().await;
    assert_eq!(all, (0..20).collect::<Vec<_>>());
}

#[tokio::test]
async fn buffered_inbound_decouples_a_slow_consumer_from_the_connection() {
    let pipeline = pipeline();
    let link = link(&pipeline, "/", echo, stream::iter(texts(50)));
    link.client.handshake.await.expect("handshake");

    let inbound = link
        .client
        .inbound
        .filter_map(|item| std::future::ready(item.ok().filter(Message::is_data)));
    let mut buffered = attach(inbound, 8, OverflowPolicy::DropOldest).expect("valid buffer");

    timeout(Duration::from_secs(5), link.client.handle.closed())
        .await
        .expect("connection finished without waiting for the consumer");
    timeout(Duration::from_secs(5), async {
        while buffered.stats().accepted < 50 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("pump moved every message");
    let kept: Vec<_> = buffered
        .by_ref()
        .map(|item| item.expect("no overflow"))
        .collect()
        .await;
    assert_eq!(kept, texts(50)[42..].to_vec());
    assert_eq!(buffered.stats().dropped, 42);
}
