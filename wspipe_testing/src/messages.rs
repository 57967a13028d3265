//! Message builders, handlers and collectors for pipeline tests.

use std::future;

use futures::{Stream, StreamExt, stream};
use tokio::sync::oneshot;
use wspipe::{Accepted, Message, MessageStream, PipelineError};

/// Numbered text messages `message-0` to `message-{count - 1}`.
#[must_use]
pub fn texts(count: usize) -> Vec<Message> {
    (0..count)
        .map(|i| Message::text(format!("message-{i}")))
        .collect()
}

/// Handler replying to every data message with the same message.
pub fn echo(_: Accepted, inbound: MessageStream) -> impl Stream<Item = Message> + Send + 'static {
    inbound.filter_map(|item| future::ready(item.ok().filter(Message::is_data)))
}

/// Handler that sends nothing and ignores every inbound message.
///
/// Keeps the inbound channel drained so the peer is never backpressured.
pub fn sink(_: Accepted, inbound: MessageStream) -> impl Stream<Item = Message> + Send + 'static {
    inbound.filter_map(|_| future::ready(None))
}

/// Outbound stream yielding `items` and then staying open until the
/// returned sender is used or dropped.
pub fn gated(items: Vec<Message>) -> (oneshot::Sender<()>, impl Stream<Item = Message> + Send + 'static) {
    let (tx, rx) = oneshot::channel();
    let release = stream::once(rx).filter_map(|_| future::ready(None));
    (tx, stream::iter(items).chain(release))
}

/// Collect every data message until the stream ends.
///
/// # Errors
///
/// Returns the first error the stream yields.
pub async fn collect_data(mut inbound: MessageStream) -> Result<Vec<Message>, PipelineError> {
    let mut messages = Vec::new();
    while let Some(item) = inbound.recv().await {
        let message = item?;
        if message.is_data() {
            messages.push(message);
        }
    }
    Ok(messages)
}

/// Collect data messages until the stream ends, keeping the first error
/// instead of returning early.
pub async fn collect_until_error(mut inbound: MessageStream) -> (Vec<Message>, Option<PipelineError>) {
    let mut messages = Vec::new();
    while let Some(item) = inbound.recv().await {
        match item {
            Ok(message) if message.is_data() => messages.push(message),
            Ok(_) => {}
            Err(error) => return (messages, Some(error)),
        }
    }
    (messages, None)
}
