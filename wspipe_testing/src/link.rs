//! In-memory pipeline links pairing a served connection with a client.

use futures::Stream;
use tokio::io::DuplexStream;
use wspipe::{
    ClientConnection,
    ConnectionHandle,
    Handler,
    Message,
    Pipeline,
    PipelineContext,
    StreamLayer,
    Transport,
    transport::memory,
};

/// Buffer size of each direction of an in-memory link.
pub const LINK_CAPACITY: usize = 64 * 1024;

/// Both ends of a connection running over [`memory::pair`].
pub struct Link {
    /// Handle of the server-role connection.
    pub server: ConnectionHandle,
    /// Client-role connection with its handshake and inbound stream.
    pub client: ClientConnection,
}

/// Pipeline without layers spawned on the current runtime.
///
/// # Panics
///
/// Panics when called outside a Tokio runtime.
#[must_use]
pub fn pipeline() -> Pipeline {
    let context = PipelineContext::try_current().expect("pipeline helpers need a Tokio runtime");
    Pipeline::new(context)
}

/// Serve `handler` on one end of a fresh in-memory pair and open a client
/// requesting `path` on the other, sending `outbound`.
///
/// ```rust,no_run
/// use futures::stream;
/// use wspipe::Message;
/// use wspipe_testing::{echo, link, pipeline};
///
/// # async fn example() {
/// let pipeline = pipeline();
/// let link = link(&pipeline, "/echo", echo, stream::iter([Message::text("hi")]));
/// link.client.handshake.await.unwrap();
/// # }
/// ```
pub fn link<L, H, O>(pipeline: &Pipeline<L>, path: &str, handler: H, outbound: O) -> Link
where
    L: StreamLayer<Transport<DuplexStream>>,
    H: Handler,
    O: Stream<Item = Message> + Send + 'static,
{
    let (client, server) = memory::pair(LINK_CAPACITY);
    let server = pipeline.serve_on(server, handler);
    let client = pipeline.open_on(client, &format!("ws://memory{path}"), outbound);
    Link { server, client }
}
