//! Server role: accepting connections and running a handler per connection.
//!
//! [`Pipeline::listen`](super::Pipeline::listen) spawns a configurable number
//! of accept workers sharing one listener. Every accepted transport runs on
//! its own task: the layer stack and upgrade first, then the handler, then
//! the framing engine. A panicking handler is logged and ends only its own
//! connection.

mod accept;
mod backoff;

use std::{net::SocketAddr, panic::AssertUnwindSafe, sync::Arc};

pub use accept::AcceptListener;
pub(crate) use accept::accept_loop;
pub use backoff::BackoffConfig;
use futures::{FutureExt, Stream, StreamExt};
use log::error;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{
    PipelineConfig,
    PipelineContext,
    connection::{Session, Upgrade},
};
use crate::{
    engine::{ConnectionHandle, EngineConfig, MessageStream, inbound_channel},
    handshake::HandshakeResult,
    layer::StreamLayer,
    message::Message,
    metrics,
    panic::format_panic,
    session::{ConnectionId, ConnectionRegistry},
    transport::{ByteStream, Transport},
};

/// A connection that completed its upgrade.
#[derive(Debug)]
pub struct Accepted {
    /// Observer and controller for the connection.
    pub handle: ConnectionHandle,
    /// Outcome of the upgrade, including the request path and the selected
    /// subprotocol.
    pub handshake: HandshakeResult,
}

/// Per-connection application logic for a server.
///
/// `call` receives the inbound messages and returns the outbound stream.
/// Ending the outbound stream sends `Close(1000)`. Implemented for any
/// `Fn(Accepted, MessageStream) -> impl Stream<Item = Message>`.
pub trait Handler: Send + Sync + 'static {
    /// Outbound messages for one connection.
    type Outbound: Stream<Item = Message> + Send + 'static;

    /// Start serving one accepted connection.
    fn call(&self, accepted: Accepted, inbound: MessageStream) -> Self::Outbound;
}

impl<F, O> Handler for F
where
    F: Fn(Accepted, MessageStream) -> O + Send + Sync + 'static,
    O: Stream<Item = Message> + Send + 'static,
{
    type Outbound = O;

    fn call(&self, accepted: Accepted, inbound: MessageStream) -> O { self(accepted, inbound) }
}

/// Runs the server role over accepted transports.
pub(crate) struct Responder<L, H> {
    pub layer: Arc<L>,
    pub handler: Arc<H>,
    pub config: PipelineConfig,
    pub engine: EngineConfig,
    pub registry: Arc<ConnectionRegistry>,
    pub shutdown: CancellationToken,
    pub tracker: TaskTracker,
    pub context: PipelineContext,
}

impl<L, H: Handler> Responder<L, H> {
    /// Spawn the server role for `transport`, logging and containing any
    /// panic raised by the handler or its outbound stream.
    pub(crate) fn spawn<S>(self: &Arc<Self>, transport: Transport<S>) -> ConnectionHandle
    where
        S: ByteStream,
        L: StreamLayer<Transport<S>>,
    {
        let session = Session::new(&self.shutdown);
        let handle = session.handle().clone();
        self.registry.insert(handle.clone());
        let this = Arc::clone(self);
        let task = async move {
            let peer_addr = transport.info().peer_addr;
            let fut = AssertUnwindSafe(this.serve(&session, transport)).catch_unwind();
            if let Err(panic) = fut.await {
                metrics::inc_errors("panic");
                let panic_msg = format_panic(&*panic);
                // Emit via both `log` and `tracing` for tests that capture either.
                error!("connection task panicked: panic={panic_msg}, peer_addr={peer_addr:?}");
                tracing::error!(panic = %panic_msg, ?peer_addr, "connection task panicked");
                session.abandon();
            }
            this.registry.remove(&session.handle().id());
        };
        self.context.spawn(self.tracker.track_future(task));
        handle
    }

    async fn serve<S>(&self, session: &Session, transport: Transport<S>)
    where
        S: ByteStream,
        L: StreamLayer<Transport<S>>,
    {
        let upgrade = Upgrade::Server(self.config.subprotocol_list());
        let limit = self.config.handshake_timeout_value();
        let Ok((stream, handshake)) = session
            .establish(&*self.layer, transport, upgrade, limit)
            .await
        else {
            return;
        };
        let (tx, inbound) = inbound_channel(self.config.inbound_capacity_value());
        let accepted = Accepted {
            handle: session.handle().clone(),
            handshake,
        };
        let outbound = self.handler.call(accepted, inbound).boxed();
        session.run(stream, &self.engine, outbound, tx).await;
    }
}

/// A listening server.
///
/// Dropping a binding leaves it running until its
/// [`PipelineContext`] shuts down; call [`Binding::unbind`] to stop it.
#[derive(Debug)]
pub struct Binding {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    registry: Arc<ConnectionRegistry>,
}

impl Binding {
    pub(super) fn new(
        local_addr: SocketAddr,
        shutdown: CancellationToken,
        tracker: TaskTracker,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            local_addr,
            shutdown,
            tracker,
            registry,
        }
    }

    /// Address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr { self.local_addr }

    /// Handles of the connections that have not yet finished.
    #[must_use]
    pub fn active_connections(&self) -> Vec<ConnectionHandle> { self.registry.active_handles() }

    /// Look up a live connection.
    #[must_use]
    pub fn connection(&self, id: ConnectionId) -> Option<ConnectionHandle> { self.registry.get(&id) }

    /// Stop accepting, tear down every live connection and wait for all of
    /// the binding's tasks to finish.
    pub async fn unbind(self) {
        log::info!(
            "unbinding listener: local_addr={}, connections={}",
            self.local_addr,
            self.registry.len()
        );
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.registry.prune();
    }
}
