//! Connection pipelines: framing over a layer stack over a byte transport.
//!
//! A [`Pipeline`] opens client connections and serves accepted ones. Each
//! connection binds one transport to one framing engine for its whole
//! lifetime and is spawned through the caller's [`PipelineContext`].
//!
//! ```no_run
//! use futures::{StreamExt, stream};
//! use wspipe::{Message, Pipeline, PipelineContext};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), wspipe::PipelineError> {
//! let context = PipelineContext::try_current().expect("inside a Tokio runtime");
//! let pipeline = Pipeline::new(context.clone());
//! let mut conn = pipeline.open(
//!     "ws://127.0.0.1:9001/echo",
//!     stream::iter([Message::text("hello")]),
//! );
//! conn.handshake.await?;
//! while let Some(item) = conn.inbound.next().await {
//!     println!("{}", item?);
//! }
//! context.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod connection;
mod context;
mod rewind;
mod server;

use std::{future::Future, sync::Arc};

pub use client::{ClientConnection, HandshakeFuture};
pub use config::{PipelineConfig, ServerConfig};
pub use context::PipelineContext;
use futures::{Stream, StreamExt, stream::BoxStream};
pub use rewind::RewindStream;
pub use server::{AcceptListener, Accepted, BackoffConfig, Binding, Handler};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use self::{
    client::Target,
    connection::{Session, Upgrade},
    server::{Responder, accept_loop},
};
use crate::{
    engine::{ConnectionHandle, inbound_channel},
    error::PipelineError,
    handshake::ClientRequest,
    layer::{PassThrough, StreamLayer},
    message::Message,
    role::Role,
    session::ConnectionRegistry,
    transport::{self, ByteStream, Transport, TransportListener},
};

/// Builder and entry point for WebSocket connections.
///
/// `L` is the layer stack applied between the byte transport and the
/// framing engine; [`PassThrough`] by default.
#[derive(Debug)]
pub struct Pipeline<L = PassThrough> {
    context: PipelineContext,
    layer: Arc<L>,
    config: PipelineConfig,
    server: ServerConfig,
}

impl Pipeline<PassThrough> {
    /// Create a pipeline without transport layers.
    #[must_use]
    pub fn new(context: PipelineContext) -> Self {
        Self {
            context,
            layer: Arc::new(PassThrough),
            config: PipelineConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl<L> Pipeline<L> {
    /// Replace the layer stack.
    #[must_use]
    pub fn with_layer<M>(self, layer: M) -> Pipeline<M> {
        Pipeline {
            context: self.context,
            layer: Arc::new(layer),
            config: self.config,
            server: self.server,
        }
    }

    /// Replace the connection configuration.
    #[must_use]
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the accept loop configuration.
    #[must_use]
    pub fn with_server_config(mut self, server: ServerConfig) -> Self {
        self.server = server;
        self
    }

    /// Context connections are spawned on.
    #[must_use]
    pub fn context(&self) -> &PipelineContext { &self.context }

    /// Connection configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig { &self.config }

    /// Open a client connection over an already connected `transport`.
    ///
    /// `target` supplies the `Host` header and request path.
    pub fn open_on<S, O>(&self, transport: Transport<S>, target: &str, outbound: O) -> ClientConnection
    where
        S: ByteStream,
        L: StreamLayer<Transport<S>>,
        O: Stream<Item = Message> + Send + 'static,
    {
        let parsed = Target::parse(target, self.config.subprotocol_list());
        let dial = async move {
            let target = parsed?;
            Ok((transport, target.request))
        };
        self.start_client(dial, outbound.boxed())
    }

    /// Run the server role over an already accepted `transport`.
    pub fn serve_on<S, H>(&self, transport: Transport<S>, handler: H) -> ConnectionHandle
    where
        S: ByteStream,
        L: StreamLayer<Transport<S>>,
        H: Handler,
    {
        let responder = self.responder(
            handler,
            self.context.token().clone(),
            TaskTracker::new(),
            Arc::default(),
        );
        Arc::new(responder).spawn(transport)
    }

    /// Serve connections accepted from a custom `listener`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Connect`] if the listener's address cannot
    /// be queried.
    pub fn listen_on<A, H>(&self, listener: A, handler: H) -> Result<Binding, PipelineError>
    where
        A: AcceptListener,
        L: StreamLayer<Transport<A::Stream>>,
        H: Handler,
    {
        let local_addr = listener.local_addr().map_err(PipelineError::Connect)?;
        let shutdown = self.context.token().child_token();
        let tracker = TaskTracker::new();
        let registry = Arc::new(ConnectionRegistry::default());
        let responder = Arc::new(self.responder(
            handler,
            shutdown.clone(),
            tracker.clone(),
            Arc::clone(&registry),
        ));
        let listener = Arc::new(listener);
        let workers = self.server.worker_count();
        for _ in 0..workers {
            let worker = accept_loop(
                Arc::clone(&listener),
                Arc::clone(&responder),
                self.server.backoff(),
            );
            self.context.spawn(tracker.track_future(worker));
        }
        log::info!("listening: local_addr={local_addr}, workers={workers}");
        Ok(Binding::new(local_addr, shutdown, tracker, registry))
    }

    fn responder<H: Handler>(
        &self,
        handler: H,
        shutdown: CancellationToken,
        tracker: TaskTracker,
        registry: Arc<ConnectionRegistry>,
    ) -> Responder<L, H> {
        Responder {
            layer: Arc::clone(&self.layer),
            handler: Arc::new(handler),
            config: self.config.clone(),
            engine: self.config.engine(Role::Server),
            registry,
            shutdown,
            tracker,
            context: self.context.clone(),
        }
    }

    fn start_client<S, F>(&self, dial: F, outbound: BoxStream<'static, Message>) -> ClientConnection
    where
        S: ByteStream,
        L: StreamLayer<Transport<S>>,
        F: Future<Output = Result<(Transport<S>, ClientRequest), PipelineError>> + Send + 'static,
    {
        let session = Session::new(self.context.token());
        let handle = session.handle().clone();
        let (handshake_tx, handshake) = HandshakeFuture::new();
        let (inbound_tx, inbound) = inbound_channel(self.config.inbound_capacity_value());
        let layer = Arc::clone(&self.layer);
        let config = self.config.clone();
        self.context.spawn(async move {
            let dialed = tokio::select! {
                biased;
                () = session.token().cancelled() => None,
                dialed = dial => Some(dialed),
            };
            let (transport, request) = match dialed {
                None => {
                    session.cancelled();
                    let _ = handshake_tx.send(Err(PipelineError::ConnectionClosed));
                    return;
                }
                Some(Err(error)) => {
                    session.fail(&error);
                    let _ = handshake_tx.send(Err(error));
                    return;
                }
                Some(Ok(dialed)) => dialed,
            };
            let upgrade = Upgrade::Client(&request);
            let limit = config.handshake_timeout_value();
            match session.establish(&*layer, transport, upgrade, limit).await {
                Ok((stream, result)) => {
                    let _ = handshake_tx.send(Ok(result));
                    let engine = config.engine(Role::Client);
                    session.run(stream, &engine, outbound, inbound_tx).await;
                }
                Err(error) => {
                    let _ = handshake_tx.send(Err(error));
                }
            }
        });
        ClientConnection {
            handshake,
            inbound,
            handle,
        }
    }
}

impl<L: StreamLayer<Transport<TcpStream>>> Pipeline<L> {
    /// Connect to a `ws://` or `wss://` `target` and run the client role.
    ///
    /// Returns immediately; connecting, the layer stack and the upgrade run
    /// in the background and report through
    /// [`ClientConnection::handshake`]. `wss://` only selects the default
    /// port 443: securing the stream is the layer stack's job.
    pub fn open<O>(&self, target: &str, outbound: O) -> ClientConnection
    where
        O: Stream<Item = Message> + Send + 'static,
    {
        let parsed = Target::parse(target, self.config.subprotocol_list());
        let nodelay = self.config.nodelay_value();
        log::debug!("opening connection: target={target}");
        let dial = async move {
            let target = parsed?;
            if target.secure {
                log::debug!("secure target: host={}, port={}", target.host, target.port);
            }
            let transport = transport::connect((target.host.as_str(), target.port), nodelay).await?;
            Ok((transport, target.request))
        };
        self.start_client(dial, outbound.boxed())
    }

    /// Bind a TCP listener to `addr` and serve every accepted connection
    /// with `handler`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Connect`] if binding fails.
    pub async fn listen<A, H>(&self, addr: A, handler: H) -> Result<Binding, PipelineError>
    where
        A: ToSocketAddrs,
        H: Handler,
    {
        let listener = TransportListener::bind(addr)
            .await?
            .nodelay(self.config.nodelay_value());
        self.listen_on(listener, handler)
    }
}
