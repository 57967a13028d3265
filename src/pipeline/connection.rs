//! Per-connection lifecycle shared by the client and server roles.

use std::time::Duration;

use futures::stream::BoxStream;
use tokio::{sync::mpsc, time::timeout};
use tokio_util::sync::CancellationToken;

use super::rewind::RewindStream;
use crate::{
    engine::{
        self,
        ActiveConnection,
        CloseOutcome,
        ConnectionHandle,
        ConnectionState,
        EngineConfig,
        Inbound,
        StateCell,
    },
    error::PipelineError,
    handshake::{ClientRequest, HandshakeResult, client_handshake, server_handshake},
    layer::StreamLayer,
    message::Message,
    metrics,
    role::Role,
    session::ConnectionId,
    transport::{ByteStream, Transport},
};

/// Which side of the upgrade to run.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Upgrade<'a> {
    Client(&'a ClientRequest),
    Server(&'a [String]),
}

impl Upgrade<'_> {
    fn role(self) -> Role {
        match self {
            Self::Client(_) => Role::Client,
            Self::Server(_) => Role::Server,
        }
    }

    async fn negotiate<S: ByteStream>(
        self,
        stream: &mut S,
    ) -> Result<(HandshakeResult, Vec<u8>), PipelineError> {
        match self {
            Self::Client(request) => client_handshake(stream, request).await,
            Self::Server(supported) => server_handshake(stream, supported).await,
        }
    }
}

/// One connection from `Connecting` to a terminal state.
#[derive(Debug)]
pub(crate) struct Session {
    cell: StateCell,
    handle: ConnectionHandle,
    cancel: CancellationToken,
}

impl Session {
    /// Start a session whose cancellation is a child of `parent`.
    pub(crate) fn new(parent: &CancellationToken) -> Self {
        let cancel = parent.child_token();
        let (cell, _) = StateCell::new();
        let handle = ConnectionHandle::new(ConnectionId::next(), &cell, cancel.clone());
        Self {
            cell,
            handle,
            cancel,
        }
    }

    pub(crate) fn handle(&self) -> &ConnectionHandle { &self.handle }

    pub(crate) fn token(&self) -> &CancellationToken { &self.cancel }

    /// Record a failure before the connection opened.
    pub(crate) fn fail(&self, error: &PipelineError) {
        log::warn!(
            "connection failed: id={}, error={error}",
            self.handle.id().as_u64()
        );
        metrics::inc_errors("handshake");
        self.cell.advance(ConnectionState::Failed);
    }

    /// Record a local teardown before the connection opened.
    pub(crate) fn cancelled(&self) {
        log::debug!(
            "connection cancelled before open: id={}",
            self.handle.id().as_u64()
        );
        self.cell.advance(ConnectionState::Closed(CloseOutcome::Cancelled));
    }

    /// Mark a session whose task panicked as finished.
    pub(crate) fn abandon(&self) {
        self.cancel.cancel();
        if !self.cell.advance(ConnectionState::Closed(CloseOutcome::Error)) {
            self.cell.advance(ConnectionState::Failed);
        }
    }

    /// Wrap `transport` in `layer` and run the upgrade, bounded by `limit`.
    ///
    /// On success the session is `Open`; on failure it is `Failed`, or
    /// `Closed(Cancelled)` if it was aborted meanwhile.
    pub(crate) async fn establish<S, L>(
        &self,
        layer: &L,
        transport: Transport<S>,
        upgrade: Upgrade<'_>,
        limit: Duration,
    ) -> Result<(RewindStream<L::Stream>, HandshakeResult), PipelineError>
    where
        S: ByteStream,
        L: StreamLayer<Transport<S>>,
    {
        self.handle.set_info(transport.info());
        self.cell.advance(ConnectionState::Handshaking);
        let negotiation = async {
            let mut stream = layer.wrap(transport, upgrade.role()).await?;
            let (result, leftover) = upgrade.negotiate(&mut stream).await?;
            Ok::<_, PipelineError>((RewindStream::new(leftover, stream), result))
        };
        let attempt = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            attempt = timeout(limit, negotiation) => Some(attempt),
        };
        match attempt {
            None => {
                self.cancelled();
                Err(PipelineError::ConnectionClosed)
            }
            Some(Err(_elapsed)) => {
                let error = PipelineError::HandshakeTimeout;
                self.fail(&error);
                Err(error)
            }
            Some(Ok(Err(error))) => {
                self.fail(&error);
                Err(error)
            }
            Some(Ok(Ok((stream, result)))) => {
                self.handle.set_handshake(result.clone());
                self.cell.advance(ConnectionState::Open);
                let info = self.handle.info().unwrap_or_default();
                log::info!(
                    "connection open: id={}, role={}, peer_addr={:?}, path={}, subprotocol={:?}",
                    self.handle.id().as_u64(),
                    upgrade.role(),
                    info.peer_addr,
                    result.path,
                    result.subprotocol,
                );
                Ok((stream, result))
            }
        }
    }

    /// Run the framing engine until the connection closes.
    pub(crate) async fn run<S: ByteStream>(
        &self,
        stream: S,
        config: &EngineConfig,
        outbound: BoxStream<'static, Message>,
        inbound: mpsc::Sender<Inbound>,
    ) -> CloseOutcome {
        let _active = ActiveConnection::new();
        let outcome = engine::run(stream, config, outbound, inbound, &self.cell, &self.cancel).await;
        log::info!(
            "connection closed: id={}, outcome={outcome:?}",
            self.handle.id().as_u64()
        );
        outcome
    }
}
