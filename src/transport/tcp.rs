//! TCP connect and accept primitives.

use std::{io, net::SocketAddr};

use futures::Stream;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

use super::{ConnectionInfo, Transport};
use crate::error::PipelineError;

impl ConnectionInfo {
    fn of(stream: &TcpStream) -> Self {
        Self {
            peer_addr: stream.peer_addr().ok(),
            local_addr: stream.local_addr().ok(),
        }
    }
}

/// Resolve `addr` and open a TCP transport to the first reachable address.
///
/// # Errors
///
/// Returns [`PipelineError::Connect`] if resolution, connecting or socket
/// configuration fails.
pub async fn connect<A: ToSocketAddrs>(
    addr: A,
    nodelay: bool,
) -> Result<Transport<TcpStream>, PipelineError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(PipelineError::Connect)?;
    if nodelay {
        stream.set_nodelay(true).map_err(PipelineError::Connect)?;
    }
    let info = ConnectionInfo::of(&stream);
    Ok(Transport::new(stream, info))
}

/// Listener producing one [`Transport`] per accepted TCP connection.
#[derive(Debug)]
pub struct TransportListener {
    inner: TcpListener,
    nodelay: bool,
}

impl TransportListener {
    /// Bind a listener to `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Connect`] if binding fails.
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self, PipelineError> {
        let inner = TcpListener::bind(addr)
            .await
            .map_err(PipelineError::Connect)?;
        Ok(Self {
            inner,
            nodelay: false,
        })
    }

    /// Adopt an already bound standard listener.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Connect`] if the listener cannot be switched
    /// to non-blocking mode or registered with the runtime.
    pub fn from_std(listener: std::net::TcpListener) -> Result<Self, PipelineError> {
        listener
            .set_nonblocking(true)
            .map_err(PipelineError::Connect)?;
        let inner = TcpListener::from_std(listener).map_err(PipelineError::Connect)?;
        Ok(Self {
            inner,
            nodelay: false,
        })
    }

    /// Enable `TCP_NODELAY` on accepted sockets.
    #[must_use]
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] if the socket address cannot be queried.
    pub fn local_addr(&self) -> io::Result<SocketAddr> { self.inner.local_addr() }

    /// Accept the next connection.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] if accepting fails.
    pub async fn accept(&self) -> io::Result<Transport<TcpStream>> {
        let (stream, _) = self.inner.accept().await?;
        if self.nodelay {
            stream.set_nodelay(true)?;
        }
        let info = ConnectionInfo::of(&stream);
        Ok(Transport::new(stream, info))
    }

    /// Stream of accepted connections. Accept errors are yielded, not fatal.
    pub fn incoming(&self) -> impl Stream<Item = io::Result<Transport<TcpStream>>> + '_ {
        futures::stream::unfold(self, |listener| async move {
            Some((listener.accept().await, listener))
        })
    }
}
