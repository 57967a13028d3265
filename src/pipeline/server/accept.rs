//! Accept loop shared by the workers of a binding.

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use log::warn;
use tokio::{net::TcpStream, select, time::sleep};

use super::{BackoffConfig, Handler, Responder};
use crate::{
    layer::StreamLayer,
    metrics,
    transport::{ByteStream, Transport, TransportListener},
};

/// Source of incoming transports consumed by the accept loop.
///
/// Implementations must be cancellation-safe: dropping a pending `accept()`
/// future must not lose a connection.
#[async_trait]
pub trait AcceptListener: Send + Sync + 'static {
    /// Byte stream carried by accepted transports.
    type Stream: ByteStream;

    /// Wait for the next connection.
    async fn accept(&self) -> io::Result<Transport<Self::Stream>>;

    /// Address the listener is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl AcceptListener for TransportListener {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<Transport<TcpStream>> { TransportListener::accept(self).await }

    fn local_addr(&self) -> io::Result<SocketAddr> { TransportListener::local_addr(self) }
}

/// Accept connections until the binding shuts down.
///
/// Each accepted transport is handed to `responder`, which runs the server
/// role on its own task. Accept failures back off exponentially; the delay
/// resets after the next success.
pub(crate) async fn accept_loop<A, L, H>(
    listener: Arc<A>,
    responder: Arc<Responder<L, H>>,
    backoff: BackoffConfig,
) where
    A: AcceptListener,
    L: StreamLayer<Transport<A::Stream>>,
    H: Handler,
{
    let backoff = backoff.normalized();
    debug_assert!(
        backoff.initial_delay <= backoff.max_delay,
        "BackoffConfig invariant violated: initial_delay > max_delay"
    );
    let mut delay = backoff.initial_delay;
    while let Some(next_delay) = accept_iteration(&listener, &responder, &backoff, delay).await {
        delay = next_delay;
    }
}

async fn accept_iteration<A, L, H>(
    listener: &Arc<A>,
    responder: &Arc<Responder<L, H>>,
    backoff: &BackoffConfig,
    delay: Duration,
) -> Option<Duration>
where
    A: AcceptListener,
    L: StreamLayer<Transport<A::Stream>>,
    H: Handler,
{
    let accepted = select! {
        biased;

        () = responder.shutdown.cancelled() => return None,
        res = listener.accept() => res,
    };
    match accepted {
        Ok(transport) => {
            responder.spawn(transport);
            Some(backoff.initial_delay)
        }
        Err(e) => {
            let local_addr = listener.local_addr().ok();
            warn!("accept error: error={e:?}, local_addr={local_addr:?}");
            metrics::inc_errors("accept");
            select! {
                biased;

                () = responder.shutdown.cancelled() => None,
                () = sleep(delay) => Some(backoff.next_delay(delay)),
            }
        }
    }
}
