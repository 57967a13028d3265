//! Client role: opening connections to `ws://` and `wss://` targets.

use std::{
    future::Future,
    io,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::sync::oneshot;
use url::{Host, Url};

use crate::{
    engine::{ConnectionHandle, MessageStream},
    error::PipelineError,
    handshake::{ClientRequest, HandshakeResult},
};

/// A connection opened by [`Pipeline::open`](super::Pipeline::open).
///
/// `inbound` yields nothing if the handshake fails; the failure is reported
/// by `handshake` instead.
#[derive(Debug)]
pub struct ClientConnection {
    /// Resolves once the upgrade succeeded or failed.
    pub handshake: HandshakeFuture,
    /// Messages received from the server.
    pub inbound: MessageStream,
    /// Observer and controller for the connection.
    pub handle: ConnectionHandle,
}

/// Future resolving to the outcome of a client upgrade.
#[derive(Debug)]
pub struct HandshakeFuture {
    rx: oneshot::Receiver<Result<HandshakeResult, PipelineError>>,
}

impl HandshakeFuture {
    pub(crate) fn new() -> (oneshot::Sender<Result<HandshakeResult, PipelineError>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }
}

impl Future for HandshakeFuture {
    type Output = Result<HandshakeResult, PipelineError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(PipelineError::ConnectionClosed)))
    }
}

/// Resolved connection target.
#[derive(Clone, Debug)]
pub(crate) struct Target {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub request: ClientRequest,
}

impl Target {
    /// Parse a `ws://` or `wss://` URL.
    pub(crate) fn parse(target: &str, subprotocols: &[String]) -> Result<Self, PipelineError> {
        let url = Url::parse(target).map_err(|e| invalid_target(format!("{target}: {e}")))?;
        let secure = match url.scheme() {
            "ws" => false,
            "wss" => true,
            other => return Err(invalid_target(format!("unsupported scheme {other}"))),
        };
        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_owned(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(invalid_target(format!("{target}: missing host"))),
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid_target(format!("{target}: missing port")))?;
        let authority = match (url.host_str(), url.port()) {
            (Some(name), Some(port)) => format!("{name}:{port}"),
            (Some(name), None) => name.to_owned(),
            (None, _) => host.clone(),
        };
        let path = match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_owned(),
        };
        Ok(Self {
            host,
            port,
            secure,
            request: ClientRequest {
                host: authority,
                path,
                subprotocols: subprotocols.to_vec(),
            },
        })
    }
}

fn invalid_target(reason: String) -> PipelineError {
    PipelineError::Connect(io::Error::new(io::ErrorKind::InvalidInput, reason))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("ws://example.com/chat", "example.com", 80, false, "example.com", "/chat")]
    #[case("wss://example.com", "example.com", 443, true, "example.com", "/")]
    #[case("ws://127.0.0.1:9001/a?b=c", "127.0.0.1", 9001, false, "127.0.0.1:9001", "/a?b=c")]
    #[case("ws://[::1]:8080/", "::1", 8080, false, "[::1]:8080", "/")]
    fn parses_targets(
        #[case] raw: &str,
        #[case] host: &str,
        #[case] port: u16,
        #[case] secure: bool,
        #[case] authority: &str,
        #[case] path: &str,
    ) {
        let target = Target::parse(raw, &["chat".to_owned()]).expect("valid target");
        assert_eq!(target.host, host);
        assert_eq!(target.port, port);
        assert_eq!(target.secure, secure);
        assert_eq!(target.request.host, authority);
        assert_eq!(target.request.path, path);
        assert_eq!(target.request.subprotocols, ["chat"]);
    }

    #[rstest]
    #[case("http://example.com/")]
    #[case("not a url")]
    #[case("file:///tmp/socket")]
    fn rejects_bad_targets(#[case] raw: &str) {
        let err = Target::parse(raw, &[]).expect_err("target must be rejected");
        assert!(matches!(err, PipelineError::Connect(ref e) if e.kind() == io::ErrorKind::InvalidInput));
    }

    #[tokio::test]
    async fn dropped_sender_reports_closed() {
        let (tx, handshake) = HandshakeFuture::new();
        drop(tx);
        assert!(matches!(handshake.await, Err(PipelineError::ConnectionClosed)));
    }
}
