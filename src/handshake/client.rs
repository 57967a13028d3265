use std::fmt::Write as _;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use super::{
    HandshakeResult,
    SWITCHING_PROTOCOLS,
    WEBSOCKET_VERSION,
    accept_key,
    generate_key,
    head::{Head, read_head},
};
use crate::error::{PipelineError, ProtocolError};

/// Parameters of a client upgrade request.
#[derive(Clone, Debug)]
pub struct ClientRequest {
    /// Value of the `Host` header.
    pub host: String,
    /// Request target, including any query string.
    pub path: String,
    /// Subprotocols offered, in preference order.
    pub subprotocols: Vec<String>,
}

impl ClientRequest {
    fn render(&self, key: &str) -> String {
        let mut request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
             Sec-WebSocket-Key: {key}\r\nSec-WebSocket-Version: {WEBSOCKET_VERSION}\r\n",
            self.path, self.host
        );
        if !self.subprotocols.is_empty() {
            let _ = write!(
                request,
                "Sec-WebSocket-Protocol: {}\r\n",
                self.subprotocols.join(", ")
            );
        }
        request.push_str("\r\n");
        request
    }
}

/// Run the client side of the upgrade over `stream`.
///
/// Returns the negotiated result and any bytes the server sent after the
/// response head.
pub(crate) async fn client_handshake<S>(
    stream: &mut S,
    request: &ClientRequest,
) -> Result<(HandshakeResult, Vec<u8>), PipelineError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let key = generate_key();
    stream.write_all(request.render(&key).as_bytes()).await?;
    stream.flush().await?;

    let (head, leftover) = read_head(stream).await?;
    let status = parse_status(&head)?;
    if status != SWITCHING_PROTOCOLS {
        return Err(rejected(status, head.start_line.clone()));
    }
    if !head.has_token("upgrade", "websocket") {
        return Err(rejected(status, "missing Upgrade: websocket"));
    }
    if !head.has_token("connection", "upgrade") {
        return Err(rejected(status, "missing Connection: Upgrade"));
    }
    if head.header("sec-websocket-accept") != Some(accept_key(&key).as_str()) {
        return Err(ProtocolError::AcceptMismatch.into());
    }
    let subprotocol = head.header("sec-websocket-protocol").map(str::to_owned);
    if let Some(chosen) = &subprotocol
        && !request.subprotocols.iter().any(|offered| offered == chosen)
    {
        return Err(ProtocolError::UnsolicitedNegotiation(format!("subprotocol {chosen}")).into());
    }
    if let Some(extension) = head.tokens("sec-websocket-extensions").next() {
        return Err(ProtocolError::UnsolicitedNegotiation(format!("extension {extension}")).into());
    }

    Ok((
        HandshakeResult {
            status,
            subprotocol,
            extensions: Vec::new(),
            path: request.path.clone(),
        },
        leftover,
    ))
}

fn parse_status(head: &Head) -> Result<u16, ProtocolError> {
    let mut parts = head.start_line.splitn(3, ' ');
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/1.") => code
            .parse()
            .map_err(|_| ProtocolError::MalformedHead("status code is not numeric")),
        _ => Err(ProtocolError::MalformedHead("malformed status line")),
    }
}

fn rejected(status: u16, reason: impl Into<String>) -> PipelineError {
    ProtocolError::UpgradeRejected {
        status,
        reason: reason.into(),
    }
    .into()
}
