use std::fmt::Write as _;

use base64::prelude::*;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use super::{
    HandshakeResult,
    SWITCHING_PROTOCOLS,
    WEBSOCKET_VERSION,
    accept_key,
    head::{Head, read_head},
};
use crate::error::{PipelineError, ProtocolError};

const BAD_REQUEST: u16 = 400;
const UPGRADE_REQUIRED: u16 = 426;

struct Rejection {
    status: u16,
    reason: &'static str,
}

impl Rejection {
    fn bad_request(reason: &'static str) -> Self {
        Self {
            status: BAD_REQUEST,
            reason,
        }
    }

    fn render(&self) -> String {
        let mut response = match self.status {
            UPGRADE_REQUIRED => format!(
                "HTTP/1.1 426 Upgrade Required\r\nSec-WebSocket-Version: {WEBSOCKET_VERSION}\r\n"
            ),
            _ => "HTTP/1.1 400 Bad Request\r\n".to_owned(),
        };
        response.push_str("Connection: close\r\nContent-Length: 0\r\n\r\n");
        response
    }
}

struct Upgrade {
    key: String,
    path: String,
    offered: Vec<String>,
}

fn validate(head: &Head) -> Result<Upgrade, Rejection> {
    let mut parts = head.start_line.split(' ');
    let (Some(method), Some(path), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Rejection::bad_request("malformed request line"));
    };
    if method != "GET" {
        return Err(Rejection::bad_request("upgrade requires GET"));
    }
    if version != "HTTP/1.1" {
        return Err(Rejection::bad_request("upgrade requires HTTP/1.1"));
    }
    if head.header("host").is_none() {
        return Err(Rejection::bad_request("missing Host"));
    }
    if !head.has_token("upgrade", "websocket") {
        return Err(Rejection::bad_request("missing Upgrade: websocket"));
    }
    if !head.has_token("connection", "upgrade") {
        return Err(Rejection::bad_request("missing Connection: Upgrade"));
    }
    if head.header("sec-websocket-version") != Some(WEBSOCKET_VERSION) {
        return Err(Rejection {
            status: UPGRADE_REQUIRED,
            reason: "unsupported Sec-WebSocket-Version",
        });
    }
    let key = head
        .header("sec-websocket-key")
        .filter(|key| {
            BASE64_STANDARD
                .decode(key)
                .is_ok_and(|nonce| nonce.len() == 16)
        })
        .ok_or(Rejection::bad_request("missing or malformed Sec-WebSocket-Key"))?;
    Ok(Upgrade {
        key: key.to_owned(),
        path: path.to_owned(),
        offered: head
            .tokens("sec-websocket-protocol")
            .map(str::to_owned)
            .collect(),
    })
}

/// Run the server side of the upgrade over `stream`.
///
/// The first client-offered subprotocol present in `supported` is selected.
/// Invalid requests are answered with an error status before failing.
pub(crate) async fn server_handshake<S>(
    stream: &mut S,
    supported: &[String],
) -> Result<(HandshakeResult, Vec<u8>), PipelineError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (head, leftover) = read_head(stream).await?;
    let upgrade = match validate(&head) {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            log::debug!(
                "rejecting upgrade: status={}, reason={}",
                rejection.status,
                rejection.reason
            );
            // best effort: the peer may already be gone
            let _ = stream.write_all(rejection.render().as_bytes()).await;
            let _ = stream.flush().await;
            return Err(ProtocolError::UpgradeRejected {
                status: rejection.status,
                reason: rejection.reason.to_owned(),
            }
            .into());
        }
    };

    let subprotocol = upgrade
        .offered
        .iter()
        .find(|offered| supported.contains(offered))
        .cloned();
    let mut response = format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n",
        accept_key(&upgrade.key)
    );
    if let Some(protocol) = &subprotocol {
        let _ = write!(response, "Sec-WebSocket-Protocol: {protocol}\r\n");
    }
    response.push_str("\r\n");
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;

    Ok((
        HandshakeResult {
            status: SWITCHING_PROTOCOLS,
            subprotocol,
            extensions: Vec::new(),
            path: upgrade.path,
        },
        leftover,
    ))
}
