//! One-time HTTP/1.1 upgrade negotiation.
//!
//! The client sends a `GET` carrying a random `Sec-WebSocket-Key` and waits
//! for `101 Switching Protocols` with the matching `Sec-WebSocket-Accept`.
//! The server validates the request and answers with `101`, `400` or `426`.
//! Either side returns the bytes it read past the head so the framing layer
//! can replay them.

use base64::prelude::*;
use sha1::{Digest, Sha1};

mod client;
mod head;
mod server;

pub(crate) use client::client_handshake;
pub use client::ClientRequest;
pub use head::MAX_HEAD_LEN;
pub(crate) use server::server_handshake;

/// GUID appended to the client key before hashing.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Protocol version spoken by this crate.
pub const WEBSOCKET_VERSION: &str = "13";

const SWITCHING_PROTOCOLS: u16 = 101;

/// Outcome of a successful upgrade.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandshakeResult {
    /// HTTP status of the upgrade response; always `101`.
    pub status: u16,
    /// Negotiated subprotocol, if any.
    pub subprotocol: Option<String>,
    /// Negotiated extensions; none are supported, so this is empty.
    pub extensions: Vec<String>,
    /// Request target path, including any query string.
    pub path: String,
}

/// Compute the `Sec-WebSocket-Accept` value for a client key.
///
/// # Examples
///
/// ```
/// use wspipe::handshake::accept_key;
///
/// assert_eq!(
///     accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
#[must_use]
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WEBSOCKET_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Generate a fresh random `Sec-WebSocket-Key`.
#[must_use]
pub fn generate_key() -> String {
    let nonce: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(nonce)
}
