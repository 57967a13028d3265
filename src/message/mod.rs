//! Application messages and their mapping to frames.
//!
//! Inbound frames pass through an [`Assembler`], which stitches fragments
//! into complete [`Message`]s while letting control frames interleave.
//! Outbound messages pass through a [`Fragmenter`], which splits data larger
//! than the configured fragment size into continuation frames.

use std::fmt;

use bytes::Bytes;

mod assembler;
mod close;
mod fragmenter;

pub use assembler::Assembler;
pub use close::{CloseCode, CloseFrame};
pub use fragmenter::Fragmenter;

/// A discrete unit of application data on a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// A complete UTF-8 text message.
    Text(String),
    /// A complete binary message.
    Binary(Bytes),
    /// A ping; the engine answers it automatically.
    Ping(Bytes),
    /// A pong, either solicited or a heartbeat.
    Pong(Bytes),
    /// The close handshake, with an optional status and reason.
    Close(Option<CloseFrame>),
}

impl Message {
    /// Build a text message.
    pub fn text(text: impl Into<String>) -> Self { Self::Text(text.into()) }

    /// Build a binary message.
    pub fn binary(data: impl Into<Bytes>) -> Self { Self::Binary(data.into()) }

    /// Build a close message carrying `code` and `reason`.
    pub fn close(code: CloseCode, reason: impl Into<String>) -> Self {
        Self::Close(Some(CloseFrame::new(code, reason)))
    }

    /// Returns `true` for ping, pong and close.
    #[must_use]
    pub fn is_control(&self) -> bool { matches!(self, Self::Ping(_) | Self::Pong(_) | Self::Close(_)) }

    /// Returns `true` for text and binary messages.
    #[must_use]
    pub fn is_data(&self) -> bool { !self.is_control() }

    /// Returns `true` for close messages.
    #[must_use]
    pub fn is_close(&self) -> bool { matches!(self, Self::Close(_)) }

    /// Borrow the text of a text message.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Payload length in bytes as carried on the wire.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) | Self::Ping(data) | Self::Pong(data) => data.len(),
            Self::Close(None) => 0,
            Self::Close(Some(frame)) => 2 + frame.reason.len(),
        }
    }

    /// Returns `true` if the message carries no payload.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl From<String> for Message {
    fn from(text: String) -> Self { Self::Text(text) }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self { Self::Text(text.to_owned()) }
}

impl From<Bytes> for Message {
    fn from(data: Bytes) -> Self { Self::Binary(data) }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self { Self::Binary(data.into()) }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => write!(f, "text({} bytes)", text.len()),
            Self::Binary(data) => write!(f, "binary({} bytes)", data.len()),
            Self::Ping(data) => write!(f, "ping({} bytes)", data.len()),
            Self::Pong(data) => write!(f, "pong({} bytes)", data.len()),
            Self::Close(None) => f.write_str("close"),
            Self::Close(Some(frame)) => write!(f, "close({})", frame.code),
        }
    }
}
