//! Canonical error and result types for the crate.
//!
//! Every failure surfaces once at the connection boundary as a
//! [`PipelineError`]. The pipeline never retries: reconnecting after a
//! [`PipelineError::Connect`] or a failed handshake is a caller concern.

use std::io;

use thiserror::Error;

use crate::{buffer::OverflowError, layer::LayerError};

/// Wire-level and handshake violations that terminate a connection.
#[non_exhaustive]
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// A frame set one of the RSV1-3 bits without a negotiated extension.
    #[error("reserved bits set in frame header: {bits:#05b}")]
    ReservedBits {
        /// The three reserved bits, right-aligned.
        bits: u8,
    },
    /// The opcode nibble does not name a known frame type.
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),
    /// A control frame was fragmented.
    #[error("fragmented control frame")]
    FragmentedControl,
    /// A control frame carried more than 125 bytes of payload.
    #[error("control frame payload of {0} bytes exceeds 125")]
    ControlFrameTooLarge(usize),
    /// A single frame exceeded the configured maximum frame size.
    #[error("frame exceeds max length: {size} > {max}")]
    FrameTooLarge {
        /// Payload length declared by the frame header.
        size: u64,
        /// Configured maximum payload length.
        max: usize,
    },
    /// A reassembled message exceeded the configured maximum message size.
    #[error("message exceeds max length: {size} > {max}")]
    MessageTooLarge {
        /// Bytes accumulated so far.
        size: usize,
        /// Configured maximum message length.
        max: usize,
    },
    /// A client sent an unmasked frame or a server sent a masked one.
    #[error("frame masking violates role: expected masked={expected}")]
    MaskMismatch {
        /// Whether the receiving role expected a masked frame.
        expected: bool,
    },
    /// The 64-bit length form had its most significant bit set.
    #[error("invalid extended payload length")]
    InvalidLength,
    /// A continuation frame arrived with no fragmented message open.
    #[error("continuation frame without an open message")]
    UnexpectedContinuation,
    /// A new data frame arrived while a fragmented message was still open.
    #[error("data frame interleaved with an open fragmented message")]
    InterleavedMessage,
    /// A text message was not valid UTF-8.
    #[error("text payload is not valid UTF-8")]
    InvalidUtf8,
    /// A close frame carried a one-byte or otherwise malformed payload.
    #[error("malformed close payload")]
    InvalidClosePayload,
    /// A close frame carried a status code that may not appear on the wire.
    #[error("close code {0} is not permitted on the wire")]
    InvalidCloseCode(u16),
    /// The byte stream ended part-way through a frame.
    #[error("connection closed mid-frame with {buffered} bytes buffered")]
    TruncatedFrame {
        /// Bytes left in the read buffer at end of stream.
        buffered: usize,
    },
    /// The HTTP upgrade head was malformed or too long.
    #[error("malformed upgrade head: {0}")]
    MalformedHead(&'static str),
    /// The peer refused or did not understand the upgrade.
    #[error("upgrade rejected with status {status}: {reason}")]
    UpgradeRejected {
        /// HTTP status code of the rejection.
        status: u16,
        /// Short description of what failed validation.
        reason: String,
    },
    /// The server's `Sec-WebSocket-Accept` did not match the key sent.
    #[error("Sec-WebSocket-Accept mismatch")]
    AcceptMismatch,
    /// The server selected a subprotocol or extension that was not offered.
    #[error("server negotiated {0} which was not offered")]
    UnsolicitedNegotiation(String),
}

/// Top-level error type exposed by `wspipe`.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Resolving, binding or connecting the byte transport failed.
    #[error("connect error: {0}")]
    Connect(#[source] io::Error),
    /// The secure transport stage failed before any frame was exchanged.
    #[error("transport layer error: {0}")]
    Layer(#[from] LayerError),
    /// The upgrade did not complete within the configured interval.
    #[error("handshake timed out")]
    HandshakeTimeout,
    /// A framing or handshake violation.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// A bounded buffer using the fail policy overflowed.
    #[error(transparent)]
    Overflow(#[from] OverflowError),
    /// The close handshake did not finish within the grace period.
    #[error("close handshake forced after grace period")]
    ForcedClose,
    /// The send direction was already closed.
    #[error("connection closed")]
    ConnectionClosed,
    /// An I/O failure on an established connection.
    #[error("transport error: {0}")]
    Io(#[source] io::Error),
}

impl PipelineError {
    /// Returns `true` if this error was raised before the connection opened.
    #[must_use]
    pub fn is_handshake_failure(&self) -> bool {
        matches!(
            self,
            Self::Connect(_)
                | Self::Layer(_)
                | Self::HandshakeTimeout
                | Self::Protocol(
                    ProtocolError::MalformedHead(_)
                        | ProtocolError::UpgradeRejected { .. }
                        | ProtocolError::AcceptMismatch
                        | ProtocolError::UnsolicitedNegotiation(_)
                )
        )
    }
}

impl From<io::Error> for PipelineError {
    fn from(error: io::Error) -> Self {
        if crate::transport::is_connection_closed(&error) {
            return Self::ConnectionClosed;
        }
        match crate::frame::protocol_error(&error) {
            Some(protocol) => Self::Protocol(protocol.clone()),
            None => Self::Io(error),
        }
    }
}

/// Canonical result alias used by `wspipe` public APIs.
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
