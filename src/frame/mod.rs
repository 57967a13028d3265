//! RFC 6455 frame types and codec.
//!
//! [`FrameCodec`] hands out a [`FrameDecoder`] and a [`FrameEncoder`] bound to
//! an endpoint [`Role`], so the read and write halves of a connection can be
//! driven by separate `FramedRead`/`FramedWrite` instances. Violations are
//! reported as [`io::Error`]s of kind `InvalidData` wrapping a
//! [`ProtocolError`]; use [`protocol_error`] to recover it.

use std::io;

use bytes::Bytes;

use crate::{Role, error::ProtocolError};

mod codec;
mod mask;

pub use codec::{FrameDecoder, FrameEncoder};
pub use mask::apply_mask;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Minimum configurable frame payload size.
///
/// Smaller limits are raised to this value so control frames always fit.
pub const MIN_FRAME_SIZE: usize = MAX_CONTROL_PAYLOAD;

/// Maximum configurable frame payload size (64 MiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

pub(crate) fn clamp_frame_size(value: usize) -> usize { value.clamp(MIN_FRAME_SIZE, MAX_FRAME_SIZE) }

/// Frame type carried in the low nibble of the first header byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Continues a fragmented data message.
    Continuation = 0x0,
    /// Starts a UTF-8 text message.
    Text = 0x1,
    /// Starts a binary message.
    Binary = 0x2,
    /// Begins or answers the close handshake.
    Close = 0x8,
    /// Keep-alive probe; answered with [`OpCode::Pong`].
    Ping = 0x9,
    /// Reply to a ping, or an unsolicited heartbeat.
    Pong = 0xA,
}

impl OpCode {
    /// Returns `true` for close, ping and pong.
    #[must_use]
    pub fn is_control(self) -> bool { (self as u8) & 0x8 != 0 }
}

impl TryFrom<u8> for OpCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }
}

/// One unmasked wire frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment of a message.
    pub fin: bool,
    /// Frame type.
    pub opcode: OpCode,
    /// Application payload with any masking removed.
    pub payload: Bytes,
}

impl Frame {
    /// Construct a final, unfragmented frame.
    pub fn new(opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode,
            payload: payload.into(),
        }
    }

    /// Construct a fragment with an explicit FIN bit.
    pub fn fragment(opcode: OpCode, payload: impl Into<Bytes>, fin: bool) -> Self {
        Self {
            fin,
            opcode,
            payload: payload.into(),
        }
    }
}

/// Factory for role-bound frame decoders and encoders.
#[derive(Clone, Copy, Debug)]
pub struct FrameCodec {
    role: Role,
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a codec for `role` accepting frames up to `max_frame_size`.
    ///
    /// The size is clamped to [`MIN_FRAME_SIZE`]..=[`MAX_FRAME_SIZE`].
    #[must_use]
    pub fn new(role: Role, max_frame_size: usize) -> Self {
        Self {
            role,
            max_frame_size: clamp_frame_size(max_frame_size),
        }
    }

    /// Role the codec was built for.
    #[must_use]
    pub fn role(&self) -> Role { self.role }

    /// Largest inbound frame payload accepted.
    #[must_use]
    pub fn max_frame_size(&self) -> usize { self.max_frame_size }

    /// Build a decoder for inbound frames.
    #[must_use]
    pub fn decoder(&self) -> FrameDecoder { FrameDecoder::new(self.role, self.max_frame_size) }

    /// Build an encoder for outbound frames.
    #[must_use]
    pub fn encoder(&self) -> FrameEncoder { FrameEncoder::new(self.role) }
}

impl From<ProtocolError> for io::Error {
    fn from(error: ProtocolError) -> Self { io::Error::new(io::ErrorKind::InvalidData, error) }
}

/// Recover the [`ProtocolError`] wrapped in a codec error, if any.
#[must_use]
pub fn protocol_error(error: &io::Error) -> Option<&ProtocolError> {
    error
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<ProtocolError>())
}
