use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    byte_order::{read_network_u16, write_network_u16},
    error::ProtocolError,
    frame::MAX_CONTROL_PAYLOAD,
};

/// Status code carried by a close frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// The purpose of the connection was fulfilled.
    pub const NORMAL: Self = Self(1000);
    /// The endpoint is going away.
    pub const GOING_AWAY: Self = Self(1001);
    /// The peer violated the protocol.
    pub const PROTOCOL_ERROR: Self = Self(1002);
    /// The peer sent a data type the endpoint cannot accept.
    pub const UNSUPPORTED_DATA: Self = Self(1003);
    /// A text message was not valid UTF-8.
    pub const INVALID_PAYLOAD: Self = Self(1007);
    /// A message violated endpoint policy.
    pub const POLICY_VIOLATION: Self = Self(1008);
    /// A message was too large to process.
    pub const MESSAGE_TOO_BIG: Self = Self(1009);
    /// The server hit an unexpected condition.
    pub const INTERNAL_ERROR: Self = Self(1011);

    /// Returns `true` if the code may appear in a close frame on the wire.
    ///
    /// 1005 and 1006 are reserved for local reporting; 1004 and 1015 are
    /// reserved outright. 3000-4999 are for libraries and applications.
    #[must_use]
    pub fn is_allowed_on_wire(self) -> bool {
        matches!(self.0, 1000..=1003 | 1007..=1014 | 3000..=4999)
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self { code.0 }
}

/// Status and reason of a close frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseFrame {
    /// Status code.
    pub code: CloseCode,
    /// Human-readable reason, at most 123 bytes on the wire.
    pub reason: String,
}

impl CloseFrame {
    /// Construct a close frame.
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Parse a close frame payload.
    ///
    /// An empty payload yields `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidClosePayload`] for a one-byte payload,
    /// [`ProtocolError::InvalidCloseCode`] for a code not allowed on the wire
    /// and [`ProtocolError::InvalidUtf8`] for a malformed reason.
    pub fn parse(payload: &[u8]) -> Result<Option<Self>, ProtocolError> {
        let Some((code, reason)) = payload.split_first_chunk::<2>() else {
            return if payload.is_empty() {
                Ok(None)
            } else {
                Err(ProtocolError::InvalidClosePayload)
            };
        };
        let code = CloseCode(read_network_u16(*code));
        if !code.is_allowed_on_wire() {
            return Err(ProtocolError::InvalidCloseCode(code.0));
        }
        let reason = std::str::from_utf8(reason).map_err(|_| ProtocolError::InvalidUtf8)?;
        Ok(Some(Self::new(code, reason)))
    }

    /// Serialise into a close frame payload, truncating the reason at a
    /// character boundary so the payload fits a control frame.
    #[must_use]
    pub fn to_payload(&self) -> Bytes {
        let mut end = self.reason.len().min(MAX_CONTROL_PAYLOAD - 2);
        while !self.reason.is_char_boundary(end) {
            end -= 1;
        }
        let mut buf = BytesMut::with_capacity(2 + end);
        buf.put_slice(&write_network_u16(self.code.0));
        buf.put_slice(&self.reason.as_bytes()[..end]);
        buf.freeze()
    }
}

impl ProtocolError {
    /// Close code the engine sends when terminating over this error.
    #[must_use]
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::InvalidUtf8 => CloseCode::INVALID_PAYLOAD,
            Self::FrameTooLarge { .. } | Self::MessageTooLarge { .. } => CloseCode::MESSAGE_TOO_BIG,
            _ => CloseCode::PROTOCOL_ERROR,
        }
    }
}
