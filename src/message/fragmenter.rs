//! Outbound helper that splits messages into wire frames.

use std::num::NonZeroUsize;

use bytes::Bytes;

use super::Message;
use crate::{
    error::ProtocolError,
    frame::{Frame, MAX_CONTROL_PAYLOAD, OpCode},
};

/// Splits data messages into fragments of at most `fragment_size` bytes.
#[derive(Clone, Copy, Debug)]
pub struct Fragmenter {
    fragment_size: NonZeroUsize,
}

impl Fragmenter {
    /// Create a fragmenter capping data frame payloads at `fragment_size`.
    #[must_use]
    pub const fn new(fragment_size: NonZeroUsize) -> Self { Self { fragment_size } }

    /// Maximum data frame payload produced.
    #[must_use]
    pub const fn fragment_size(&self) -> NonZeroUsize { self.fragment_size }

    /// Convert `message` into the frames that carry it, in wire order.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::ControlFrameTooLarge`] for a ping or pong
    /// whose payload does not fit a control frame.
    pub fn frames(&self, message: Message) -> Result<Vec<Frame>, ProtocolError> {
        let (opcode, payload) = match message {
            Message::Text(text) => (OpCode::Text, Bytes::from(text)),
            Message::Binary(data) => (OpCode::Binary, data),
            Message::Ping(data) => return control(OpCode::Ping, data),
            Message::Pong(data) => return control(OpCode::Pong, data),
            Message::Close(frame) => {
                let payload = frame.map(|frame| frame.to_payload()).unwrap_or_default();
                return Ok(vec![Frame::new(OpCode::Close, payload)]);
            }
        };
        Ok(self.split(opcode, payload))
    }

    fn split(&self, opcode: OpCode, mut payload: Bytes) -> Vec<Frame> {
        let size = self.fragment_size.get();
        if payload.len() <= size {
            return vec![Frame::new(opcode, payload)];
        }
        let mut frames = Vec::with_capacity(payload.len().div_ceil(size));
        let mut next = opcode;
        while payload.len() > size {
            frames.push(Frame::fragment(next, payload.split_to(size), false));
            next = OpCode::Continuation;
        }
        frames.push(Frame::fragment(OpCode::Continuation, payload, true));
        frames
    }
}

fn control(opcode: OpCode, payload: Bytes) -> Result<Vec<Frame>, ProtocolError> {
    if payload.len() > MAX_CONTROL_PAYLOAD {
        return Err(ProtocolError::ControlFrameTooLarge(payload.len()));
    }
    Ok(vec![Frame::new(opcode, payload)])
}
