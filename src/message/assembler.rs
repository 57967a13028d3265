//! Inbound helper that stitches data fragments back into messages.

use std::num::NonZeroUsize;

use bytes::{Bytes, BytesMut};

use super::{CloseFrame, Message};
use crate::{
    error::ProtocolError,
    frame::{Frame, OpCode},
};

#[derive(Debug)]
struct Partial {
    text: bool,
    buffer: BytesMut,
}

/// Reassembles fragmented data messages; control frames pass through.
#[derive(Debug)]
pub struct Assembler {
    max_message_size: NonZeroUsize,
    partial: Option<Partial>,
}

impl Assembler {
    /// Create an assembler rejecting messages longer than `max_message_size`.
    #[must_use]
    pub fn new(max_message_size: NonZeroUsize) -> Self {
        Self {
            max_message_size,
            partial: None,
        }
    }

    /// Returns `true` while a fragmented message is open.
    #[must_use]
    pub fn in_progress(&self) -> bool { self.partial.is_some() }

    /// Feed one frame.
    ///
    /// Returns `Ok(Some(_))` when the frame completes a message (control
    /// frames always do) and `Ok(None)` while more fragments are needed.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] when fragments arrive out of order, a
    /// message exceeds the size limit, text is not UTF-8 or a close
    /// payload is malformed. The assembler should be discarded afterwards.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>, ProtocolError> {
        match frame.opcode {
            OpCode::Ping => Ok(Some(Message::Ping(frame.payload))),
            OpCode::Pong => Ok(Some(Message::Pong(frame.payload))),
            OpCode::Close => Ok(Some(Message::Close(CloseFrame::parse(&frame.payload)?))),
            OpCode::Text | OpCode::Binary => {
                if self.partial.is_some() {
                    return Err(ProtocolError::InterleavedMessage);
                }
                let text = frame.opcode == OpCode::Text;
                self.check_size(frame.payload.len())?;
                if frame.fin {
                    return complete(text, frame.payload).map(Some);
                }
                self.partial = Some(Partial {
                    text,
                    buffer: BytesMut::from(&frame.payload[..]),
                });
                Ok(None)
            }
            OpCode::Continuation => {
                let Some(partial) = self.partial.as_mut() else {
                    return Err(ProtocolError::UnexpectedContinuation);
                };
                let size = partial.buffer.len() + frame.payload.len();
                if size > self.max_message_size.get() {
                    return Err(ProtocolError::MessageTooLarge {
                        size,
                        max: self.max_message_size.get(),
                    });
                }
                partial.buffer.extend_from_slice(&frame.payload);
                if !frame.fin {
                    return Ok(None);
                }
                let Partial { text, buffer } = self
                    .partial
                    .take()
                    .ok_or(ProtocolError::UnexpectedContinuation)?;
                complete(text, buffer.freeze()).map(Some)
            }
        }
    }

    fn check_size(&self, size: usize) -> Result<(), ProtocolError> {
        let max = self.max_message_size.get();
        if size > max {
            return Err(ProtocolError::MessageTooLarge { size, max });
        }
        Ok(())
    }
}

fn complete(text: bool, payload: Bytes) -> Result<Message, ProtocolError> {
    if !text {
        return Ok(Message::Binary(payload));
    }
    String::from_utf8(payload.into())
        .map(Message::Text)
        .map_err(|_| ProtocolError::InvalidUtf8)
}
