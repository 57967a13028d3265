use std::io;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{Frame, MAX_CONTROL_PAYLOAD, OpCode, apply_mask};
use crate::{
    Role,
    byte_order::{read_network_u16, read_network_u64, write_network_u16, write_network_u64},
    error::ProtocolError,
};

const FIN: u8 = 0x80;
const RSV_MASK: u8 = 0x70;
const OPCODE_MASK: u8 = 0x0F;
const MASK_BIT: u8 = 0x80;
const LEN_MASK: u8 = 0x7F;
const LEN_16: u8 = 126;
const LEN_64: u8 = 127;

/// Decoder for inbound frames; see [`super::FrameCodec::decoder`].
#[derive(Debug)]
pub struct FrameDecoder {
    role: Role,
    max_frame_size: usize,
}

impl FrameDecoder {
    pub(super) fn new(role: Role, max_frame_size: usize) -> Self {
        Self {
            role,
            max_frame_size,
        }
    }
}

struct Header {
    fin: bool,
    opcode: OpCode,
    mask: Option<[u8; 4]>,
    header_len: usize,
    payload_len: usize,
}

impl FrameDecoder {
    /// Parse the header at the front of `src`, or `None` if incomplete.
    fn parse_header(&self, src: &[u8]) -> Result<Option<Header>, ProtocolError> {
        let [b0, b1, rest @ ..] = src else {
            return Ok(None);
        };
        let bits = (b0 & RSV_MASK) >> 4;
        if bits != 0 {
            return Err(ProtocolError::ReservedBits { bits });
        }
        let fin = b0 & FIN != 0;
        let opcode = OpCode::try_from(b0 & OPCODE_MASK)?;
        if opcode.is_control() && !fin {
            return Err(ProtocolError::FragmentedControl);
        }
        let masked = b1 & MASK_BIT != 0;
        let expected = self.role.expects_masked();
        if masked != expected {
            return Err(ProtocolError::MaskMismatch { expected });
        }

        let (declared, ext_len) = match b1 & LEN_MASK {
            LEN_16 => match rest.first_chunk::<2>() {
                Some(bytes) => (u64::from(read_network_u16(*bytes)), 2),
                None => return Ok(None),
            },
            LEN_64 => match rest.first_chunk::<8>() {
                Some(bytes) => (read_network_u64(*bytes), 8),
                None => return Ok(None),
            },
            short => (u64::from(short), 0),
        };
        if declared >> 63 != 0 {
            return Err(ProtocolError::InvalidLength);
        }
        if opcode.is_control() && declared > MAX_CONTROL_PAYLOAD as u64 {
            return Err(ProtocolError::ControlFrameTooLarge(
                usize::try_from(declared).unwrap_or(usize::MAX),
            ));
        }
        let payload_len = usize::try_from(declared)
            .ok()
            .filter(|len| *len <= self.max_frame_size)
            .ok_or(ProtocolError::FrameTooLarge {
                size: declared,
                max: self.max_frame_size,
            })?;

        let mask = if masked {
            match rest.get(ext_len..ext_len + 4) {
                Some(key) => {
                    let mut buf = [0_u8; 4];
                    buf.copy_from_slice(key);
                    Some(buf)
                }
                None => return Ok(None),
            }
        } else {
            None
        };
        Ok(Some(Header {
            fin,
            opcode,
            mask,
            header_len: 2 + ext_len + if masked { 4 } else { 0 },
            payload_len,
        }))
    }
}

impl Decoder for FrameDecoder {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(header) = self.parse_header(src)? else {
            return Ok(None);
        };
        let total = header.header_len + header.payload_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        src.advance(header.header_len);
        let mut payload = src.split_to(header.payload_len);
        if let Some(key) = header.mask {
            apply_mask(&mut payload, key);
        }
        Ok(Some(Frame {
            fin: header.fin,
            opcode: header.opcode,
            payload: payload.freeze(),
        }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            return Ok(None);
        }
        Err(ProtocolError::TruncatedFrame {
            buffered: src.len(),
        }
        .into())
    }
}

/// Encoder for outbound frames; see [`super::FrameCodec::encoder`].
#[derive(Debug)]
pub struct FrameEncoder {
    role: Role,
}

impl FrameEncoder {
    pub(super) fn new(role: Role) -> Self { Self { role } }
}

impl Encoder<Frame> for FrameEncoder {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = frame.payload.len();
        if frame.opcode.is_control() {
            if !frame.fin {
                return Err(ProtocolError::FragmentedControl.into());
            }
            if len > MAX_CONTROL_PAYLOAD {
                return Err(ProtocolError::ControlFrameTooLarge(len).into());
            }
        }
        let mask_bit = if self.role.masks_outbound() { MASK_BIT } else { 0 };
        dst.reserve(14 + len);
        dst.put_u8(if frame.fin { FIN } else { 0 } | frame.opcode as u8);
        match u16::try_from(len) {
            Ok(short) if short < u16::from(LEN_16) => {
                #[expect(clippy::cast_possible_truncation, reason = "checked above")]
                dst.put_u8(mask_bit | short as u8);
            }
            Ok(medium) => {
                dst.put_u8(mask_bit | LEN_16);
                dst.put_slice(&write_network_u16(medium));
            }
            Err(_) => {
                dst.put_u8(mask_bit | LEN_64);
                dst.put_slice(&write_network_u64(len as u64));
            }
        }
        if self.role.masks_outbound() {
            let key: [u8; 4] = rand::random();
            dst.put_slice(&key);
            let start = dst.len();
            dst.put_slice(&frame.payload);
            apply_mask(&mut dst[start..], key);
        } else {
            dst.put_slice(&frame.payload);
        }
        Ok(())
    }
}
