// SPDX-License-Identifier: Apache-2.0

//! CONNECTION_CLOSE frames (RFC 9000 §19.19). The transport variant carries
//! an additional `frame_type` field identifying what triggered the error.

use crate::varint::VarInt;
use quic_wire::{DecoderBuffer, DecoderBufferResult, Encoder, EncoderValue};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionCloseFrame<'a> {
    pub is_application_error: bool,
    pub error_code: VarInt,
    pub frame_type: Option<VarInt>,
    pub reason: &'a [u8],
}

impl<'a> ConnectionCloseFrame<'a> {
    pub fn decode(buffer: DecoderBuffer<'a>, is_application_error: bool) -> DecoderBufferResult<'a, Self> {
        let (_, buffer) = buffer.decode::<VarInt>()?;
        let (error_code, buffer) = buffer.decode::<VarInt>()?;

        let (frame_type, buffer) = if is_application_error {
            (None, buffer)
        } else {
            let (ft, buffer) = buffer.decode::<VarInt>()?;
            (Some(ft), buffer)
        };

        let (slice, buffer) = buffer.decode_slice_with_len_prefix::<VarInt>()?;

        Ok((
            ConnectionCloseFrame {
                is_application_error,
                error_code,
                frame_type,
                reason: slice.peek(),
            },
            buffer,
        ))
    }

    pub fn encode<E: Encoder>(&self, encoder: &mut E) {
        let tag = if self.is_application_error {
            super::tag::CONNECTION_CLOSE_APPLICATION
        } else {
            super::tag::CONNECTION_CLOSE_TRANSPORT
        };
        VarInt::from_u8(tag as u8).encode(encoder);
        self.error_code.encode(encoder);
        if !self.is_application_error {
            self.frame_type.unwrap_or(VarInt::ZERO).encode(encoder);
        }
        let len: VarInt = VarInt::new(self.reason.len() as u64).unwrap_or(VarInt::MAX);
        len.encode(encoder);
        encoder.write_slice(self.reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quic_wire::EncoderBuffer;

    #[test]
    fn transport_variant_round_trips() {
        let frame = ConnectionCloseFrame {
            is_application_error: false,
            error_code: VarInt::new(10).unwrap(),
            frame_type: Some(VarInt::new(0x1c).unwrap()),
            reason: b"protocol violation",
        };
        let mut storage = [0u8; 64];
        let mut encoder = EncoderBuffer::new(&mut storage);
        frame.encode(&mut encoder);
        let (decoded, remaining) =
            ConnectionCloseFrame::decode(DecoderBuffer::new(encoder.as_slice()), false).unwrap();
        assert_eq!(decoded, frame);
        assert!(remaining.is_empty());
    }

    #[test]
    fn application_variant_has_no_frame_type() {
        let frame = ConnectionCloseFrame {
            is_application_error: true,
            error_code: VarInt::ZERO,
            frame_type: None,
            reason: b"bye",
        };
        let mut storage = [0u8; 32];
        let mut encoder = EncoderBuffer::new(&mut storage);
        frame.encode(&mut encoder);
        let (decoded, _) =
            ConnectionCloseFrame::decode(DecoderBuffer::new(encoder.as_slice()), true).unwrap();
        assert_eq!(decoded, frame);
    }
}
