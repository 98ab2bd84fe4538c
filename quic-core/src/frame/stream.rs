// SPDX-License-Identifier: Apache-2.0

//! STREAM frames (RFC 9000 §19.8). The frame type's three low bits encode
//! which of OFF/LEN/FIN are present.

use super::tag;
use crate::varint::VarInt;
use quic_wire::{DecoderBuffer, DecoderBufferResult, Encoder, EncoderValue};

const OFF_BIT: u64 = 0x04;
const LEN_BIT: u64 = 0x02;
const FIN_BIT: u64 = 0x01;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamFrame<'a> {
    pub stream_id: VarInt,
    pub offset: VarInt,
    pub data: &'a [u8],
    pub is_fin: bool,
}

impl<'a> StreamFrame<'a> {
    pub fn decode(buffer: DecoderBuffer<'a>, raw_tag: u64) -> DecoderBufferResult<'a, Self> {
        let (_, buffer) = buffer.decode::<VarInt>()?;
        let (stream_id, buffer) = buffer.decode::<VarInt>()?;

        let (offset, buffer) = if raw_tag & OFF_BIT != 0 {
            buffer.decode::<VarInt>()?
        } else {
            (VarInt::ZERO, buffer)
        };

        let (data, buffer) = if raw_tag & LEN_BIT != 0 {
            let (slice, buffer) = buffer.decode_slice_with_len_prefix::<VarInt>()?;
            (slice.peek(), buffer)
        } else {
            let remaining = buffer.len();
            let (slice, buffer) = buffer.decode_slice(remaining)?;
            (slice.peek(), buffer)
        };

        Ok((
            StreamFrame {
                stream_id,
                offset,
                data,
                is_fin: raw_tag & FIN_BIT != 0,
            },
            buffer,
        ))
    }

    /// Encodes with an explicit length prefix (`LEN` bit always set) so the
    /// frame can be followed by more frames in the same packet. Only omits
    /// `OFF` when the offset is zero.
    pub fn encode<E: Encoder>(&self, encoder: &mut E) {
        let mut raw_tag = tag::STREAM_START | LEN_BIT;
        if self.offset.as_u64() != 0 {
            raw_tag |= OFF_BIT;
        }
        if self.is_fin {
            raw_tag |= FIN_BIT;
        }
        VarInt::new(raw_tag).unwrap().encode(encoder);
        self.stream_id.encode(encoder);
        if self.offset.as_u64() != 0 {
            self.offset.encode(encoder);
        }
        let len: VarInt = VarInt::new(self.data.len() as u64).unwrap_or(VarInt::MAX);
        len.encode(encoder);
        encoder.write_slice(self.data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quic_wire::EncoderBuffer;

    #[test]
    fn round_trips_with_offset_and_fin() {
        let frame = StreamFrame {
            stream_id: VarInt::new(4).unwrap(),
            offset: VarInt::new(64).unwrap(),
            data: b"payload",
            is_fin: true,
        };
        let mut storage = [0u8; 32];
        let mut encoder = EncoderBuffer::new(&mut storage);
        frame.encode(&mut encoder);

        let buffer = DecoderBuffer::new(encoder.as_slice());
        let (raw_tag, _) = buffer.decode::<VarInt>().unwrap();
        let (decoded, remaining) = StreamFrame::decode(buffer, raw_tag.as_u64()).unwrap();
        assert_eq!(decoded, frame);
        assert!(remaining.is_empty());
    }

    #[test]
    fn zero_offset_is_omitted() {
        let frame = StreamFrame {
            stream_id: VarInt::ZERO,
            offset: VarInt::ZERO,
            data: b"hi",
            is_fin: false,
        };
        let mut storage = [0u8; 16];
        let mut encoder = EncoderBuffer::new(&mut storage);
        frame.encode(&mut encoder);

        let buffer = DecoderBuffer::new(encoder.as_slice());
        let (raw_tag, _) = buffer.decode::<VarInt>().unwrap();
        assert_eq!(raw_tag.as_u64() & OFF_BIT, 0);
        let (decoded, _) = StreamFrame::decode(buffer, raw_tag.as_u64()).unwrap();
        assert_eq!(decoded, frame);
    }
}
