// SPDX-License-Identifier: Apache-2.0

//! Frames too small to deserve their own file: CRYPTO, NEW_TOKEN,
//! RESET_STREAM, STOP_SENDING, PATH_CHALLENGE, PATH_RESPONSE.

use crate::varint::VarInt;
use quic_wire::{DecoderBuffer, DecoderBufferResult, Encoder, EncoderValue};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CryptoFrame<'a> {
    pub offset: VarInt,
    pub data: &'a [u8],
}

impl<'a> CryptoFrame<'a> {
    pub fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (offset, buffer) = buffer.decode::<VarInt>()?;
        let (slice, buffer) = buffer.decode_slice_with_len_prefix::<VarInt>()?;
        Ok((
            CryptoFrame {
                offset,
                data: slice.peek(),
            },
            buffer,
        ))
    }

    pub fn encode<E: Encoder>(&self, encoder: &mut E) {
        self.offset.encode(encoder);
        let len: VarInt = VarInt::new(self.data.len() as u64).unwrap_or(VarInt::MAX);
        len.encode(encoder);
        encoder.write_slice(self.data);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTokenFrame<'a> {
    pub token: &'a [u8],
}

impl<'a> NewTokenFrame<'a> {
    pub fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (slice, buffer) = buffer.decode_slice_with_len_prefix::<VarInt>()?;
        Ok((NewTokenFrame { token: slice.peek() }, buffer))
    }

    pub fn encode<E: Encoder>(&self, encoder: &mut E) {
        let len: VarInt = VarInt::new(self.token.len() as u64).unwrap_or(VarInt::MAX);
        len.encode(encoder);
        encoder.write_slice(self.token);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResetStreamFrame {
    pub stream_id: VarInt,
    pub application_error_code: VarInt,
    pub final_size: VarInt,
}

impl ResetStreamFrame {
    pub fn decode(buffer: DecoderBuffer) -> DecoderBufferResult<Self> {
        let (stream_id, buffer) = buffer.decode::<VarInt>()?;
        let (application_error_code, buffer) = buffer.decode::<VarInt>()?;
        let (final_size, buffer) = buffer.decode::<VarInt>()?;
        Ok((
            ResetStreamFrame {
                stream_id,
                application_error_code,
                final_size,
            },
            buffer,
        ))
    }

    pub fn encode<E: Encoder>(&self, encoder: &mut E) {
        self.stream_id.encode(encoder);
        self.application_error_code.encode(encoder);
        self.final_size.encode(encoder);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StopSendingFrame {
    pub stream_id: VarInt,
    pub application_error_code: VarInt,
}

impl StopSendingFrame {
    pub fn decode(buffer: DecoderBuffer) -> DecoderBufferResult<Self> {
        let (stream_id, buffer) = buffer.decode::<VarInt>()?;
        let (application_error_code, buffer) = buffer.decode::<VarInt>()?;
        Ok((
            StopSendingFrame {
                stream_id,
                application_error_code,
            },
            buffer,
        ))
    }

    pub fn encode<E: Encoder>(&self, encoder: &mut E) {
        self.stream_id.encode(encoder);
        self.application_error_code.encode(encoder);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PathChallengeFrame {
    pub data: [u8; 8],
}

impl PathChallengeFrame {
    pub fn decode(buffer: DecoderBuffer) -> DecoderBufferResult<Self> {
        let (slice, buffer) = buffer.decode_slice(8)?;
        let mut data = [0u8; 8];
        data.copy_from_slice(slice.peek());
        Ok((PathChallengeFrame { data }, buffer))
    }

    pub fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.write_slice(&self.data);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PathResponseFrame {
    pub data: [u8; 8],
}

impl PathResponseFrame {
    pub fn decode(buffer: DecoderBuffer) -> DecoderBufferResult<Self> {
        let (slice, buffer) = buffer.decode_slice(8)?;
        let mut data = [0u8; 8];
        data.copy_from_slice(slice.peek());
        Ok((PathResponseFrame { data }, buffer))
    }

    pub fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.write_slice(&self.data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quic_wire::EncoderBuffer;

    #[test]
    fn crypto_frame_round_trips() {
        let frame = CryptoFrame {
            offset: VarInt::new(16).unwrap(),
            data: b"client hello bytes",
        };
        let mut storage = [0u8; 64];
        let mut encoder = EncoderBuffer::new(&mut storage);
        frame.encode(&mut encoder);
        let (decoded, remaining) = CryptoFrame::decode(DecoderBuffer::new(encoder.as_slice())).unwrap();
        assert_eq!(decoded, frame);
        assert!(remaining.is_empty());
    }

    #[test]
    fn reset_stream_round_trips() {
        let frame = ResetStreamFrame {
            stream_id: VarInt::new(4).unwrap(),
            application_error_code: VarInt::new(1).unwrap(),
            final_size: VarInt::new(1024).unwrap(),
        };
        let mut storage = [0u8; 32];
        let mut encoder = EncoderBuffer::new(&mut storage);
        frame.encode(&mut encoder);
        let (decoded, _) = ResetStreamFrame::decode(DecoderBuffer::new(encoder.as_slice())).unwrap();
        assert_eq!(decoded, frame);
    }
}
