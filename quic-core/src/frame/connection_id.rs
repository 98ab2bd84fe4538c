// SPDX-License-Identifier: Apache-2.0

//! NEW_CONNECTION_ID and RETIRE_CONNECTION_ID frames (RFC 9000 §19.15, §19.16).

use crate::connection_id::{ConnectionId, StatelessResetToken};
use crate::varint::VarInt;
use quic_wire::{DecoderBuffer, DecoderBufferResult, DecoderValue, Encoder, EncoderValue};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NewConnectionIdFrame {
    pub sequence_number: VarInt,
    pub retire_prior_to: VarInt,
    pub connection_id: ConnectionId,
    pub stateless_reset_token: StatelessResetToken,
}

impl NewConnectionIdFrame {
    pub fn decode(buffer: DecoderBuffer) -> DecoderBufferResult<Self> {
        let (sequence_number, buffer) = buffer.decode::<VarInt>()?;
        let (retire_prior_to, buffer) = buffer.decode::<VarInt>()?;
        let (connection_id, buffer) = buffer.decode::<ConnectionId>()?;
        let (slice, buffer) = buffer.decode_slice(16)?;
        let mut token = [0u8; 16];
        token.copy_from_slice(slice.peek());
        Ok((
            NewConnectionIdFrame {
                sequence_number,
                retire_prior_to,
                connection_id,
                stateless_reset_token: StatelessResetToken::from_bytes(token),
            },
            buffer,
        ))
    }

    pub fn encode<E: Encoder>(&self, encoder: &mut E) {
        self.sequence_number.encode(encoder);
        self.retire_prior_to.encode(encoder);
        self.connection_id.encode(encoder);
        encoder.write_slice(self.stateless_reset_token.as_bytes());
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetireConnectionIdFrame {
    pub sequence_number: VarInt,
}

impl RetireConnectionIdFrame {
    pub fn decode(buffer: DecoderBuffer) -> DecoderBufferResult<Self> {
        let (sequence_number, buffer) = buffer.decode::<VarInt>()?;
        Ok((RetireConnectionIdFrame { sequence_number }, buffer))
    }

    pub fn encode<E: Encoder>(&self, encoder: &mut E) {
        self.sequence_number.encode(encoder);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quic_wire::EncoderBuffer;

    #[test]
    fn new_connection_id_round_trips() {
        let frame = NewConnectionIdFrame {
            sequence_number: VarInt::new(1).unwrap(),
            retire_prior_to: VarInt::ZERO,
            connection_id: ConnectionId::try_from_bytes(&[9, 8, 7, 6]).unwrap(),
            stateless_reset_token: StatelessResetToken::from_bytes([7u8; 16]),
        };
        let mut storage = [0u8; 64];
        let mut encoder = EncoderBuffer::new(&mut storage);
        frame.encode(&mut encoder);
        let (decoded, remaining) = NewConnectionIdFrame::decode(DecoderBuffer::new(encoder.as_slice())).unwrap();
        assert_eq!(decoded, frame);
        assert!(remaining.is_empty());
    }
}
