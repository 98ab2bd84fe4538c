// SPDX-License-Identifier: Apache-2.0

//! Transport parameters (RFC 9000 §18.2), encoded as a flat sequence of
//! `{id: varint, length: varint, value: bytes}` entries. Unknown IDs are
//! skipped per RFC 9000 §7.4.1 rather than rejected, so the wire format can
//! grow without breaking older peers.

use crate::{
    connection_id::ConnectionId,
    varint::VarInt,
};
use core::{convert::TryInto, time::Duration};
use quic_wire::{
    DecoderBuffer, DecoderBufferResult, DecoderError, DecoderValue, Encoder, EncoderValue,
};

macro_rules! id {
    ($name:ident, $value:expr) => {
        pub const $name: VarInt = VarInt::from_u32($value);
    };
}

pub mod id {
    use super::*;
    id!(ORIGINAL_DESTINATION_CONNECTION_ID, 0x00);
    id!(MAX_IDLE_TIMEOUT, 0x01);
    id!(STATELESS_RESET_TOKEN, 0x02);
    id!(MAX_UDP_PAYLOAD_SIZE, 0x03);
    id!(INITIAL_MAX_DATA, 0x04);
    id!(INITIAL_MAX_STREAM_DATA_BIDI_LOCAL, 0x05);
    id!(INITIAL_MAX_STREAM_DATA_BIDI_REMOTE, 0x06);
    id!(INITIAL_MAX_STREAM_DATA_UNI, 0x07);
    id!(INITIAL_MAX_STREAMS_BIDI, 0x08);
    id!(INITIAL_MAX_STREAMS_UNI, 0x09);
    id!(ACK_DELAY_EXPONENT, 0x0a);
    id!(MAX_ACK_DELAY, 0x0b);
    id!(DISABLE_ACTIVE_MIGRATION, 0x0c);
    id!(PREFERRED_ADDRESS, 0x0d);
    id!(ACTIVE_CONNECTION_ID_LIMIT, 0x0e);
    id!(INITIAL_SOURCE_CONNECTION_ID, 0x0f);
    id!(RETRY_SOURCE_CONNECTION_ID, 0x10);
}

/// The recommended/default ack_delay_exponent of RFC 9000 §18.2.
pub const DEFAULT_ACK_DELAY_EXPONENT: u8 = 3;
/// The recommended/default max_ack_delay of RFC 9000 §18.2.
pub const DEFAULT_MAX_ACK_DELAY: Duration = Duration::from_millis(25);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransportParameters {
    pub original_destination_connection_id: Option<ConnectionId>,
    pub max_idle_timeout: Option<Duration>,
    pub stateless_reset_token: Option<[u8; 16]>,
    pub max_udp_payload_size: Option<VarInt>,
    pub initial_max_data: VarInt,
    pub initial_max_stream_data_bidi_local: VarInt,
    pub initial_max_stream_data_bidi_remote: VarInt,
    pub initial_max_stream_data_uni: VarInt,
    pub initial_max_streams_bidi: VarInt,
    pub initial_max_streams_uni: VarInt,
    pub ack_delay_exponent: u8,
    pub max_ack_delay: Duration,
    pub disable_active_migration: bool,
    pub active_connection_id_limit: VarInt,
    pub initial_source_connection_id: Option<ConnectionId>,
    pub retry_source_connection_id: Option<ConnectionId>,
}

impl TransportParameters {
    pub fn encode_into<E: Encoder>(&self, encoder: &mut E) {
        macro_rules! write_varint {
            ($id:expr, $value:expr) => {
                $id.encode(encoder);
                let v: VarInt = $value;
                v.encoding_size().try_into().unwrap_or(VarInt::ZERO).encode(encoder);
                v.encode(encoder);
            };
        }

        if let Some(cid) = self.original_destination_connection_id {
            id::ORIGINAL_DESTINATION_CONNECTION_ID.encode(encoder);
            VarInt::from_u8(cid.len() as u8).encode(encoder);
            encoder.write_slice(cid.as_bytes());
        }

        if let Some(timeout) = self.max_idle_timeout {
            let millis = VarInt::new(timeout.as_millis() as u64).unwrap_or(VarInt::MAX);
            write_varint!(id::MAX_IDLE_TIMEOUT, millis);
        }

        if let Some(token) = self.stateless_reset_token {
            id::STATELESS_RESET_TOKEN.encode(encoder);
            VarInt::from_u8(16).encode(encoder);
            encoder.write_slice(&token);
        }

        if let Some(size) = self.max_udp_payload_size {
            write_varint!(id::MAX_UDP_PAYLOAD_SIZE, size);
        }

        write_varint!(id::INITIAL_MAX_DATA, self.initial_max_data);
        write_varint!(
            id::INITIAL_MAX_STREAM_DATA_BIDI_LOCAL,
            self.initial_max_stream_data_bidi_local
        );
        write_varint!(
            id::INITIAL_MAX_STREAM_DATA_BIDI_REMOTE,
            self.initial_max_stream_data_bidi_remote
        );
        write_varint!(
            id::INITIAL_MAX_STREAM_DATA_UNI,
            self.initial_max_stream_data_uni
        );
        write_varint!(id::INITIAL_MAX_STREAMS_BIDI, self.initial_max_streams_bidi);
        write_varint!(id::INITIAL_MAX_STREAMS_UNI, self.initial_max_streams_uni);
        write_varint!(
            id::ACK_DELAY_EXPONENT,
            VarInt::from_u8(self.ack_delay_exponent)
        );
        write_varint!(
            id::MAX_ACK_DELAY,
            VarInt::new(self.max_ack_delay.as_millis() as u64).unwrap_or(VarInt::MAX)
        );

        if self.disable_active_migration {
            id::DISABLE_ACTIVE_MIGRATION.encode(encoder);
            VarInt::ZERO.encode(encoder);
        }

        write_varint!(
            id::ACTIVE_CONNECTION_ID_LIMIT,
            self.active_connection_id_limit
        );

        if let Some(cid) = self.initial_source_connection_id {
            id::INITIAL_SOURCE_CONNECTION_ID.encode(encoder);
            VarInt::from_u8(cid.len() as u8).encode(encoder);
            encoder.write_slice(cid.as_bytes());
        }

        if let Some(cid) = self.retry_source_connection_id {
            id::RETRY_SOURCE_CONNECTION_ID.encode(encoder);
            VarInt::from_u8(cid.len() as u8).encode(encoder);
            encoder.write_slice(cid.as_bytes());
        }
    }

    pub fn decode(mut buffer: DecoderBuffer) -> Result<Self, DecoderError> {
        let mut params = TransportParameters {
            ack_delay_exponent: DEFAULT_ACK_DELAY_EXPONENT,
            max_ack_delay: DEFAULT_MAX_ACK_DELAY,
            active_connection_id_limit: VarInt::from_u8(2),
            ..Default::default()
        };

        while !buffer.is_empty() {
            let (tag, rest) = buffer.decode::<VarInt>()?;
            let (value, rest) = rest.decode_slice_with_len_prefix::<VarInt>()?;
            buffer = rest;
            let bytes = value.peek();

            match tag {
                id::ORIGINAL_DESTINATION_CONNECTION_ID => {
                    params.original_destination_connection_id =
                        Some(ConnectionId::try_from_bytes(bytes).map_err(|_| {
                            DecoderError::InvariantViolation("connection id too long")
                        })?);
                }
                id::MAX_IDLE_TIMEOUT => {
                    params.max_idle_timeout =
                        Some(Duration::from_millis(decode_varint_bytes(bytes)?));
                }
                id::STATELESS_RESET_TOKEN => {
                    if bytes.len() != 16 {
                        return Err(DecoderError::InvariantViolation("bad reset token length"));
                    }
                    let mut token = [0u8; 16];
                    token.copy_from_slice(bytes);
                    params.stateless_reset_token = Some(token);
                }
                id::MAX_UDP_PAYLOAD_SIZE => {
                    params.max_udp_payload_size = Some(VarInt::new(decode_varint_bytes(bytes)?)
                        .map_err(|_| DecoderError::InvariantViolation("varint out of range"))?);
                }
                id::INITIAL_MAX_DATA => {
                    params.initial_max_data = varint_field(bytes)?;
                }
                id::INITIAL_MAX_STREAM_DATA_BIDI_LOCAL => {
                    params.initial_max_stream_data_bidi_local = varint_field(bytes)?;
                }
                id::INITIAL_MAX_STREAM_DATA_BIDI_REMOTE => {
                    params.initial_max_stream_data_bidi_remote = varint_field(bytes)?;
                }
                id::INITIAL_MAX_STREAM_DATA_UNI => {
                    params.initial_max_stream_data_uni = varint_field(bytes)?;
                }
                id::INITIAL_MAX_STREAMS_BIDI => {
                    params.initial_max_streams_bidi = varint_field(bytes)?;
                }
                id::INITIAL_MAX_STREAMS_UNI => {
                    params.initial_max_streams_uni = varint_field(bytes)?;
                }
                id::ACK_DELAY_EXPONENT => {
                    let v = decode_varint_bytes(bytes)?;
                    if v > 20 {
                        return Err(DecoderError::InvariantViolation("ack_delay_exponent too large"));
                    }
                    params.ack_delay_exponent = v as u8;
                }
                id::MAX_ACK_DELAY => {
                    params.max_ack_delay = Duration::from_millis(decode_varint_bytes(bytes)?);
                }
                id::DISABLE_ACTIVE_MIGRATION => {
                    params.disable_active_migration = true;
                }
                id::ACTIVE_CONNECTION_ID_LIMIT => {
                    params.active_connection_id_limit = varint_field(bytes)?;
                }
                id::INITIAL_SOURCE_CONNECTION_ID => {
                    params.initial_source_connection_id =
                        Some(ConnectionId::try_from_bytes(bytes).map_err(|_| {
                            DecoderError::InvariantViolation("connection id too long")
                        })?);
                }
                id::RETRY_SOURCE_CONNECTION_ID => {
                    params.retry_source_connection_id =
                        Some(ConnectionId::try_from_bytes(bytes).map_err(|_| {
                            DecoderError::InvariantViolation("connection id too long")
                        })?);
                }
                _ => {
                    // Unrecognized parameter: per RFC 9000 §7.4.1, skip it.
                }
            }
        }

        Ok(params)
    }
}

fn decode_varint_bytes(bytes: &[u8]) -> Result<u64, DecoderError> {
    let (v, rest) = DecoderBuffer::new(bytes).decode::<VarInt>()?;
    rest.ensure_drained()?;
    Ok(v.as_u64())
}

fn varint_field(bytes: &[u8]) -> Result<VarInt, DecoderError> {
    let (v, rest) = DecoderBuffer::new(bytes).decode::<VarInt>()?;
    rest.ensure_drained()?;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quic_wire::EncoderBuffer;

    #[test]
    fn round_trips_all_recognized_fields() {
        let params = TransportParameters {
            original_destination_connection_id: Some(
                ConnectionId::try_from_bytes(&[1, 2, 3, 4]).unwrap(),
            ),
            max_idle_timeout: Some(Duration::from_millis(30_000)),
            stateless_reset_token: Some([7u8; 16]),
            max_udp_payload_size: Some(VarInt::from_u16(1452)),
            initial_max_data: VarInt::from_u32(1_000_000),
            initial_max_stream_data_bidi_local: VarInt::from_u32(500_000),
            initial_max_stream_data_bidi_remote: VarInt::from_u32(500_000),
            initial_max_stream_data_uni: VarInt::from_u32(500_000),
            initial_max_streams_bidi: VarInt::from_u16(100),
            initial_max_streams_uni: VarInt::from_u16(100),
            ack_delay_exponent: 3,
            max_ack_delay: Duration::from_millis(25),
            disable_active_migration: true,
            active_connection_id_limit: VarInt::from_u8(4),
            initial_source_connection_id: Some(ConnectionId::try_from_bytes(&[9, 9]).unwrap()),
            retry_source_connection_id: None,
        };

        let mut storage = [0u8; 256];
        let mut encoder = EncoderBuffer::new(&mut storage);
        params.encode_into(&mut encoder);

        let decoded = TransportParameters::decode(DecoderBuffer::new(encoder.as_slice())).unwrap();
        assert_eq!(decoded, params);
    }

    #[test]
    fn unknown_parameter_is_skipped() {
        let mut storage = [0u8; 64];
        let mut encoder = EncoderBuffer::new(&mut storage);
        // a made-up, unrecognized transport parameter id
        VarInt::from_u32(0xff23).encode(&mut encoder);
        VarInt::from_u8(3).encode(&mut encoder);
        encoder.write_slice(&[1, 2, 3]);
        id::INITIAL_MAX_DATA.encode(&mut encoder);
        VarInt::from_u8(1).encode(&mut encoder);
        VarInt::from_u8(42).encode(&mut encoder);

        let decoded = TransportParameters::decode(DecoderBuffer::new(encoder.as_slice())).unwrap();
        assert_eq!(decoded.initial_max_data.as_u64(), 42);
    }
}
