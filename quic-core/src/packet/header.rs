// SPDX-License-Identifier: Apache-2.0

//! Structural (unprotected) packet header fields for the long- and
//! short-header packet types of RFC 9000 §17. Header protection and AEAD
//! sealing/opening operate on the bytes this module locates, but are not
//! performed here — that needs key material, which lives in `quic-conn`.

use crate::{connection_id::ConnectionId, varint::VarInt};
use quic_wire::{DecoderBuffer, DecoderBufferResult, DecoderError, Encoder, EncoderValue};

pub const QUIC_VERSION_1: u32 = 0x0000_0001;

/// The first byte's high bit: `1` for long headers, `0` for short.
const LONG_HEADER_FORM: u8 = 0x80;
const FIXED_BIT: u8 = 0x40;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LongPacketType {
    Initial,
    ZeroRtt,
    Handshake,
    Retry,
}

impl LongPacketType {
    fn bits(self) -> u8 {
        match self {
            LongPacketType::Initial => 0b00,
            LongPacketType::ZeroRtt => 0b01,
            LongPacketType::Handshake => 0b10,
            LongPacketType::Retry => 0b11,
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits {
            0b00 => LongPacketType::Initial,
            0b01 => LongPacketType::ZeroRtt,
            0b10 => LongPacketType::Handshake,
            0b11 => LongPacketType::Retry,
            _ => unreachable!(),
        }
    }
}

/// The cleartext prefix of a long-header packet, up to (but not including)
/// the still packet-number-protected bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LongHeader {
    pub packet_type: LongPacketType,
    pub version: u32,
    pub destination_cid: ConnectionId,
    pub source_cid: ConnectionId,
    /// Initial packets only; empty for Handshake/0-RTT.
    pub token: alloc::vec::Vec<u8>,
    /// Raw first byte as it appeared on the wire, still carrying the
    /// header-protection-mangled low bits.
    pub first_byte: u8,
}

impl LongHeader {
    /// Parses everything up to and including the `Length` varint, leaving
    /// the caller positioned at the (still-protected) packet number.
    pub fn decode(buffer: DecoderBuffer) -> DecoderBufferResult<(Self, VarInt)> {
        let (first_byte, buffer) = buffer.decode::<u8>()?;
        if first_byte & LONG_HEADER_FORM == 0 {
            return Err(DecoderError::InvariantViolation("not a long header"));
        }

        let packet_type = LongPacketType::from_bits((first_byte >> 4) & 0x3);

        let (version, buffer) = buffer.decode::<u32>()?;
        let (destination_cid, buffer) = buffer.decode::<ConnectionId>()?;
        let (source_cid, buffer) = buffer.decode::<ConnectionId>()?;

        let (token, buffer) = if packet_type == LongPacketType::Initial {
            let (slice, buffer) = buffer.decode_slice_with_len_prefix::<VarInt>()?;
            (slice.peek().to_vec(), buffer)
        } else {
            (alloc::vec::Vec::new(), buffer)
        };

        let (length, buffer) = buffer.decode::<VarInt>()?;

        Ok((
            (
                LongHeader {
                    packet_type,
                    version,
                    destination_cid,
                    source_cid,
                    token,
                    first_byte,
                },
                length,
            ),
            buffer,
        ))
    }

    /// Encodes the header with `first_byte`'s low bits set to `pn_len_bits`
    /// (to be XORed by header protection later) and writes a reserved
    /// `length` prefix, returning the encoder offset of that prefix so the
    /// caller can patch it once the payload size is known.
    pub fn encode_with_length_placeholder<E: Encoder>(
        &self,
        pn_len_bits: u8,
        encoder: &mut E,
    ) -> usize {
        let first_byte = LONG_HEADER_FORM | FIXED_BIT | (self.packet_type.bits() << 4) | pn_len_bits;
        first_byte.encode(encoder);
        self.version.encode(encoder);
        self.destination_cid.encode(encoder);
        self.source_cid.encode(encoder);

        if self.packet_type == LongPacketType::Initial {
            let len: VarInt = self.token.len().try_into().unwrap_or(VarInt::MAX);
            len.encode(encoder);
            encoder.write_slice(&self.token);
        }

        // 2-byte length placeholder is enough for any realistic datagram.
        encoder.reserve(2)
    }
}

/// A short-header (1-RTT) packet's cleartext prefix. The DCID length is not
/// carried on the wire; callers must know it from their own configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShortHeader {
    pub destination_cid: ConnectionId,
    pub first_byte: u8,
}

impl ShortHeader {
    pub fn decode(buffer: DecoderBuffer, dcid_len: usize) -> DecoderBufferResult<Self> {
        let (first_byte, buffer) = buffer.decode::<u8>()?;
        if first_byte & LONG_HEADER_FORM != 0 {
            return Err(DecoderError::InvariantViolation("not a short header"));
        }
        let (slice, buffer) = buffer.decode_slice(dcid_len)?;
        let destination_cid = ConnectionId::try_from_bytes(slice.peek())
            .map_err(|_| DecoderError::InvariantViolation("cid too long"))?;

        Ok((
            ShortHeader {
                destination_cid,
                first_byte,
            },
            buffer,
        ))
    }

    pub fn key_phase(&self) -> bool {
        self.first_byte & 0x04 != 0
    }

    pub fn spin_bit(&self) -> bool {
        self.first_byte & 0x20 != 0
    }

    pub fn encode<E: Encoder>(
        &self,
        pn_len_bits: u8,
        key_phase: bool,
        spin_bit: bool,
        encoder: &mut E,
    ) {
        let mut first_byte = FIXED_BIT | pn_len_bits;
        if key_phase {
            first_byte |= 0x04;
        }
        if spin_bit {
            first_byte |= 0x20;
        }
        first_byte.encode(encoder);
        encoder.write_slice(self.destination_cid.as_bytes());
    }
}

/// A Version Negotiation packet: parse-only, carrying the server's list of
/// supported versions so a client can tell a version mismatch apart from a
/// malformed packet.
pub struct VersionNegotiation {
    pub destination_cid: ConnectionId,
    pub source_cid: ConnectionId,
    pub supported_versions: alloc::vec::Vec<u32>,
}

impl VersionNegotiation {
    pub fn decode(buffer: DecoderBuffer) -> DecoderBufferResult<Self> {
        let (first_byte, buffer) = buffer.decode::<u8>()?;
        if first_byte & LONG_HEADER_FORM == 0 {
            return Err(DecoderError::InvariantViolation("not a long header"));
        }
        let (version, buffer) = buffer.decode::<u32>()?;
        if version != 0 {
            return Err(DecoderError::InvariantViolation("not version negotiation"));
        }
        let (destination_cid, buffer) = buffer.decode::<ConnectionId>()?;
        let (source_cid, mut buffer) = buffer.decode::<ConnectionId>()?;

        let mut supported_versions = alloc::vec::Vec::new();
        while !buffer.is_empty() {
            let (v, rest) = buffer.decode::<u32>()?;
            supported_versions.push(v);
            buffer = rest;
        }

        Ok((
            VersionNegotiation {
                destination_cid,
                source_cid,
                supported_versions,
            },
            buffer,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quic_wire::EncoderBuffer;

    #[test]
    fn long_header_round_trips_structural_fields() {
        let header = LongHeader {
            packet_type: LongPacketType::Initial,
            version: QUIC_VERSION_1,
            destination_cid: ConnectionId::try_from_bytes(&[0x83, 0x94, 0xc8, 0xf0, 0x3e, 0x51, 0x57, 0x08])
                .unwrap(),
            source_cid: ConnectionId::EMPTY,
            token: alloc::vec::Vec::new(),
            first_byte: 0,
        };

        let mut storage = [0u8; 64];
        let mut encoder = EncoderBuffer::new(&mut storage);
        let len_offset = header.encode_with_length_placeholder(0b11, &mut encoder);
        encoder.set_slice_at(len_offset, &[0x44, 0x9e]);
        // payload would follow here in a real packet

        let ((decoded, length), _) = LongHeader::decode(DecoderBuffer::new(encoder.as_slice())).unwrap();
        assert_eq!(decoded.packet_type, LongPacketType::Initial);
        assert_eq!(decoded.version, QUIC_VERSION_1);
        assert_eq!(decoded.destination_cid, header.destination_cid);
        assert_eq!(length.as_u64(), 0x49e);
    }

    #[test]
    fn short_header_round_trips() {
        let cid = ConnectionId::try_from_bytes(&[1, 2, 3, 4]).unwrap();
        let header = ShortHeader {
            destination_cid: cid,
            first_byte: 0,
        };
        let mut storage = [0u8; 16];
        let mut encoder = EncoderBuffer::new(&mut storage);
        header.encode(0b01, true, false, &mut encoder);

        let (decoded, _) = ShortHeader::decode(DecoderBuffer::new(encoder.as_slice()), 4).unwrap();
        assert_eq!(decoded.destination_cid, cid);
        assert!(decoded.key_phase());
        assert!(!decoded.spin_bit());
    }
}
