// SPDX-License-Identifier: Apache-2.0

//! The variable-length integer encoding of RFC 9000 §16: the two most
//! significant bits of the first byte select an encoded length of 1, 2, 4,
//! or 8 bytes, giving usable ranges of 6, 14, 30, or 62 bits respectively.

use core::{convert::TryFrom, fmt, ops::Deref};
use quic_wire::{DecoderBuffer, DecoderBufferResult, DecoderError, DecoderValue, Encoder, EncoderValue};

pub const MAX_VARINT_VALUE: u64 = (1 << 62) - 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VarIntError;

impl fmt::Display for VarIntError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "value exceeds the 62-bit varint range")
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct VarInt(u64);

impl VarInt {
    pub const MAX: Self = Self(MAX_VARINT_VALUE);
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(1);

    pub fn new(value: u64) -> Result<Self, VarIntError> {
        if value > MAX_VARINT_VALUE {
            Err(VarIntError)
        } else {
            Ok(Self(value))
        }
    }

    /// # Safety
    /// The caller must ensure `value <= VarInt::MAX`.
    pub const unsafe fn new_unchecked(value: u64) -> Self {
        Self(value)
    }

    pub const fn from_u8(v: u8) -> Self {
        Self(v as u64)
    }

    pub const fn from_u16(v: u16) -> Self {
        Self(v as u64)
    }

    pub const fn from_u32(v: u32) -> Self {
        Self(v as u64)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn checked_add(self, other: Self) -> Option<Self> {
        Self::new(self.0.checked_add(other.0)?).ok()
    }

    #[inline]
    pub fn saturating_add(self, other: Self) -> Self {
        Self::new(self.0.saturating_add(other.0)).unwrap_or(Self::MAX)
    }

    #[inline]
    pub fn checked_sub(self, other: Self) -> Option<Self> {
        Some(Self(self.0.checked_sub(other.0)?))
    }

    #[inline]
    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// The number of bytes this value would need on the wire
    #[inline]
    pub fn encoding_size(self) -> usize {
        encoding_len(self.0)
    }
}

impl fmt::Display for VarInt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Deref for VarInt {
    type Target = u64;
    fn deref(&self) -> &u64 {
        &self.0
    }
}

impl From<VarInt> for u64 {
    fn from(v: VarInt) -> u64 {
        v.0
    }
}

impl TryFrom<u64> for VarInt {
    type Error = VarIntError;
    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<usize> for VarInt {
    type Error = VarIntError;
    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value as u64)
    }
}

impl TryFrom<VarInt> for usize {
    type Error = VarIntError;
    fn try_from(value: VarInt) -> Result<Self, Self::Error> {
        usize::try_from(value.0).map_err(|_| VarIntError)
    }
}

impl From<u8> for VarInt {
    fn from(v: u8) -> Self {
        Self::from_u8(v)
    }
}

impl From<u16> for VarInt {
    fn from(v: u16) -> Self {
        Self::from_u16(v)
    }
}

impl From<u32> for VarInt {
    fn from(v: u32) -> Self {
        Self::from_u32(v)
    }
}

/// The encoded length in bytes for a value known to be `<= MAX_VARINT_VALUE`
#[inline]
fn encoding_len(value: u64) -> usize {
    if value <= 63 {
        1
    } else if value <= 16_383 {
        2
    } else if value <= 1_073_741_823 {
        4
    } else {
        8
    }
}

impl<'a> DecoderValue<'a> for VarInt {
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (first, _) = buffer.decode_slice(1)?;
        let tag = first.peek()[0] >> 6;
        let len = 1usize << tag;
        let (slice, buffer) = buffer.decode_slice(len)?;
        let bytes = slice.peek();

        let mut value = (bytes[0] & 0x3f) as u64;
        for byte in &bytes[1..] {
            value = (value << 8) | (*byte as u64);
        }

        Ok((VarInt(value), buffer))
    }
}

impl EncoderValue for VarInt {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        let len = encoding_len(self.0);
        let tag = match len {
            1 => 0b00,
            2 => 0b01,
            4 => 0b10,
            8 => 0b11,
            _ => unreachable!(),
        };

        let mut buf = [0u8; 8];
        buf[8 - len..].copy_from_slice(&self.0.to_be_bytes()[8 - len..]);
        buf[8 - len] |= tag << 6;
        encoder.write_slice(&buf[8 - len..]);
    }

    fn encoding_size(&self) -> usize {
        encoding_len(self.0)
    }
}

/// A frame or packet whose type does not belong in the recognized set parses
/// as this error, per §4.1 of the transport specification.
pub fn decode_error_to_frame_encoding(_err: DecoderError) -> &'static str {
    "frame-encoding"
}

#[cfg(test)]
mod tests {
    use super::*;
    use quic_wire::EncoderBuffer;

    fn round_trip(value: u64, expected_len: usize) {
        let varint = VarInt::new(value).unwrap();
        assert_eq!(varint.encoding_size(), expected_len);

        let mut storage = [0u8; 8];
        let mut encoder = EncoderBuffer::new(&mut storage);
        varint.encode(&mut encoder);
        assert_eq!(encoder.as_slice().len(), expected_len);

        let (decoded, remaining) = DecoderBuffer::new(encoder.as_slice())
            .decode::<VarInt>()
            .unwrap();
        assert_eq!(decoded, varint);
        assert!(remaining.is_empty());
    }

    #[test]
    fn boundaries_round_trip() {
        round_trip(0, 1);
        round_trip(63, 1);
        round_trip(64, 2);
        round_trip(16_383, 2);
        round_trip(16_384, 4);
        round_trip(1_073_741_823, 4);
        round_trip(1_073_741_824, 8);
        round_trip(MAX_VARINT_VALUE, 8);
    }

    #[test]
    fn rfc9000_appendix_a1_examples() {
        // RFC 9000 Appendix A.1 worked examples.
        let (v, _) = DecoderBuffer::new(&[0xc2, 0x19, 0x7c, 0x5e, 0xff, 0x14, 0xe8, 0x8c])
            .decode::<VarInt>()
            .unwrap();
        assert_eq!(v.as_u64(), 151_288_809_941_952_652);

        let (v, _) = DecoderBuffer::new(&[0x9d, 0x7f, 0x3e, 0x7d])
            .decode::<VarInt>()
            .unwrap();
        assert_eq!(v.as_u64(), 494_878_333);

        let (v, _) = DecoderBuffer::new(&[0x7b, 0xbd]).decode::<VarInt>().unwrap();
        assert_eq!(v.as_u64(), 15_293);

        let (v, _) = DecoderBuffer::new(&[0x25]).decode::<VarInt>().unwrap();
        assert_eq!(v.as_u64(), 37);
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(VarInt::new(MAX_VARINT_VALUE + 1).is_err());
    }
}
