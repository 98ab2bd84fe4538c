// SPDX-License-Identifier: Apache-2.0

use byteorder::{ByteOrder, NetworkEndian};

/// A sink that wire values are serialized into. Implemented for a growable
/// scratch buffer so that outgoing datagrams can be assembled without
/// per-frame allocation.
pub trait Encoder {
    fn write_slice(&mut self, slice: &[u8]);
    fn write_u8(&mut self, value: u8) {
        self.write_slice(&[value]);
    }
    fn write_u16(&mut self, value: u16) {
        let mut buf = [0u8; 2];
        NetworkEndian::write_u16(&mut buf, value);
        self.write_slice(&buf);
    }
    fn write_u32(&mut self, value: u32) {
        let mut buf = [0u8; 4];
        NetworkEndian::write_u32(&mut buf, value);
        self.write_slice(&buf);
    }
    fn write_u64(&mut self, value: u64) {
        let mut buf = [0u8; 8];
        NetworkEndian::write_u64(&mut buf, value);
        self.write_slice(&buf);
    }
    /// Reserves `len` zeroed bytes and returns their offset for later patching,
    /// used to write a length-prefix before its payload's length is known.
    fn reserve(&mut self, len: usize) -> usize;
    fn set_slice_at(&mut self, offset: usize, slice: &[u8]);
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn remaining_capacity(&self) -> usize;
}

/// A value that knows how to serialize itself onto an [`Encoder`]
pub trait EncoderValue {
    fn encode<E: Encoder>(&self, encoder: &mut E);

    /// The number of bytes `encode` will write; used by callers that need to
    /// check a value fits before committing to encoding it.
    fn encoding_size(&self) -> usize {
        let mut estimator = SizeEstimator(0);
        self.encode(&mut estimator);
        estimator.0
    }
}

macro_rules! impl_int {
    ($ty:ty, $write:ident) => {
        impl EncoderValue for $ty {
            #[inline]
            fn encode<E: Encoder>(&self, encoder: &mut E) {
                encoder.$write(*self);
            }

            #[inline]
            fn encoding_size(&self) -> usize {
                core::mem::size_of::<$ty>()
            }
        }
    };
}

impl EncoderValue for u8 {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.write_u8(*self);
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        1
    }
}

impl_int!(u16, write_u16);
impl_int!(u32, write_u32);
impl_int!(u64, write_u64);

impl EncoderValue for &[u8] {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.write_slice(self);
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        self.len()
    }
}

/// Encoder that only tallies bytes, used to compute `encoding_size` without
/// materializing the encoding.
struct SizeEstimator(usize);

impl Encoder for SizeEstimator {
    fn write_slice(&mut self, slice: &[u8]) {
        self.0 += slice.len();
    }
    fn reserve(&mut self, len: usize) -> usize {
        let offset = self.0;
        self.0 += len;
        offset
    }
    fn set_slice_at(&mut self, _offset: usize, _slice: &[u8]) {}
    fn len(&self) -> usize {
        self.0
    }
    fn remaining_capacity(&self) -> usize {
        usize::MAX - self.0
    }
}

/// A fixed-capacity byte buffer that outgoing packets are assembled into.
/// The connection engine owns one reusable instance per datagram so that
/// packet coalescing requires no allocation on the hot path.
pub struct EncoderBuffer<'a> {
    storage: &'a mut [u8],
    len: usize,
}

impl<'a> EncoderBuffer<'a> {
    #[inline]
    pub fn new(storage: &'a mut [u8]) -> Self {
        Self { storage, len: 0 }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.storage[..self.len]
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.storage[..self.len]
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }
}

impl<'a> Encoder for EncoderBuffer<'a> {
    #[inline]
    fn write_slice(&mut self, slice: &[u8]) {
        let end = self.len + slice.len();
        assert!(end <= self.storage.len(), "encoder buffer overflow");
        self.storage[self.len..end].copy_from_slice(slice);
        self.len = end;
    }

    #[inline]
    fn reserve(&mut self, len: usize) -> usize {
        let offset = self.len;
        let end = self.len + len;
        assert!(end <= self.storage.len(), "encoder buffer overflow");
        self.storage[offset..end].fill(0);
        self.len = end;
        offset
    }

    #[inline]
    fn set_slice_at(&mut self, offset: usize, slice: &[u8]) {
        let end = offset + slice.len();
        assert!(end <= self.len, "set_slice_at out of bounds");
        self.storage[offset..end].copy_from_slice(slice);
    }

    #[inline]
    fn len(&self) -> usize {
        self.len
    }

    #[inline]
    fn remaining_capacity(&self) -> usize {
        self.storage.len() - self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_through_buffer() {
        let mut storage = [0u8; 16];
        let mut encoder = EncoderBuffer::new(&mut storage);
        42u8.encode(&mut encoder);
        0x1234u16.encode(&mut encoder);
        let bytes = encoder.as_slice().to_vec();
        assert_eq!(bytes, vec![42, 0x12, 0x34]);
    }

    #[test]
    fn reserve_and_patch_length_prefix() {
        let mut storage = [0u8; 16];
        let mut encoder = EncoderBuffer::new(&mut storage);
        let offset = encoder.reserve(2);
        b"hi".as_slice().encode(&mut encoder);
        encoder.set_slice_at(offset, &2u16.to_be_bytes());
        assert_eq!(encoder.as_slice(), [0, 2, b'h', b'i']);
    }
}
