// SPDX-License-Identifier: Apache-2.0

use byteorder::{ByteOrder, NetworkEndian};
use core::fmt;

/// Errors produced while decoding a wire value out of a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoderError {
    /// The buffer did not contain enough bytes to decode the value
    UnexpectedEof(usize),
    /// The buffer contained more bytes than expected for a fixed-size structure
    UnexpectedBytes(usize),
    /// A length field could not be represented as a `usize` on this platform
    LengthCapacityExceeded,
    /// A value was structurally well-formed but violated a QUIC-level invariant
    InvariantViolation(&'static str),
}

impl fmt::Display for DecoderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnexpectedEof(len) => write!(f, "unexpected eof, needed {len} more bytes"),
            Self::UnexpectedBytes(len) => write!(f, "{len} unexpected trailing bytes"),
            Self::LengthCapacityExceeded => {
                write!(f, "length exceeds platform usize capacity")
            }
            Self::InvariantViolation(msg) => write!(f, "{msg}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecoderError {}

pub type DecoderBufferResult<'a, T> = Result<(T, DecoderBuffer<'a>), DecoderError>;
pub type DecoderBufferMutResult<'a, T> = Result<(T, DecoderBufferMut<'a>), DecoderError>;

/// A cursor over an immutable byte slice that consumes itself as values are
/// decoded, returning the remaining buffer alongside each decoded value.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DecoderBuffer<'a> {
    bytes: &'a [u8],
}

impl<'a> fmt::Debug for DecoderBuffer<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DecoderBuffer({} bytes)", self.bytes.len())
    }
}

impl<'a> DecoderBuffer<'a> {
    #[inline]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn peek(&self) -> &'a [u8] {
        self.bytes
    }

    #[inline]
    fn ensure_len(&self, count: usize) -> Result<(), DecoderError> {
        if self.bytes.len() < count {
            Err(DecoderError::UnexpectedEof(count - self.bytes.len()))
        } else {
            Ok(())
        }
    }

    /// Splits off `count` bytes from the front of the buffer
    #[inline]
    pub fn decode_slice(self, count: usize) -> DecoderBufferResult<'a, DecoderBuffer<'a>> {
        self.ensure_len(count)?;
        let (head, tail) = self.bytes.split_at(count);
        Ok((Self::new(head), Self::new(tail)))
    }

    /// Decodes a value of type `T`, consuming however many bytes it needs
    #[inline]
    pub fn decode<T: DecoderValue<'a>>(self) -> DecoderBufferResult<'a, T> {
        T::decode(self)
    }

    /// Decodes a length-prefixed slice, where the length is encoded as `Length`
    #[inline]
    pub fn decode_slice_with_len_prefix<Length>(self) -> DecoderBufferResult<'a, DecoderBuffer<'a>>
    where
        Length: DecoderValue<'a> + TryInto<usize>,
    {
        let (len, buffer) = self.decode::<Length>()?;
        let len = len
            .try_into()
            .map_err(|_| DecoderError::LengthCapacityExceeded)?;
        buffer.decode_slice(len)
    }

    /// Asserts the buffer has been fully consumed
    #[inline]
    pub fn ensure_drained(self) -> Result<(), DecoderError> {
        if self.bytes.is_empty() {
            Ok(())
        } else {
            Err(DecoderError::UnexpectedBytes(self.bytes.len()))
        }
    }

    #[inline]
    pub fn skip(self, count: usize) -> DecoderBufferResult<'a, ()> {
        let (_, buffer) = self.decode_slice(count)?;
        Ok(((), buffer))
    }
}

impl<'a> From<DecoderBuffer<'a>> for &'a [u8] {
    #[inline]
    fn from(buffer: DecoderBuffer<'a>) -> Self {
        buffer.bytes
    }
}

/// A cursor over a mutable byte slice. Used for in-place operations such as
/// removing header protection, where the decoded value needs to borrow back
/// into the same memory that produced it.
pub struct DecoderBufferMut<'a> {
    bytes: &'a mut [u8],
}

impl<'a> fmt::Debug for DecoderBufferMut<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DecoderBufferMut({} bytes)", self.bytes.len())
    }
}

impl<'a> DecoderBufferMut<'a> {
    #[inline]
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn decode_slice(self, count: usize) -> DecoderBufferMutResult<'a, DecoderBufferMut<'a>> {
        if self.bytes.len() < count {
            return Err(DecoderError::UnexpectedEof(count - self.bytes.len()));
        }
        let (head, tail) = self.bytes.split_at_mut(count);
        Ok((Self::new(head), Self::new(tail)))
    }

    #[inline]
    pub fn decode<T: DecoderValueMut<'a>>(self) -> DecoderBufferMutResult<'a, T> {
        T::decode_mut(self)
    }

    #[inline]
    pub fn into_less_safe_slice(self) -> &'a mut [u8] {
        self.bytes
    }

    #[inline]
    pub fn as_less_safe_slice(&self) -> &[u8] {
        self.bytes
    }

    #[inline]
    pub fn freeze(self) -> DecoderBuffer<'a> {
        DecoderBuffer::new(self.bytes)
    }
}

/// A value that can be parsed out of the front of a [`DecoderBuffer`]
pub trait DecoderValue<'a>: Sized {
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self>;
}

/// A value that can be parsed out of the front of a [`DecoderBufferMut`],
/// optionally mutating the underlying bytes as part of decoding (header
/// protection removal does exactly this).
pub trait DecoderValueMut<'a>: Sized {
    fn decode_mut(buffer: DecoderBufferMut<'a>) -> DecoderBufferMutResult<'a, Self>;
}

macro_rules! impl_int {
    ($ty:ty, $read:ident) => {
        impl<'a> DecoderValue<'a> for $ty {
            #[inline]
            fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
                let (slice, buffer) = buffer.decode_slice(core::mem::size_of::<$ty>())?;
                Ok((NetworkEndian::$read(slice.peek()), buffer))
            }
        }
    };
}

impl<'a> DecoderValue<'a> for u8 {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (slice, buffer) = buffer.decode_slice(1)?;
        Ok((slice.peek()[0], buffer))
    }
}

impl_int!(u16, read_u16);
impl_int!(u32, read_u32);
impl_int!(u64, read_u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_slice_and_ints() {
        let data = [0u8, 1, 2, 3, 4, 5, 6];
        let buffer = DecoderBuffer::new(&data);
        let (v, buffer) = buffer.decode::<u8>().unwrap();
        assert_eq!(v, 0);
        let (v, buffer) = buffer.decode::<u16>().unwrap();
        assert_eq!(v, 258);
        let (v, buffer) = buffer.decode::<u32>().unwrap();
        assert_eq!(v, 0x0304_0506);
        assert!(buffer.is_empty());
    }

    #[test]
    fn eof_reports_deficit() {
        let data = [0u8; 1];
        let buffer = DecoderBuffer::new(&data);
        let err = buffer.decode::<u32>().unwrap_err();
        assert_eq!(err, DecoderError::UnexpectedEof(3));
    }
}
