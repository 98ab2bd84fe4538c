// SPDX-License-Identifier: Apache-2.0

//! The connection ID type shared by every packet header. Issuance and
//! retirement bookkeeping live in `quic-conn`'s connection-ID manager; this
//! module only knows how to hold and compare a CID value.

use core::{convert::TryFrom, fmt};
use quic_wire::{DecoderBuffer, DecoderBufferResult, DecoderValue, Encoder, EncoderValue};

/// RFC 9000 §17.2: a long-header destination/source connection ID field is
/// at most 20 bytes (its length is itself a single byte elsewhere in the
/// header).
pub const MAX_LEN: usize = 20;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId {
    bytes: [u8; MAX_LEN],
    len: u8,
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ConnectionId(")?;
        for byte in self.as_bytes() {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LengthError;

impl ConnectionId {
    pub fn try_from_bytes(bytes: &[u8]) -> Result<Self, LengthError> {
        if bytes.len() > MAX_LEN {
            return Err(LengthError);
        }
        let mut storage = [0u8; MAX_LEN];
        storage[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            bytes: storage,
            len: bytes.len() as u8,
        })
    }

    pub const EMPTY: Self = Self {
        bytes: [0; MAX_LEN],
        len: 0,
    };

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl TryFrom<&[u8]> for ConnectionId {
    type Error = LengthError;
    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Self::try_from_bytes(value)
    }
}

impl<'a> DecoderValue<'a> for ConnectionId {
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (len, buffer) = buffer.decode::<u8>()?;
        let (slice, buffer) = buffer.decode_slice(len as usize)?;
        let cid = ConnectionId::try_from_bytes(slice.peek())
            .map_err(|_| quic_wire::DecoderError::LengthCapacityExceeded)?;
        Ok((cid, buffer))
    }
}

impl EncoderValue for ConnectionId {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.write_u8(self.len);
        encoder.write_slice(self.as_bytes());
    }

    fn encoding_size(&self) -> usize {
        1 + self.len as usize
    }
}

/// A locally-issued or peer-issued CID paired with its issuance sequence
/// number, as tracked by NEW_CONNECTION_ID / the connection-ID manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sequenced {
    pub sequence_number: u64,
    pub id: ConnectionId,
}

/// A 128-bit stateless reset token, derived by the issuer as
/// `HMAC(stateless_reset_key, cid)` and presented back by the peer inside
/// the final 16 bytes of a stateless-reset-shaped short header packet.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct StatelessResetToken([u8; 16]);

impl fmt::Debug for StatelessResetToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "StatelessResetToken(..)")?;
        let _ = f;
        Ok(())
    }
}

impl StatelessResetToken {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quic_wire::EncoderBuffer;

    #[test]
    fn round_trips_through_wire() {
        let cid = ConnectionId::try_from_bytes(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let mut storage = [0u8; 32];
        let mut encoder = EncoderBuffer::new(&mut storage);
        cid.encode(&mut encoder);
        let (decoded, remaining) = DecoderBuffer::new(encoder.as_slice())
            .decode::<ConnectionId>()
            .unwrap();
        assert_eq!(decoded, cid);
        assert!(remaining.is_empty());
    }

    #[test]
    fn rejects_oversized_ids() {
        assert!(ConnectionId::try_from_bytes(&[0u8; 21]).is_err());
    }
}
