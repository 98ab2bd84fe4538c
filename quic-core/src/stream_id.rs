// SPDX-License-Identifier: Apache-2.0

//! Stream IDs encode their initiator and directionality in the two least
//! significant bits (RFC 9000 §2.1 Table 1) and a monotonically increasing
//! per-(initiator,type) stream number in the remaining bits.

use crate::varint::VarInt;
use core::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    fn bit(self) -> u64 {
        match self {
            Side::Client => 0,
            Side::Server => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Bidirectional,
    Unidirectional,
}

impl Direction {
    fn bit(self) -> u64 {
        match self {
            Direction::Bidirectional => 0,
            Direction::Unidirectional => 1,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(VarInt);

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "StreamId({}, initiator={:?}, dir={:?})",
            self.0,
            self.initiator(),
            self.direction()
        )
    }
}

impl StreamId {
    #[inline]
    pub const fn from_varint(value: VarInt) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn as_varint(self) -> VarInt {
        self.0
    }

    /// The first stream ID for a given initiator/direction pair, i.e. stream
    /// number `0` encoded with that pair's two low bits.
    pub fn initial(initiator: Side, direction: Direction) -> Self {
        let bits = initiator.bit() | (direction.bit() << 1);
        Self(VarInt::from_u8(bits as u8))
    }

    pub fn initiator(self) -> Side {
        if self.0.as_u64() & 0x1 == 0 {
            Side::Client
        } else {
            Side::Server
        }
    }

    pub fn direction(self) -> Direction {
        if self.0.as_u64() & 0x2 == 0 {
            Direction::Bidirectional
        } else {
            Direction::Unidirectional
        }
    }

    /// The 0-based index of this stream among all streams sharing its
    /// initiator and direction.
    pub fn stream_number(self) -> u64 {
        self.0.as_u64() >> 2
    }

    /// Reconstructs the `n`th stream ID (0-based) for the given pair.
    pub fn nth(initiator: Side, direction: Direction, n: u64) -> Option<Self> {
        let bits = initiator.bit() | (direction.bit() << 1);
        let value = n.checked_mul(4)?.checked_add(bits)?;
        VarInt::new(value).ok().map(Self)
    }

    /// The next stream ID for the same initiator/direction pair.
    pub fn next(self) -> Option<Self> {
        Self::nth(self.initiator(), self.direction(), self.stream_number() + 1)
    }

    pub fn is_initiated_by(self, side: Side) -> bool {
        self.initiator() == side
    }
}

impl From<StreamId> for VarInt {
    fn from(id: StreamId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_ids_match_rfc_table() {
        assert_eq!(
            StreamId::initial(Side::Client, Direction::Bidirectional)
                .as_varint()
                .as_u64(),
            0
        );
        assert_eq!(
            StreamId::initial(Side::Server, Direction::Bidirectional)
                .as_varint()
                .as_u64(),
            1
        );
        assert_eq!(
            StreamId::initial(Side::Client, Direction::Unidirectional)
                .as_varint()
                .as_u64(),
            2
        );
        assert_eq!(
            StreamId::initial(Side::Server, Direction::Unidirectional)
                .as_varint()
                .as_u64(),
            3
        );
    }

    #[test]
    fn stream_number_round_trips() {
        let id = StreamId::nth(Side::Client, Direction::Bidirectional, 5).unwrap();
        assert_eq!(id.stream_number(), 5);
        assert_eq!(id.as_varint().as_u64(), 20);
        assert_eq!(
            id.next().unwrap(),
            StreamId::nth(Side::Client, Direction::Bidirectional, 6).unwrap()
        );
    }
}
