// SPDX-License-Identifier: Apache-2.0

//! Packet numbers (RFC 9000 §12.3) and their truncated wire encoding
//! (RFC 9000 §17.1, Appendix A). Each of the three packet-number spaces
//! maintains its own strictly-increasing sequence.

use crate::varint::VarInt;
use core::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PacketNumberSpace {
    Initial,
    Handshake,
    ApplicationData,
}

impl PacketNumberSpace {
    pub const fn new_packet_number(self, value: VarInt) -> PacketNumber {
        PacketNumber {
            space: self,
            value: value.as_u64(),
        }
    }

    pub const fn zero(self) -> PacketNumber {
        self.new_packet_number(VarInt::ZERO)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PacketNumber {
    space: PacketNumberSpace,
    value: u64,
}

impl fmt::Debug for PacketNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PacketNumber({:?}, {})", self.space, self.value)
    }
}

impl PacketNumber {
    pub fn space(self) -> PacketNumberSpace {
        self.space
    }

    pub fn as_u64(self) -> u64 {
        self.value
    }

    pub fn as_varint(self) -> VarInt {
        VarInt::new(self.value).expect("packet numbers never exceed the varint range")
    }

    pub fn next(self) -> Option<PacketNumber> {
        self.value
            .checked_add(1)
            .filter(|v| *v <= crate::varint::MAX_VARINT_VALUE)
            .map(|value| PacketNumber {
                space: self.space,
                value,
            })
    }

    /// Picks the shortest encoding length that is unambiguous given the
    /// largest packet number the peer has acknowledged from us, per
    /// RFC 9000 §17.1.
    pub fn truncate(self, largest_acked: Option<PacketNumber>) -> TruncatedPacketNumber {
        let num_unacked = match largest_acked {
            Some(largest) => {
                debug_assert_eq!(largest.space, self.space);
                self.value.saturating_sub(largest.value)
            }
            None => self.value.saturating_add(1),
        };

        let min_bits = 64 - (num_unacked.max(1) * 2).leading_zeros();
        let num_bytes = ((min_bits as usize + 7) / 8).clamp(1, 4);

        let mask = if num_bytes == 8 {
            u64::MAX
        } else {
            (1u64 << (num_bytes * 8)) - 1
        };

        TruncatedPacketNumber {
            space: self.space,
            value: self.value & mask,
            len: num_bytes,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TruncatedPacketNumber {
    space: PacketNumberSpace,
    value: u64,
    len: usize,
}

impl TruncatedPacketNumber {
    pub fn len(self) -> usize {
        self.len
    }

    pub fn encode_to(self, out: &mut [u8]) {
        debug_assert_eq!(out.len(), self.len);
        let bytes = self.value.to_be_bytes();
        out.copy_from_slice(&bytes[8 - self.len..]);
    }

    /// Reconstructs the full packet number given the largest one we have
    /// already successfully processed in this space, per RFC 9000
    /// Appendix A.3.
    pub fn expand(self, largest_received: Option<PacketNumber>) -> PacketNumber {
        let expected = largest_received.map(|pn| pn.value + 1).unwrap_or(0);
        let win = 1u64 << (self.len * 8);
        let hwin = win / 2;
        let mask = win - 1;

        let candidate = (expected & !mask) | self.value;

        let value = if candidate + hwin <= expected && candidate < (1u64 << 62).saturating_sub(win)
        {
            candidate + win
        } else if candidate > expected + hwin && candidate >= win {
            candidate - win
        } else {
            candidate
        };

        PacketNumber {
            space: self.space,
            value,
        }
    }

    pub fn from_bytes(space: PacketNumberSpace, bytes: &[u8]) -> Self {
        let mut value = 0u64;
        for b in bytes {
            value = (value << 8) | (*b as u64);
        }
        Self {
            space,
            value,
            len: bytes.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pn(space: PacketNumberSpace, v: u64) -> PacketNumber {
        space.new_packet_number(VarInt::new(v).unwrap())
    }

    #[test]
    fn round_trips_when_larger_than_largest_acked() {
        // RFC 9001 §A.2's worked example: largest_acked = 0, packet number = 2
        let largest_acked = pn(PacketNumberSpace::Initial, 0);
        let packet_number = pn(PacketNumberSpace::Initial, 2);
        let truncated = packet_number.truncate(Some(largest_acked));
        assert_eq!(truncated.len(), 1);

        let expanded = truncated.expand(Some(largest_acked));
        assert_eq!(expanded, packet_number);
    }

    #[test]
    fn wide_gaps_need_more_bytes() {
        let largest_acked = pn(PacketNumberSpace::ApplicationData, 0);
        let packet_number = pn(PacketNumberSpace::ApplicationData, 100_000);
        let truncated = packet_number.truncate(Some(largest_acked));
        assert!(truncated.len() >= 3);
        assert_eq!(truncated.expand(Some(largest_acked)), packet_number);
    }

    #[test]
    fn no_largest_acked_uses_full_range() {
        let packet_number = pn(PacketNumberSpace::Initial, 0);
        let truncated = packet_number.truncate(None);
        assert_eq!(truncated.expand(None), packet_number);
    }
}
