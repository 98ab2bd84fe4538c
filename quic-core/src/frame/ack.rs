// SPDX-License-Identifier: Apache-2.0

//! ACK and ACK_ECN frames (RFC 9000 §19.3).

use super::tag;
use crate::varint::VarInt;
use quic_wire::{DecoderBuffer, DecoderBufferResult, Encoder, EncoderValue};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EcnCounts {
    pub ect0: VarInt,
    pub ect1: VarInt,
    pub ce: VarInt,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AckFrame {
    pub largest_acknowledged: VarInt,
    pub ack_delay: VarInt,
    /// `(gap, ack_range_length)` pairs as they appear on the wire, most
    /// recent range first. Reassembling these into a [`crate::interval_set::RangeSet`]
    /// is the caller's job once the packet-number space is known.
    pub ack_ranges: alloc::vec::Vec<(VarInt, VarInt)>,
    pub ecn_counts: Option<EcnCounts>,
}

impl AckFrame {
    pub fn decode(buffer: DecoderBuffer) -> DecoderBufferResult<Self> {
        let (raw_tag, buffer) = buffer.decode::<VarInt>()?;
        let has_ecn = raw_tag.as_u64() == tag::ACK_ECN;

        let (largest_acknowledged, buffer) = buffer.decode::<VarInt>()?;
        let (ack_delay, buffer) = buffer.decode::<VarInt>()?;
        let (range_count, mut buffer) = buffer.decode::<VarInt>()?;

        let (first_range, rest) = buffer.decode::<VarInt>()?;
        buffer = rest;
        let mut ack_ranges = alloc::vec![(VarInt::ZERO, first_range)];

        for _ in 0..range_count.as_u64() {
            let (gap, rest) = buffer.decode::<VarInt>()?;
            let (len, rest) = rest.decode::<VarInt>()?;
            ack_ranges.push((gap, len));
            buffer = rest;
        }

        let (ecn_counts, buffer) = if has_ecn {
            let (ect0, buffer) = buffer.decode::<VarInt>()?;
            let (ect1, buffer) = buffer.decode::<VarInt>()?;
            let (ce, buffer) = buffer.decode::<VarInt>()?;
            (Some(EcnCounts { ect0, ect1, ce }), buffer)
        } else {
            (None, buffer)
        };

        Ok((
            AckFrame {
                largest_acknowledged,
                ack_delay,
                ack_ranges,
                ecn_counts,
            },
            buffer,
        ))
    }

    pub fn encode<E: Encoder>(&self, encoder: &mut E) {
        let tag_value = if self.ecn_counts.is_some() {
            tag::ACK_ECN
        } else {
            tag::ACK
        };
        VarInt::from_u8(tag_value as u8).encode(encoder);
        self.largest_acknowledged.encode(encoder);
        self.ack_delay.encode(encoder);

        let range_count = self.ack_ranges.len().saturating_sub(1) as u64;
        VarInt::new(range_count).unwrap_or(VarInt::MAX).encode(encoder);

        // first range has no gap
        self.ack_ranges[0].1.encode(encoder);
        for (gap, len) in self.ack_ranges.iter().skip(1) {
            gap.encode(encoder);
            len.encode(encoder);
        }

        if let Some(ecn) = &self.ecn_counts {
            ecn.ect0.encode(encoder);
            ecn.ect1.encode(encoder);
            ecn.ce.encode(encoder);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quic_wire::EncoderBuffer;

    #[test]
    fn round_trips_without_ecn() {
        let frame = AckFrame {
            largest_acknowledged: VarInt::new(100).unwrap(),
            ack_delay: VarInt::new(10).unwrap(),
            ack_ranges: alloc::vec![(VarInt::ZERO, VarInt::new(5).unwrap()), (VarInt::new(2).unwrap(), VarInt::new(3).unwrap())],
            ecn_counts: None,
        };
        let mut storage = [0u8; 64];
        let mut encoder = EncoderBuffer::new(&mut storage);
        frame.encode(&mut encoder);
        let (decoded, remaining) = AckFrame::decode(DecoderBuffer::new(encoder.as_slice())).unwrap();
        assert_eq!(decoded, frame);
        assert!(remaining.is_empty());
    }

    #[test]
    fn round_trips_with_ecn() {
        let frame = AckFrame {
            largest_acknowledged: VarInt::new(1).unwrap(),
            ack_delay: VarInt::ZERO,
            ack_ranges: alloc::vec![(VarInt::ZERO, VarInt::ZERO)],
            ecn_counts: Some(EcnCounts {
                ect0: VarInt::new(1).unwrap(),
                ect1: VarInt::ZERO,
                ce: VarInt::ZERO,
            }),
        };
        let mut storage = [0u8; 64];
        let mut encoder = EncoderBuffer::new(&mut storage);
        frame.encode(&mut encoder);
        let (decoded, _) = AckFrame::decode(DecoderBuffer::new(encoder.as_slice())).unwrap();
        assert_eq!(decoded, frame);
    }
}
