// SPDX-License-Identifier: Apache-2.0

//! Per-packet-number-space bookkeeping: the next packet number to send,
//! the set of packet numbers received (for ACK generation), and the
//! policy deciding when an ACK frame is actually worth sending.

use quic_core::{
    interval_set::RangeSet,
    packet::{PacketNumber, PacketNumberSpace},
    time::{Timestamp, K_GRANULARITY},
    varint::VarInt,
};
use core::time::Duration;

/// RFC 9000 §13.2.1: an endpoint sends an ACK for every Initial/Handshake
/// packet immediately, but bundles 1-RTT ACKs to avoid sending one per
/// received packet.
const MAX_UNACKED_APPLICATION_PACKETS: u32 = 2;

pub struct AckTracker {
    space: PacketNumberSpace,
    received: RangeSet,
    largest_received: Option<PacketNumber>,
    largest_received_time: Option<Timestamp>,
    ack_eliciting_since_last_ack: u32,
    max_ack_delay: Duration,
    ack_deadline: Option<Timestamp>,
    /// Packet numbers at or below this have been fully acknowledged by us
    /// and discarded from `received` to bound memory.
    discard_floor: u64,
}

impl AckTracker {
    pub fn new(space: PacketNumberSpace, max_ack_delay: Duration) -> Self {
        Self {
            space,
            received: RangeSet::with_limit(256),
            largest_received: None,
            largest_received_time: None,
            ack_eliciting_since_last_ack: 0,
            max_ack_delay,
            ack_deadline: None,
            discard_floor: 0,
        }
    }

    pub fn on_packet_received(&mut self, packet_number: PacketNumber, is_ack_eliciting: bool, now: Timestamp) {
        debug_assert_eq!(packet_number.space(), self.space);
        self.received.insert_value(packet_number.as_u64());

        let is_largest = self.largest_received.map_or(true, |largest| packet_number > largest);
        if is_largest {
            self.largest_received = Some(packet_number);
            self.largest_received_time = Some(now);
        }

        if !is_ack_eliciting {
            return;
        }
        self.ack_eliciting_since_last_ack += 1;

        let is_out_of_order = !is_largest;
        let immediate = matches!(self.space, PacketNumberSpace::Initial | PacketNumberSpace::Handshake)
            || self.ack_eliciting_since_last_ack >= MAX_UNACKED_APPLICATION_PACKETS
            || is_out_of_order;

        self.ack_deadline = Some(if immediate {
            now
        } else {
            now + self.max_ack_delay.saturating_sub(K_GRANULARITY)
        });
    }

    pub fn ack_deadline(&self) -> Option<Timestamp> {
        self.ack_deadline
    }

    pub fn should_send_ack(&self, now: Timestamp) -> bool {
        self.ack_deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Builds the data an ACK frame encoder needs: largest acknowledged,
    /// the delay since that packet arrived, and the coalesced ranges in
    /// highest-to-lowest order as RFC 9000 §19.3 requires on the wire.
    pub fn ack_frame_data(&self, now: Timestamp, ack_delay_exponent: u8) -> Option<AckFrameData> {
        let largest = self.largest_received?;
        let largest_time = self.largest_received_time?;
        let delay = now.checked_sub(largest_time).unwrap_or(Duration::ZERO);
        let ack_delay = VarInt::new((delay.as_micros() as u64) >> ack_delay_exponent).unwrap_or(VarInt::MAX);

        Some(AckFrameData {
            largest_acknowledged: largest.as_varint(),
            ack_delay,
            ranges: self.received.iter_rev().collect(),
        })
    }

    pub fn on_ack_sent(&mut self, now: Timestamp) {
        self.ack_eliciting_since_last_ack = 0;
        self.ack_deadline = None;
        let _ = now;
    }

    /// Drops received-packet state below `floor`; called once the space is
    /// retired or the local loss-recovery state no longer needs to
    /// distinguish old duplicates from new ones below that point.
    pub fn discard_below(&mut self, floor: u64) {
        self.discard_floor = self.discard_floor.max(floor);
        self.received.remove_below(self.discard_floor);
    }

    pub fn has_received(&self, packet_number: u64) -> bool {
        packet_number < self.discard_floor || self.received.contains(packet_number)
    }

    pub fn largest_received(&self) -> Option<PacketNumber> {
        self.largest_received
    }
}

pub struct AckFrameData {
    pub largest_acknowledged: VarInt,
    pub ack_delay: VarInt,
    pub ranges: alloc::vec::Vec<quic_core::interval_set::Range>,
}

/// The send-side counterpart: the next packet number to assign in this
/// space. Packet numbers never repeat or go backwards within a space.
pub struct PacketNumberAllocator {
    space: PacketNumberSpace,
    next: u64,
}

impl PacketNumberAllocator {
    pub fn new(space: PacketNumberSpace) -> Self {
        Self { space, next: 0 }
    }

    pub fn allocate(&mut self) -> PacketNumber {
        let pn = self.space.new_packet_number(VarInt::new(self.next).expect("packet number space exhausted"));
        self.next += 1;
        pn
    }

    pub fn peek_next(&self) -> u64 {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quic_core::time::Timestamp;

    fn ts(nanos: u64) -> Timestamp {
        Timestamp::from_nanos(nanos)
    }

    #[test]
    fn initial_space_acks_immediately() {
        let mut tracker = AckTracker::new(PacketNumberSpace::Initial, Duration::from_millis(25));
        let pn = PacketNumberSpace::Initial.new_packet_number(VarInt::from_u8(0));
        tracker.on_packet_received(pn, true, ts(1_000_000));
        assert!(tracker.should_send_ack(ts(1_000_000)));
    }

    #[test]
    fn application_space_waits_for_a_second_packet() {
        let mut tracker = AckTracker::new(PacketNumberSpace::ApplicationData, Duration::from_millis(25));
        let pn0 = PacketNumberSpace::ApplicationData.new_packet_number(VarInt::from_u8(0));
        tracker.on_packet_received(pn0, true, ts(1_000_000));
        assert!(!tracker.should_send_ack(ts(1_000_000)));

        let pn1 = PacketNumberSpace::ApplicationData.new_packet_number(VarInt::from_u8(1));
        tracker.on_packet_received(pn1, true, ts(1_000_001));
        assert!(tracker.should_send_ack(ts(1_000_001)));
    }

    #[test]
    fn out_of_order_packet_forces_an_immediate_ack() {
        let mut tracker = AckTracker::new(PacketNumberSpace::ApplicationData, Duration::from_millis(25));
        let pn5 = PacketNumberSpace::ApplicationData.new_packet_number(VarInt::from_u8(5));
        tracker.on_packet_received(pn5, true, ts(1_000_000));
        tracker.on_ack_sent(ts(1_000_000));

        let pn2 = PacketNumberSpace::ApplicationData.new_packet_number(VarInt::from_u8(2));
        tracker.on_packet_received(pn2, true, ts(1_000_001));
        assert!(tracker.should_send_ack(ts(1_000_001)));
    }

    #[test]
    fn allocator_hands_out_increasing_numbers() {
        let mut allocator = PacketNumberAllocator::new(PacketNumberSpace::ApplicationData);
        assert_eq!(allocator.allocate().as_u64(), 0);
        assert_eq!(allocator.allocate().as_u64(), 1);
    }
}
