// SPDX-License-Identifier: Apache-2.0

//! Wires quic-core's recovery primitives together for a single packet
//! number space: tracks in-flight packets, arms the loss and PTO timers,
//! and feeds acknowledgments into the RTT estimator and congestion
//! controller.

use quic_core::{
    packet::{PacketNumber, PacketNumberSpace},
    recovery::{self, CongestionController, NewReno, PtoBackoff, RttEstimator, SentPacketInfo, SentPackets},
    time::{Timer, Timestamp},
};
use alloc::vec::Vec;
use core::time::Duration;

pub struct LossRecovery {
    space: PacketNumberSpace,
    sent: SentPackets,
    largest_acked: Option<PacketNumber>,
    largest_acked_sent_time: Option<Timestamp>,
    loss_timer: Timer,
    pto_backoff: PtoBackoff,
    pto_timer: Timer,
}

impl LossRecovery {
    pub fn new(space: PacketNumberSpace) -> Self {
        Self {
            space,
            sent: SentPackets::new(),
            largest_acked: None,
            largest_acked_sent_time: None,
            loss_timer: Timer::default(),
            pto_backoff: PtoBackoff::default(),
            pto_timer: Timer::default(),
        }
    }

    pub fn on_packet_sent(
        &mut self,
        packet_number: PacketNumber,
        sent_bytes: u64,
        is_ack_eliciting: bool,
        is_congestion_controlled: bool,
        now: Timestamp,
        congestion_controller: &mut dyn CongestionController,
    ) {
        self.sent.on_packet_sent(
            packet_number,
            SentPacketInfo {
                sent_time: now,
                sent_bytes,
                is_ack_eliciting,
                is_congestion_controlled,
            },
        );
        if is_congestion_controlled {
            congestion_controller.on_packet_sent(sent_bytes, now);
        }
    }

    /// Processes a received ACK frame's ranges against this space's
    /// in-flight packets. Returns the newly-lost packets so the caller can
    /// requeue their frames for retransmission.
    pub fn on_ack_received(
        &mut self,
        ranges: &[(u64, u64)],
        ack_delay: Duration,
        now: Timestamp,
        is_handshake_confirmed: bool,
        rtt: &mut RttEstimator,
        congestion_controller: &mut NewReno,
    ) -> Vec<(PacketNumber, SentPacketInfo)> {
        let mut newly_acked = Vec::new();
        let mut largest_newly_acked: Option<(PacketNumber, SentPacketInfo)> = None;

        for &(start, end) in ranges {
            for pn in start..end {
                let packet_number = self
                    .space
                    .new_packet_number(quic_core::varint::VarInt::new(pn).expect("ack range within varint bounds"));
                if let Some(info) = self.sent.remove(packet_number) {
                    let is_largest = largest_newly_acked.as_ref().map_or(true, |(p, _)| packet_number > *p);
                    if is_largest {
                        largest_newly_acked = Some((packet_number, info.clone()));
                    }
                    newly_acked.push((packet_number, info));
                }
            }
        }

        if let Some((packet_number, info)) = &largest_newly_acked {
            let is_new_largest = self.largest_acked.map_or(true, |largest| *packet_number > largest);
            if is_new_largest {
                self.largest_acked = Some(*packet_number);
                self.largest_acked_sent_time = Some(info.sent_time);
                if let Some(sample) = now.checked_sub(info.sent_time) {
                    rtt.update(sample, ack_delay, is_handshake_confirmed);
                }
            }
        }

        let rtt_ms = rtt.latest_rtt().as_millis() as u64;
        for (_, info) in &newly_acked {
            if info.is_congestion_controlled {
                congestion_controller.on_packet_acked(info.sent_bytes, info.sent_time, now, rtt_ms);
            }
        }

        self.pto_backoff.reset();
        newly_acked
    }

    /// Detects and removes packets lost per RFC 9002 §6.1, updating the
    /// congestion controller and re-arming the loss timer for any packets
    /// still only suspected (not yet past the time threshold).
    pub fn detect_losses(
        &mut self,
        now: Timestamp,
        rtt: &RttEstimator,
        congestion_controller: &mut NewReno,
    ) -> Vec<(PacketNumber, SentPacketInfo)> {
        let (largest_acked, largest_acked_sent_time) = match (self.largest_acked, self.largest_acked_sent_time) {
            (Some(a), Some(b)) => (a, b),
            _ => return Vec::new(),
        };

        let time_threshold = recovery::time_threshold(rtt.smoothed_rtt(), rtt.latest_rtt());
        let lost = self.sent.detect_and_remove_lost(
            self.space,
            largest_acked.as_u64(),
            largest_acked_sent_time,
            recovery::PACKET_THRESHOLD,
            time_threshold,
        );

        if let Some((_, newest_lost)) = lost.iter().max_by_key(|(_, info)| info.sent_time) {
            if newest_lost.is_congestion_controlled {
                let newest_lost_sent_time = newest_lost.sent_time;
                for (_, info) in &lost {
                    if info.is_congestion_controlled {
                        congestion_controller.on_packets_lost(info.sent_bytes, newest_lost_sent_time, now);
                    }
                }
            }
        }

        self.loss_timer.cancel();
        if !self.sent.is_empty() {
            if let Some(oldest) = self.sent.iter().map(|(_, info)| info.sent_time).min() {
                self.loss_timer.set(oldest + time_threshold);
            }
        }

        lost
    }

    pub fn arm_pto(&mut self, now: Timestamp, rtt: &RttEstimator, max_ack_delay: Duration) {
        let timeout = recovery::pto::timeout(rtt, max_ack_delay, &self.pto_backoff, true);
        self.pto_timer.set(now + timeout);
    }

    pub fn on_pto_expired(&mut self) {
        self.pto_backoff.double();
        self.pto_timer.cancel();
    }

    pub fn has_in_flight(&self) -> bool {
        !self.sent.is_empty()
    }

    /// The largest packet number the peer has acknowledged in this space,
    /// used to shorten the packet number on the wire (RFC 9000 §17.1).
    pub fn largest_acked(&self) -> Option<PacketNumber> {
        self.largest_acked
    }

    pub fn loss_timer(&self) -> &Timer {
        &self.loss_timer
    }

    pub fn pto_timer(&self) -> &Timer {
        &self.pto_timer
    }

    pub fn pto_backoff(&self) -> &PtoBackoff {
        &self.pto_backoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quic_core::varint::VarInt;

    fn ts(nanos: u64) -> Timestamp {
        Timestamp::from_nanos(nanos)
    }

    #[test]
    fn acking_a_sent_packet_removes_it_from_flight() {
        let mut recovery = LossRecovery::new(PacketNumberSpace::ApplicationData);
        let mut cc = NewReno::new(1200);
        let pn = PacketNumberSpace::ApplicationData.new_packet_number(VarInt::ZERO);
        recovery.on_packet_sent(pn, 100, true, true, ts(1_000_000), &mut cc);
        assert!(recovery.has_in_flight());

        let mut rtt = RttEstimator::new(Duration::from_millis(25));
        recovery.on_ack_received(&[(0, 1)], Duration::ZERO, ts(2_000_000), true, &mut rtt, &mut cc);
        assert!(!recovery.has_in_flight());
    }

    #[test]
    fn unacked_packets_beyond_the_threshold_are_declared_lost() {
        let mut recovery = LossRecovery::new(PacketNumberSpace::ApplicationData);
        let mut cc = NewReno::new(1200);
        let rtt = RttEstimator::new(Duration::from_millis(25));

        let old = PacketNumberSpace::ApplicationData.new_packet_number(VarInt::ZERO);
        recovery.on_packet_sent(old, 100, true, true, ts(1_000_000), &mut cc);

        for i in 1..=3u64 {
            let pn = PacketNumberSpace::ApplicationData.new_packet_number(VarInt::new(i).unwrap());
            recovery.on_packet_sent(pn, 100, true, true, ts(1_000_000 + i), &mut cc);
        }

        recovery.largest_acked = Some(PacketNumberSpace::ApplicationData.new_packet_number(VarInt::new(3).unwrap()));
        recovery.largest_acked_sent_time = Some(ts(1_000_003));

        let lost = recovery.detect_losses(ts(2_000_000_000), &rtt, &mut cc);
        assert!(lost.iter().any(|(pn, _)| *pn == old));
    }
}
