// SPDX-License-Identifier: Apache-2.0

//! The per-space record of sent, not-yet-acknowledged packets that loss
//! detection (RFC 9002 §6.1) walks to find newly-lost packets.

use crate::packet::PacketNumber;
use crate::time::Timestamp;
use alloc::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentPacketInfo {
    pub sent_time: Timestamp,
    pub sent_bytes: u64,
    pub is_ack_eliciting: bool,
    pub is_congestion_controlled: bool,
}

#[derive(Default)]
pub struct SentPackets {
    packets: BTreeMap<u64, SentPacketInfo>,
}

impl SentPackets {
    pub fn new() -> Self {
        Self {
            packets: BTreeMap::new(),
        }
    }

    pub fn on_packet_sent(&mut self, packet_number: PacketNumber, info: SentPacketInfo) {
        self.packets.insert(packet_number.as_u64(), info);
    }

    pub fn get(&self, packet_number: PacketNumber) -> Option<&SentPacketInfo> {
        self.packets.get(&packet_number.as_u64())
    }

    pub fn remove(&mut self, packet_number: PacketNumber) -> Option<SentPacketInfo> {
        self.packets.remove(&packet_number.as_u64())
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// RFC 9002 §6.1: packets below `largest_acked - packet_threshold`, or
    /// sent at least `time_threshold` before the newest acknowledged
    /// packet's send time, are declared lost.
    pub fn detect_and_remove_lost<'a>(
        &'a mut self,
        space: crate::packet::PacketNumberSpace,
        largest_acked: u64,
        largest_acked_sent_time: Timestamp,
        packet_threshold: u64,
        time_threshold: core::time::Duration,
    ) -> alloc::vec::Vec<(PacketNumber, SentPacketInfo)> {
        let mut lost = alloc::vec::Vec::new();
        let loss_time_cutoff = largest_acked_sent_time.checked_sub_duration(time_threshold);

        let lost_numbers: alloc::vec::Vec<u64> = self
            .packets
            .iter()
            .filter(|(&pn, info)| {
                let below_packet_threshold =
                    largest_acked >= packet_threshold && pn <= largest_acked - packet_threshold;
                let below_time_threshold = loss_time_cutoff
                    .map(|cutoff| info.sent_time <= cutoff)
                    .unwrap_or(false);
                (pn < largest_acked) && (below_packet_threshold || below_time_threshold)
            })
            .map(|(&pn, _)| pn)
            .collect();

        for pn in lost_numbers {
            if let Some(info) = self.packets.remove(&pn) {
                lost.push((space.new_packet_number(crate::varint::VarInt::new(pn).unwrap()), info));
            }
        }

        lost
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &SentPacketInfo)> {
        self.packets.iter().map(|(&pn, info)| (pn, info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketNumberSpace;
    use crate::varint::VarInt;
    use core::time::Duration;

    fn pn(space: PacketNumberSpace, v: u64) -> PacketNumber {
        space.new_packet_number(VarInt::new(v).unwrap())
    }

    fn info(sent_time: Timestamp) -> SentPacketInfo {
        SentPacketInfo {
            sent_time,
            sent_bytes: 100,
            is_ack_eliciting: true,
            is_congestion_controlled: true,
        }
    }

    #[test]
    fn packet_threshold_marks_old_packets_lost() {
        let space = PacketNumberSpace::ApplicationData;
        let mut sent = SentPackets::new();
        for i in 0..5 {
            sent.on_packet_sent(pn(space, i), info(Timestamp::from_nanos(1 + i)));
        }
        let lost = sent.detect_and_remove_lost(space, 4, Timestamp::from_nanos(1000), 3, Duration::from_secs(100));
        assert_eq!(lost.len(), 1);
        assert_eq!(lost[0].0, pn(space, 0));
    }
}
