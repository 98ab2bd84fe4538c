// SPDX-License-Identifier: Apache-2.0

//! The pluggable interface a congestion controller implements, so the loss
//! recovery manager in `quic-conn` can stay agnostic to the algorithm.

use crate::time::Timestamp;

pub trait CongestionController {
    /// Bytes currently permitted to be in flight.
    fn congestion_window(&self) -> u64;

    fn bytes_in_flight(&self) -> u64;

    fn is_congestion_limited(&self) -> bool {
        self.bytes_in_flight() >= self.congestion_window()
    }

    fn on_packet_sent(&mut self, sent_bytes: u64, now: Timestamp);

    fn on_packet_acked(&mut self, acked_bytes: u64, sent_time: Timestamp, now: Timestamp, rtt_ms: u64);

    fn on_packets_lost(&mut self, lost_bytes: u64, newest_lost_sent_time: Timestamp, now: Timestamp);

    fn on_persistent_congestion(&mut self);
}
