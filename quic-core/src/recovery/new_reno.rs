// SPDX-License-Identifier: Apache-2.0

//! A NewReno-style congestion controller (RFC 9002 §7).

use super::congestion_controller::CongestionController;
use crate::time::Timestamp;

/// RFC 9002 §7.2: the larger of 2*max_datagram_size and 14720, capped at
/// 10*max_datagram_size.
fn initial_window(max_datagram_size: u64) -> u64 {
    (max_datagram_size * 2).max(14_720).min(max_datagram_size * 10)
}

const MINIMUM_WINDOW_DATAGRAMS: u64 = 2;
const LOSS_REDUCTION_FACTOR_NUM: u64 = 1;
const LOSS_REDUCTION_FACTOR_DEN: u64 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    SlowStart,
    CongestionAvoidance,
    Recovery { started_at: Timestamp },
}

pub struct NewReno {
    max_datagram_size: u64,
    congestion_window: u64,
    bytes_in_flight: u64,
    ssthresh: u64,
    state: State,
}

impl NewReno {
    pub fn new(max_datagram_size: u64) -> Self {
        Self {
            max_datagram_size,
            congestion_window: initial_window(max_datagram_size),
            bytes_in_flight: 0,
            ssthresh: u64::MAX,
            state: State::SlowStart,
        }
    }

    fn minimum_window(&self) -> u64 {
        self.max_datagram_size * MINIMUM_WINDOW_DATAGRAMS
    }

    fn in_recovery(&self, sent_time: Timestamp) -> bool {
        matches!(self.state, State::Recovery { started_at } if sent_time >= started_at)
    }
}

impl CongestionController for NewReno {
    fn congestion_window(&self) -> u64 {
        self.congestion_window
    }

    fn bytes_in_flight(&self) -> u64 {
        self.bytes_in_flight
    }

    fn on_packet_sent(&mut self, sent_bytes: u64, _now: Timestamp) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_add(sent_bytes);
    }

    fn on_packet_acked(&mut self, acked_bytes: u64, sent_time: Timestamp, _now: Timestamp, _rtt_ms: u64) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(acked_bytes);

        if self.in_recovery(sent_time) {
            return;
        }

        match self.state {
            State::SlowStart => {
                self.congestion_window += acked_bytes;
                if self.congestion_window >= self.ssthresh {
                    self.state = State::CongestionAvoidance;
                }
            }
            State::CongestionAvoidance => {
                self.congestion_window += self.max_datagram_size * acked_bytes / self.congestion_window;
            }
            State::Recovery { .. } => unreachable!("checked by in_recovery above"),
        }
    }

    fn on_packets_lost(&mut self, lost_bytes: u64, newest_lost_sent_time: Timestamp, now: Timestamp) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(lost_bytes);

        if self.in_recovery(newest_lost_sent_time) {
            return;
        }

        self.state = State::Recovery { started_at: now };
        self.ssthresh = (self.congestion_window * LOSS_REDUCTION_FACTOR_NUM / LOSS_REDUCTION_FACTOR_DEN)
            .max(self.minimum_window());
        self.congestion_window = self.ssthresh;
    }

    fn on_persistent_congestion(&mut self) {
        self.congestion_window = self.minimum_window();
        self.state = State::SlowStart;
        self.ssthresh = u64::MAX;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(nanos: u64) -> Timestamp {
        Timestamp::from_nanos(nanos)
    }

    #[test]
    fn slow_start_grows_window_on_every_ack() {
        let mut cc = NewReno::new(1200);
        let window_before = cc.congestion_window();
        cc.on_packet_sent(1200, ts(1));
        cc.on_packet_acked(1200, ts(1), ts(2), 10);
        assert!(cc.congestion_window() > window_before);
    }

    #[test]
    fn loss_halves_the_window_and_enters_recovery() {
        let mut cc = NewReno::new(1200);
        cc.on_packet_sent(1200, ts(1));
        let window_before = cc.congestion_window();
        cc.on_packets_lost(1200, ts(1), ts(2));
        assert!(cc.congestion_window() < window_before);
    }

    #[test]
    fn persistent_congestion_collapses_to_minimum_window() {
        let mut cc = NewReno::new(1200);
        cc.on_persistent_congestion();
        assert_eq!(cc.congestion_window(), 1200 * 2);
    }
}
