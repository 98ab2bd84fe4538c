// SPDX-License-Identifier: Apache-2.0

//! Loss detection and congestion control primitives (RFC 9002). These are
//! deliberately stateless-per-call building blocks; `quic-conn` wires them
//! together per packet-number space into the actual recovery manager.

pub mod congestion_controller;
pub mod new_reno;
pub mod persistent_congestion;
pub mod pto;
pub mod rtt;
pub mod sent_packets;

pub use congestion_controller::CongestionController;
pub use new_reno::NewReno;
pub use persistent_congestion::{Calculator as PersistentCongestionCalculator, Period as PersistentCongestionPeriod};
pub use pto::PtoBackoff;
pub use rtt::RttEstimator;
pub use sent_packets::{SentPacketInfo, SentPackets};

/// RFC 9002 §6.1.1: packets more than this many behind the largest
/// acknowledged are considered lost.
pub const PACKET_THRESHOLD: u64 = 3;

/// RFC 9002 §6.1.2: `time_threshold = max(kTimeThreshold * max(smoothed_rtt,
/// latest_rtt), kGranularity)`, with `kTimeThreshold = 9/8`.
pub fn time_threshold(smoothed_rtt: core::time::Duration, latest_rtt: core::time::Duration) -> core::time::Duration {
    let rtt = smoothed_rtt.max(latest_rtt);
    (rtt * 9 / 8).max(crate::time::K_GRANULARITY)
}
