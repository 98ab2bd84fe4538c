// SPDX-License-Identifier: Apache-2.0

//! Persistent congestion detection (RFC 9002 §7.6).

use crate::time::Timestamp;
use core::time::Duration;

/// A contiguous span of lost, in-flight, ack-eliciting packets bounded by
/// their send times.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Period {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Period {
    pub fn duration(&self) -> Duration {
        self.end.checked_sub(self.start).unwrap_or(Duration::ZERO)
    }
}

/// Accumulates consecutive lost-packet periods and reports whether any of
/// them is long enough to qualify as persistent congestion, per the
/// threshold in RFC 9002 §7.6.2:
/// `(smoothed_rtt + max(4*rttvar, kGranularity) + max_ack_delay) * kPersistentCongestionThreshold`.
pub struct Calculator {
    threshold: Duration,
    current: Option<Period>,
    longest: Duration,
}

const PERSISTENT_CONGESTION_THRESHOLD: u32 = 3;

impl Calculator {
    pub fn new(pto: Duration) -> Self {
        Self {
            threshold: pto.saturating_mul(PERSISTENT_CONGESTION_THRESHOLD),
            current: None,
            longest: Duration::ZERO,
        }
    }

    /// Call once per packet, in ascending packet-number order, with
    /// `Some(sent_time)` for each lost, ack-eliciting, in-flight packet and
    /// `None` for every acknowledged or non-ack-eliciting packet, which
    /// breaks the contiguous run.
    pub fn on_packet(&mut self, lost_sent_time: Option<Timestamp>) {
        match (lost_sent_time, &mut self.current) {
            (Some(t), Some(period)) => period.end = t,
            (Some(t), None) => self.current = Some(Period { start: t, end: t }),
            (None, Some(period)) => {
                self.longest = self.longest.max(period.duration());
                self.current = None;
            }
            (None, None) => {}
        }
    }

    pub fn finish(mut self) -> bool {
        if let Some(period) = self.current.take() {
            self.longest = self.longest.max(period.duration());
        }
        self.longest >= self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(nanos: u64) -> Timestamp {
        Timestamp::from_nanos(nanos)
    }

    #[test]
    fn detects_a_sufficiently_long_contiguous_loss() {
        let mut calc = Calculator::new(Duration::from_millis(100));
        calc.on_packet(Some(ts(1_000_000)));
        calc.on_packet(Some(ts(1_000_000 + 400_000_000)));
        assert!(calc.finish());
    }

    #[test]
    fn an_ack_in_the_middle_resets_the_run() {
        let mut calc = Calculator::new(Duration::from_millis(100));
        calc.on_packet(Some(ts(1_000_000)));
        calc.on_packet(None);
        calc.on_packet(Some(ts(1_000_000 + 400_000_000)));
        assert!(!calc.finish());
    }
}
