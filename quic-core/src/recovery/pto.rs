// SPDX-License-Identifier: Apache-2.0

//! Probe timeout computation and backoff (RFC 9002 §6.2).

use super::rtt::RttEstimator;
use core::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PtoBackoff {
    exponent: u32,
}

impl Default for PtoBackoff {
    fn default() -> Self {
        Self { exponent: 0 }
    }
}

impl PtoBackoff {
    pub fn reset(&mut self) {
        self.exponent = 0;
    }

    pub fn double(&mut self) {
        self.exponent = self.exponent.saturating_add(1);
    }

    /// The number of consecutive, unacknowledged PTO expirations, used to
    /// detect persistent congestion.
    pub fn count(&self) -> u32 {
        self.exponent
    }

    /// `pto_period * 2^exponent`, per RFC 9002 §6.2.1.
    pub fn apply(&self, pto_period: Duration) -> Duration {
        pto_period.saturating_mul(1 << self.exponent.min(20))
    }
}

/// Computes the full PTO duration for a packet-number space, including the
/// peer's max_ack_delay contribution for spaces where acks may be delayed.
pub fn timeout(rtt: &RttEstimator, max_ack_delay: Duration, backoff: &PtoBackoff, include_max_ack_delay: bool) -> Duration {
    let mut period = rtt.pto_period();
    if include_max_ack_delay {
        period += max_ack_delay;
    }
    backoff.apply(period)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_each_expiration() {
        let mut backoff = PtoBackoff::default();
        let base = Duration::from_millis(100);
        assert_eq!(backoff.apply(base), base);
        backoff.double();
        assert_eq!(backoff.apply(base), base * 2);
        backoff.double();
        assert_eq!(backoff.apply(base), base * 4);
        backoff.reset();
        assert_eq!(backoff.apply(base), base);
    }
}
