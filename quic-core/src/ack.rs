// SPDX-License-Identifier: Apache-2.0

//! Settings governing when and how an endpoint acknowledges packets
//! (RFC 9000 §13.2).

use crate::varint::VarInt;
use core::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Settings {
    /// The maximum amount of time by which this endpoint will delay sending
    /// an ACK for an ack-eliciting packet.
    pub max_ack_delay: Duration,
    /// The exponent used to scale `ack_delay` on the wire (RFC 9000 §18.2).
    pub ack_delay_exponent: u8,
    /// Number of ack-eliciting packets received before an ACK must be sent
    /// immediately, absent reordering.
    pub ack_elicitation_interval: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self::RECOMMENDED
    }
}

impl Settings {
    /// Used for the Initial/Handshake spaces, which must ack immediately.
    pub const EARLY: Self = Self {
        max_ack_delay: Duration::from_secs(0),
        ack_delay_exponent: 0,
        ack_elicitation_interval: 1,
    };

    pub const RECOMMENDED: Self = Self {
        max_ack_delay: Duration::from_millis(25),
        ack_delay_exponent: 3,
        ack_elicitation_interval: 2,
    };

    fn scale(&self) -> u64 {
        1u64 << self.ack_delay_exponent
    }

    /// Decodes a peer's `ack_delay` field into a `Duration`
    pub fn decode_ack_delay(&self, delay: VarInt) -> Duration {
        Duration::from_micros(delay.as_u64().saturating_mul(self.scale()))
    }

    /// Encodes a locally-measured delay as the wire `ack_delay` field
    pub fn encode_ack_delay(&self, delay: Duration) -> VarInt {
        let micros = delay.as_micros() as u64;
        VarInt::new(micros / self.scale()).unwrap_or(VarInt::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_delay_round_trips_within_scale_epsilon() {
        let settings = Settings::RECOMMENDED;
        let epsilon = settings.scale();
        for micros in (0..1000).map(|v| v * 100) {
            let delay = Duration::from_micros(micros);
            let encoded = settings.encode_ack_delay(delay);
            let decoded = settings.decode_ack_delay(encoded);
            let diff = (delay.as_micros() as i128 - decoded.as_micros() as i128).unsigned_abs();
            assert!(diff < epsilon as u128);
        }
    }
}
