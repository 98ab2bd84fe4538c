// SPDX-License-Identifier: Apache-2.0

//! The 1-RTT key update ladder (RFC 9001 §6). The header protection key
//! never changes after the handshake; only the packet-protection secret is
//! rotated, so a peeked key phase bit is enough to detect an update before
//! the payload is even decrypted.

use super::{expand_label, CipherSuite, PacketKey, ProtectionError};
use ring::{aead, hkdf};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyPhase {
    Zero,
    One,
}

impl KeyPhase {
    pub fn from_bit(bit: bool) -> Self {
        if bit {
            Self::One
        } else {
            Self::Zero
        }
    }

    pub fn bit(self) -> bool {
        matches!(self, Self::One)
    }

    pub fn next(self) -> Self {
        match self {
            Self::Zero => Self::One,
            Self::One => Self::Zero,
        }
    }
}

fn derive_next_secret(suite: CipherSuite, secret: &[u8; 32]) -> [u8; 32] {
    let prk = hkdf::Prk::new_less_safe(hkdf::HKDF_SHA256, secret);
    let mut next = [0u8; 32];
    expand_label(&prk, "quic ku", &[], &mut next);
    let _ = suite;
    next
}

fn derive_packet_key(suite: CipherSuite, secret: &[u8; 32]) -> PacketKey {
    let prk = hkdf::Prk::new_less_safe(hkdf::HKDF_SHA256, secret);
    let mut key_bytes = alloc::vec![0u8; suite.key_len()];
    expand_label(&prk, "quic key", &[], &mut key_bytes);
    let mut iv = [0u8; aead::NONCE_LEN];
    expand_label(&prk, "quic iv", &[], &mut iv);
    PacketKey::new(suite, &key_bytes, iv)
}

/// One direction's (sealing or opening) view of the key-update ladder: the
/// active key for the current phase and the pre-derived key for the next
/// one, so a key update never has to derive under time pressure.
pub struct KeyPhaseLadder {
    suite: CipherSuite,
    phase: KeyPhase,
    current_secret: [u8; 32],
    current: PacketKey,
    next_secret: [u8; 32],
    next: PacketKey,
    /// Lowest packet number accepted under the current phase's key; a
    /// packet number at or below this under the *other* phase is a replay,
    /// not a legitimate update (RFC 9001 §6.4).
    min_received_in_phase: Option<u64>,
    integrity_failures: u64,
}

impl KeyPhaseLadder {
    pub fn new(suite: CipherSuite, initial_secret: [u8; 32]) -> Self {
        let current = derive_packet_key(suite, &initial_secret);
        let next_secret = derive_next_secret(suite, &initial_secret);
        let next = derive_packet_key(suite, &next_secret);
        Self {
            suite,
            phase: KeyPhase::Zero,
            current_secret: initial_secret,
            current,
            next_secret,
            next,
            min_received_in_phase: None,
            integrity_failures: 0,
        }
    }

    pub fn phase(&self) -> KeyPhase {
        self.phase
    }

    pub fn active_key(&self) -> &PacketKey {
        &self.current
    }

    /// Selects the key to open an incoming packet with, given the phase bit
    /// observed in its (already header-unprotected) first byte. Returns the
    /// key and whether accepting this packet completes a key update.
    pub fn opener_for(&self, packet_number: u64, observed_phase: KeyPhase) -> (&PacketKey, bool) {
        if observed_phase == self.phase {
            (&self.current, false)
        } else {
            let is_update = self
                .min_received_in_phase
                .map_or(true, |floor| packet_number > floor);
            (&self.next, is_update)
        }
    }

    /// Commits an update detected by `opener_for`, rotating the ladder and
    /// pre-deriving the new next-phase key.
    pub fn complete_update(&mut self, accepted_packet_number: u64) {
        self.phase = self.phase.next();
        self.current_secret = self.next_secret;
        self.current = derive_packet_key(self.suite, &self.current_secret);
        self.next_secret = derive_next_secret(self.suite, &self.current_secret);
        self.next = derive_packet_key(self.suite, &self.next_secret);
        self.min_received_in_phase = Some(accepted_packet_number);
        self.integrity_failures = 0;
    }

    pub fn on_integrity_failure(&mut self) -> Result<(), ProtectionError> {
        self.integrity_failures += 1;
        if self.integrity_failures >= self.suite.aead_integrity_limit() {
            Err(ProtectionError)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_in_phase_zero() {
        let ladder = KeyPhaseLadder::new(CipherSuite::Aes128Gcm, [7u8; 32]);
        assert_eq!(ladder.phase(), KeyPhase::Zero);
    }

    #[test]
    fn matching_phase_selects_current_key_without_update() {
        let ladder = KeyPhaseLadder::new(CipherSuite::Aes128Gcm, [7u8; 32]);
        let (_key, is_update) = ladder.opener_for(5, KeyPhase::Zero);
        assert!(!is_update);
    }

    #[test]
    fn flipped_phase_above_the_floor_is_an_update() {
        let ladder = KeyPhaseLadder::new(CipherSuite::Aes128Gcm, [7u8; 32]);
        let (_key, is_update) = ladder.opener_for(5, KeyPhase::One);
        assert!(is_update);
    }

    #[test]
    fn completing_an_update_flips_the_phase() {
        let mut ladder = KeyPhaseLadder::new(CipherSuite::Aes128Gcm, [7u8; 32]);
        ladder.complete_update(10);
        assert_eq!(ladder.phase(), KeyPhase::One);
    }

    #[test]
    fn integrity_failures_trip_the_limit() {
        let mut ladder = KeyPhaseLadder::new(CipherSuite::Chacha20Poly1305, [7u8; 32]);
        ladder.integrity_failures = ladder.suite.aead_integrity_limit() - 1;
        assert!(ladder.on_integrity_failure().is_err());
    }

    #[test]
    fn failures_below_the_limit_are_tolerated() {
        let mut ladder = KeyPhaseLadder::new(CipherSuite::Chacha20Poly1305, [7u8; 32]);
        assert!(ladder.on_integrity_failure().is_ok());
    }
}
