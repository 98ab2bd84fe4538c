// SPDX-License-Identifier: Apache-2.0

//! AEAD packet protection (RFC 9001 §5.3): the payload is sealed/opened
//! under a nonce formed by XOR-ing the packet number into a fixed IV, with
//! the (still unprotected-at-this-layer) packet header as associated data.

use super::{CipherSuite, ProtectionError};
use alloc::vec::Vec;
use core::fmt;
use ring::aead;

pub struct PacketKey {
    key: aead::LessSafeKey,
    iv: [u8; aead::NONCE_LEN],
    suite: CipherSuite,
}

impl PacketKey {
    pub(crate) fn new(suite: CipherSuite, key_bytes: &[u8], iv: [u8; aead::NONCE_LEN]) -> Self {
        let unbound = aead::UnboundKey::new(suite.aead_algorithm(), key_bytes)
            .expect("packet key length matches the cipher suite");
        Self {
            key: aead::LessSafeKey::new(unbound),
            iv,
            suite,
        }
    }

    pub fn cipher_suite(&self) -> CipherSuite {
        self.suite
    }

    pub fn tag_len(&self) -> usize {
        self.key.algorithm().tag_len()
    }

    pub fn aead_confidentiality_limit(&self) -> u64 {
        self.suite.aead_confidentiality_limit()
    }

    pub fn aead_integrity_limit(&self) -> u64 {
        self.suite.aead_integrity_limit()
    }

    fn nonce_for(&self, packet_number: u64) -> aead::Nonce {
        let mut nonce = self.iv;
        let pn_bytes = packet_number.to_be_bytes();
        for (n, p) in nonce.iter_mut().rev().zip(pn_bytes.iter().rev()) {
            *n ^= p;
        }
        aead::Nonce::assume_unique_for_key(nonce)
    }

    /// Encrypts `payload` in place, appending the authentication tag.
    pub fn encrypt(&self, packet_number: u64, header: &[u8], payload: &mut Vec<u8>) -> Result<(), ProtectionError> {
        self.key
            .seal_in_place_append_tag(self.nonce_for(packet_number), aead::Aad::from(header), payload)
            .map_err(|_| ProtectionError)
    }

    /// Decrypts `payload` in place, truncating off the trailing tag on
    /// success. Leaves `payload` untouched on failure so the caller can
    /// still count it toward the integrity-failure limit.
    pub fn decrypt(&self, packet_number: u64, header: &[u8], payload: &mut Vec<u8>) -> Result<(), ProtectionError> {
        let plaintext_len = self
            .key
            .open_in_place(self.nonce_for(packet_number), aead::Aad::from(header), payload)
            .map_err(|_| ProtectionError)?
            .len();
        payload.truncate(plaintext_len);
        Ok(())
    }
}

impl fmt::Debug for PacketKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PacketKey").field("suite", &self.suite).finish()
    }
}
