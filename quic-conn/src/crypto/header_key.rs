// SPDX-License-Identifier: Apache-2.0

//! Header protection (RFC 9001 §5.4): masking the first-byte low bits and
//! the truncated packet number with a sample of the packet's own ciphertext.

use super::{CipherSuite, ProtectionError};
use core::fmt;

pub struct HeaderProtectionKey {
    key: ring::aead::quic::HeaderProtectionKey,
}

impl HeaderProtectionKey {
    pub(crate) fn new(suite: CipherSuite, key_bytes: &[u8]) -> Self {
        let key = ring::aead::quic::HeaderProtectionKey::new(suite.header_protection_algorithm(), key_bytes)
            .expect("header protection key length matches the cipher suite");
        Self { key }
    }

    pub fn sample_len(&self) -> usize {
        self.key.algorithm().sample_len()
    }

    /// Returns the 5-byte mask RFC 9001 §5.4.1 applies to the first byte and
    /// up to 4 packet-number bytes. The caller XORs it in; this type never
    /// sees the rest of the header.
    pub fn mask(&self, sample: &[u8]) -> Result<[u8; 5], ProtectionError> {
        self.key.new_mask(sample).map_err(|_| ProtectionError)
    }
}

impl fmt::Debug for HeaderProtectionKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("HeaderProtectionKey").finish()
    }
}
