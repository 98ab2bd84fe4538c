// SPDX-License-Identifier: Apache-2.0

//! Packet and header protection (RFC 9001). This module never talks to a
//! TLS library directly: it turns secrets handed to it by the handshake
//! capability into the keys packet assembly needs, and nothing more.

mod header_key;
mod initial;
mod key_update;
mod packet_key;
mod retry;

pub use header_key::HeaderProtectionKey;
pub use initial::{initial_keys, InitialKeys};
pub use key_update::{KeyPhase, KeyPhaseLadder};
pub use packet_key::PacketKey;
pub use retry::{derive_retry_integrity_tag, RETRY_INTEGRITY_TAG_LEN};

use core::fmt;

/// A secret's derived packet-protection and header-protection keys, for
/// one direction of travel (what we encrypt with, or what we decrypt with).
pub struct DirectionalKeys {
    pub packet: PacketKey,
    pub header: HeaderProtectionKey,
}

/// Derives the "quic key"/"quic iv"/"quic hp" triple from a traffic secret
/// (RFC 9001 §5.1), the shared step between Initial secrets (derived here)
/// and Handshake/1-RTT secrets (handed to us by the TLS capability).
pub fn derive_directional_keys(suite: CipherSuite, secret: &ring::hkdf::Prk) -> DirectionalKeys {
    let mut key_bytes = [0u8; 32];
    let key_bytes = &mut key_bytes[..suite.key_len()];
    expand_label(secret, "quic key", &[], key_bytes);

    let mut iv = [0u8; ring::aead::NONCE_LEN];
    expand_label(secret, "quic iv", &[], &mut iv);

    let mut hp_bytes = [0u8; 32];
    let hp_bytes = &mut hp_bytes[..suite.key_len()];
    expand_label(secret, "quic hp", &[], hp_bytes);

    DirectionalKeys {
        packet: PacketKey::new(suite, key_bytes, iv),
        header: HeaderProtectionKey::new(suite, hp_bytes),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CipherSuite {
    Aes128Gcm,
    Aes256Gcm,
    Chacha20Poly1305,
}

impl CipherSuite {
    /// RFC 9001 §6.6: once a sender or receiver crosses either limit for a
    /// given key, it must stop using it (confidentiality) or close the
    /// connection (integrity).
    pub fn aead_confidentiality_limit(self) -> u64 {
        match self {
            CipherSuite::Aes128Gcm | CipherSuite::Aes256Gcm => 1 << 23,
            CipherSuite::Chacha20Poly1305 => u64::MAX,
        }
    }

    pub fn aead_integrity_limit(self) -> u64 {
        match self {
            CipherSuite::Aes128Gcm | CipherSuite::Aes256Gcm => 1 << 52,
            CipherSuite::Chacha20Poly1305 => 1 << 36,
        }
    }

    fn key_len(self) -> usize {
        match self {
            CipherSuite::Aes128Gcm => 16,
            CipherSuite::Aes256Gcm | CipherSuite::Chacha20Poly1305 => 32,
        }
    }

    fn aead_algorithm(self) -> &'static ring::aead::Algorithm {
        match self {
            CipherSuite::Aes128Gcm => &ring::aead::AES_128_GCM,
            CipherSuite::Aes256Gcm => &ring::aead::AES_256_GCM,
            CipherSuite::Chacha20Poly1305 => &ring::aead::CHACHA20_POLY1305,
        }
    }

    fn header_protection_algorithm(self) -> &'static ring::aead::quic::Algorithm {
        match self {
            CipherSuite::Aes128Gcm => &ring::aead::quic::AES_128,
            CipherSuite::Aes256Gcm => &ring::aead::quic::AES_256,
            CipherSuite::Chacha20Poly1305 => &ring::aead::quic::CHACHA20,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProtectionError;

impl fmt::Display for ProtectionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "packet protection failure")
    }
}

/// TLS 1.3's `HKDF-Expand-Label` (RFC 8446 §7.1), the primitive every QUIC
/// secret and key is derived through.
pub(crate) fn expand_label(secret: &ring::hkdf::Prk, label: &str, context: &[u8], out: &mut [u8]) {
    struct OutLen(usize);
    impl ring::hkdf::KeyType for OutLen {
        fn len(&self) -> usize {
            self.0
        }
    }

    let mut info = alloc::vec::Vec::with_capacity(2 + 1 + 6 + label.len() + 1 + context.len());
    info.extend_from_slice(&(out.len() as u16).to_be_bytes());
    let full_label_len = 6 + label.len();
    info.push(full_label_len as u8);
    info.extend_from_slice(b"tls13 ");
    info.extend_from_slice(label.as_bytes());
    info.push(context.len() as u8);
    info.extend_from_slice(context);

    let info_refs = [&info[..]];
    let okm = secret
        .expand(&info_refs, OutLen(out.len()))
        .expect("label length fits HKDF output limits");
    okm.fill(out).expect("output buffer length matches OutLen");
}
