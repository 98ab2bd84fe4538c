// SPDX-License-Identifier: Apache-2.0

//! Retry packet integrity protection (RFC 9001 §5.8). Unlike every other
//! QUIC key, the Retry key is fixed by the version, not derived from a
//! connection id: it exists to detect corruption and off-path tampering,
//! not to keep anything secret.

use ring::aead;

pub const RETRY_INTEGRITY_TAG_LEN: usize = 16;

const RETRY_INTEGRITY_KEY: [u8; 16] = [
    0xbe, 0x0c, 0x69, 0x0b, 0x9f, 0x66, 0x57, 0x5a, 0x1d, 0x76, 0x6b, 0x54, 0xe3, 0x68, 0xc8, 0x4e,
];
const RETRY_INTEGRITY_NONCE: [u8; 12] = [
    0x46, 0x15, 0x99, 0xd3, 0x5d, 0x63, 0x2b, 0xf2, 0x23, 0x98, 0x25, 0xbb,
];

/// Computes the 16-byte tag appended to a Retry packet: an AEAD seal over
/// an empty plaintext, with the original destination connection id
/// prepended to the rest of the Retry packet as associated data.
pub fn derive_retry_integrity_tag(original_destination_cid: &[u8], retry_packet_without_tag: &[u8]) -> [u8; RETRY_INTEGRITY_TAG_LEN] {
    let key = aead::UnboundKey::new(&aead::AES_128_GCM, &RETRY_INTEGRITY_KEY).expect("fixed-size key");
    let key = aead::LessSafeKey::new(key);
    let nonce = aead::Nonce::assume_unique_for_key(RETRY_INTEGRITY_NONCE);

    let mut aad = alloc::vec::Vec::with_capacity(1 + original_destination_cid.len() + retry_packet_without_tag.len());
    aad.push(original_destination_cid.len() as u8);
    aad.extend_from_slice(original_destination_cid);
    aad.extend_from_slice(retry_packet_without_tag);

    let mut tag_buf = alloc::vec::Vec::new();
    let tag = key
        .seal_in_place_separate_tag(nonce, aead::Aad::from(&aad), &mut tag_buf)
        .expect("empty plaintext always seals");

    let mut out = [0u8; RETRY_INTEGRITY_TAG_LEN];
    out.copy_from_slice(tag.as_ref());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_is_deterministic() {
        let dcid = [0x83, 0x94, 0xc8, 0xf0, 0x3e, 0x51, 0x57, 0x08];
        let packet = b"retry packet bytes before the tag";
        let a = derive_retry_integrity_tag(&dcid, packet);
        let b = derive_retry_integrity_tag(&dcid, packet);
        assert_eq!(a, b);
    }

    #[test]
    fn different_aad_yields_a_different_tag() {
        let dcid = [1, 2, 3, 4];
        let a = derive_retry_integrity_tag(&dcid, b"one packet");
        let b = derive_retry_integrity_tag(&dcid, b"a different packet");
        assert_ne!(a, b);
    }
}
