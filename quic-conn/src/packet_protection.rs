// SPDX-License-Identifier: Apache-2.0

//! Header protection removal and application (RFC 9001 §5.4), shared by
//! every packet-number space: once the structural header fields are parsed,
//! unmasking the first byte's low bits and the truncated packet number
//! follows the same recipe whether the header was long or short form.

use crate::crypto::{HeaderProtectionKey, ProtectionError};

/// How many low bits of the first byte header protection covers: 4 for
/// long headers (RFC 9000 §17.2), 5 for short headers (§17.3.1).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderForm {
    Long,
    Short,
}

impl HeaderForm {
    fn first_byte_mask(self) -> u8 {
        match self {
            HeaderForm::Long => 0x0f,
            HeaderForm::Short => 0x1f,
        }
    }
}

/// Removes header protection in place. `pn_offset` is the index into
/// `packet` of the first (still-protected) packet number byte; `packet`
/// must have at least 4 bytes after `pn_offset` for the sample, which RFC
/// 9001 §5.4.2 guarantees by requiring the packet be padded if necessary.
///
/// On success, returns the unmasked first byte and the packet number bytes
/// unmasked in place; the caller reads `pn_len` from the first byte's low
/// 2 bits to know how many of them to consume.
pub fn remove_header_protection(
    header_key: &HeaderProtectionKey,
    form: HeaderForm,
    packet: &mut [u8],
    pn_offset: usize,
) -> Result<u8, ProtectionError> {
    let sample_len = header_key.sample_len();
    let sample_offset = pn_offset + 4;
    if packet.len() < sample_offset + sample_len {
        return Err(ProtectionError);
    }

    let mask = header_key.mask(&packet[sample_offset..sample_offset + sample_len])?;

    packet[0] ^= mask[0] & form.first_byte_mask();
    let pn_len = (packet[0] & 0x03) as usize + 1;
    for i in 0..pn_len {
        packet[pn_offset + i] ^= mask[1 + i];
    }

    Ok(packet[0])
}

/// Applies header protection in place, the sending-side inverse. `packet`
/// must already contain the sealed payload so the sample can be taken from
/// real ciphertext, and the first byte's unprotected low bits and
/// packet-number bytes must still be in cleartext.
pub fn apply_header_protection(
    header_key: &HeaderProtectionKey,
    form: HeaderForm,
    packet: &mut [u8],
    pn_offset: usize,
    pn_len: usize,
) -> Result<(), ProtectionError> {
    let sample_len = header_key.sample_len();
    let sample_offset = pn_offset + 4;
    if packet.len() < sample_offset + sample_len {
        return Err(ProtectionError);
    }

    let mask = header_key.mask(&packet[sample_offset..sample_offset + sample_len])?;

    packet[0] ^= mask[0] & form.first_byte_mask();
    for i in 0..pn_len {
        packet[pn_offset + i] ^= mask[1 + i];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{initial_keys, DirectionalKeys};

    fn keys() -> DirectionalKeys {
        initial_keys(&[0x83, 0x94, 0xc8, 0xf0, 0x3e, 0x51, 0x57, 0x08]).client
    }

    #[test]
    fn protect_then_remove_recovers_the_original_first_byte_and_pn() {
        let directional = keys();
        let mut packet = alloc::vec![0u8; 32];
        packet[0] = 0xc3; // long header, pn_len bits = 11 -> 4-byte pn
        packet[1..5].copy_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd]);
        for (i, byte) in packet.iter_mut().enumerate().skip(5) {
            *byte = i as u8;
        }
        let original_first_byte = packet[0];
        let original_pn = packet[1..5].to_vec();

        apply_header_protection(&directional.header, HeaderForm::Long, &mut packet, 1, 4).unwrap();
        assert_ne!(packet[0], original_first_byte);

        let unmasked_first_byte = remove_header_protection(&directional.header, HeaderForm::Long, &mut packet, 1).unwrap();
        assert_eq!(unmasked_first_byte, original_first_byte);
        assert_eq!(&packet[1..5], original_pn.as_slice());
    }

    #[test]
    fn sample_past_the_end_of_the_packet_is_rejected() {
        let directional = keys();
        let mut packet = alloc::vec![0u8; 4];
        assert!(remove_header_protection(&directional.header, HeaderForm::Long, &mut packet, 1).is_err());
    }
}
