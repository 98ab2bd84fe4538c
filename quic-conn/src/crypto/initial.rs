// SPDX-License-Identifier: Apache-2.0

//! Initial packet protection (RFC 9001 §5.2): the one key schedule this
//! crate derives end to end, since Initial secrets come from the
//! destination connection ID rather than the TLS handshake.

use super::{derive_directional_keys, expand_label, CipherSuite, DirectionalKeys};
use ring::hkdf;

const INITIAL_SALT: [u8; 20] = [
    0x38, 0x76, 0x2c, 0xf7, 0xf5, 0x59, 0x34, 0xb3, 0x4d, 0x17, 0x9a, 0xe6, 0x4a, 0x4c, 0x80, 0xca, 0xdc, 0xcb, 0xb7,
    0xf0,
];

pub struct InitialKeys {
    pub client: DirectionalKeys,
    pub server: DirectionalKeys,
}

/// Derives both directions' Initial keys from a client-chosen destination
/// connection ID. Either endpoint can compute the full set: Initial
/// protection authenticates the handshake, it does not keep it secret from
/// on-path observers.
pub fn initial_keys(destination_connection_id: &[u8]) -> InitialKeys {
    let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, &INITIAL_SALT);
    let initial_secret = salt.extract(destination_connection_id);

    let mut client_secret_bytes = [0u8; 32];
    expand_label(&initial_secret, "client in", &[], &mut client_secret_bytes);
    let client_secret = hkdf::Prk::new_less_safe(hkdf::HKDF_SHA256, &client_secret_bytes);

    let mut server_secret_bytes = [0u8; 32];
    expand_label(&initial_secret, "server in", &[], &mut server_secret_bytes);
    let server_secret = hkdf::Prk::new_less_safe(hkdf::HKDF_SHA256, &server_secret_bytes);

    InitialKeys {
        client: derive_directional_keys(CipherSuite::Aes128Gcm, &client_secret),
        server: derive_directional_keys(CipherSuite::Aes128Gcm, &server_secret),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_directions_derive_distinct_keys() {
        let keys = initial_keys(&[0x83, 0x94, 0xc8, 0xf0, 0x3e, 0x51, 0x57, 0x08]);
        assert_eq!(keys.client.packet.tag_len(), 16);
        assert_eq!(keys.server.packet.tag_len(), 16);
        assert_eq!(keys.client.header.sample_len(), 16);
    }

    #[test]
    fn derivation_is_deterministic_in_the_destination_cid() {
        let dcid = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let a = initial_keys(&dcid);
        let b = initial_keys(&dcid);
        // both derivations must agree on a fixed plaintext's ciphertext
        let header = b"header";
        let mut buf_a = alloc::vec![0u8; 4];
        let mut buf_b = buf_a.clone();
        a.client.packet.encrypt(0, header, &mut buf_a).unwrap();
        b.client.packet.encrypt(0, header, &mut buf_b).unwrap();
        assert_eq!(buf_a, buf_b);
    }
}
