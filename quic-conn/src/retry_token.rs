// SPDX-License-Identifier: Apache-2.0

//! Retry tokens (RFC 9000 §8.1.2): address validation without holding any
//! per-attempt server state. Everything needed to validate a returning
//! token is re-derived from the token bytes, the connection ID the server
//! chose as the Retry packet's source CID, and the client's address.

use alloc::vec::Vec;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};
use core::{fmt, time::Duration};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryTokenError;

impl fmt::Display for RetryTokenError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid or expired retry token")
    }
}

/// Tokens expire quickly: a Retry round trip should complete in well under
/// a second, so this only needs to absorb ordinary network latency.
pub const TOKEN_LIFETIME: Duration = Duration::from_secs(5);

pub struct RetryTokenKey {
    cipher: XChaCha20Poly1305,
}

impl RetryTokenKey {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(&key)),
        }
    }

    /// `retry_source_cid` is the connection ID the server is about to put
    /// in the Retry packet's source CID field; it becomes part of the
    /// nonce, so it never needs to be carried inside the token itself.
    /// `nonce_suffix` is 4 bytes of caller-supplied randomness completing
    /// the 24-byte XChaCha20 nonce.
    pub fn seal(
        &self,
        now_unix_secs: u64,
        original_destination_cid: &[u8],
        retry_source_cid: &[u8],
        nonce_suffix: [u8; 4],
        client_address_aad: &[u8],
    ) -> Vec<u8> {
        let nonce = build_nonce(retry_source_cid, nonce_suffix);

        let mut plaintext = Vec::with_capacity(8 + 1 + original_destination_cid.len());
        plaintext.extend_from_slice(&now_unix_secs.to_be_bytes());
        plaintext.push(original_destination_cid.len() as u8);
        plaintext.extend_from_slice(original_destination_cid);

        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: &plaintext,
                    aad: client_address_aad,
                },
            )
            .expect("plaintext and AAD fit within XChaCha20-Poly1305 limits");

        let mut token = Vec::with_capacity(4 + ciphertext.len());
        token.extend_from_slice(&nonce_suffix);
        token.extend_from_slice(&ciphertext);
        token
    }

    /// Recovers the original destination connection ID from a token,
    /// rejecting it if expired, malformed, or bound to a different client
    /// address or retry source CID than the one presented now.
    pub fn open(
        &self,
        token: &[u8],
        retry_source_cid: &[u8],
        client_address_aad: &[u8],
        now_unix_secs: u64,
    ) -> Result<Vec<u8>, RetryTokenError> {
        if token.len() < 4 {
            return Err(RetryTokenError);
        }
        let (nonce_suffix, ciphertext) = token.split_at(4);
        let nonce = build_nonce(retry_source_cid, nonce_suffix.try_into().unwrap());

        let plaintext = self
            .cipher
            .decrypt(
                &nonce,
                Payload {
                    msg: ciphertext,
                    aad: client_address_aad,
                },
            )
            .map_err(|_| RetryTokenError)?;

        if plaintext.len() < 9 {
            return Err(RetryTokenError);
        }
        let issued_at = u64::from_be_bytes(plaintext[0..8].try_into().unwrap());
        let age = now_unix_secs.saturating_sub(issued_at);
        if age > TOKEN_LIFETIME.as_secs() {
            return Err(RetryTokenError);
        }

        let cid_len = plaintext[8] as usize;
        let cid = plaintext
            .get(9..9 + cid_len)
            .ok_or(RetryTokenError)?
            .to_vec();
        Ok(cid)
    }
}

fn build_nonce(retry_source_cid: &[u8], suffix: [u8; 4]) -> XNonce {
    let mut bytes = [0u8; 24];
    let cid_len = retry_source_cid.len().min(20);
    bytes[..cid_len].copy_from_slice(&retry_source_cid[..cid_len]);
    bytes[20..].copy_from_slice(&suffix);
    XNonce::clone_from_slice(&bytes)
}

impl fmt::Debug for RetryTokenKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RetryTokenKey").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_the_original_destination_cid() {
        let key = RetryTokenKey::new([1u8; 32]);
        let scid = [2u8; 8];
        let original_dcid = [3u8, 4, 5, 6];
        let aad = b"1.2.3.4:5555";

        let token = key.seal(1_000, &original_dcid, &scid, [9u8; 4], aad);
        let recovered = key.open(&token, &scid, aad, 1_002).unwrap();
        assert_eq!(recovered, original_dcid);
    }

    #[test]
    fn rejects_an_expired_token() {
        let key = RetryTokenKey::new([1u8; 32]);
        let scid = [2u8; 8];
        let aad = b"1.2.3.4:5555";

        let token = key.seal(1_000, &[3u8], &scid, [9u8; 4], aad);
        assert!(key.open(&token, &scid, aad, 1_000 + TOKEN_LIFETIME.as_secs() + 1).is_err());
    }

    #[test]
    fn rejects_a_mismatched_client_address() {
        let key = RetryTokenKey::new([1u8; 32]);
        let scid = [2u8; 8];

        let token = key.seal(1_000, &[3u8], &scid, [9u8; 4], b"1.2.3.4:5555");
        assert!(key.open(&token, &scid, b"6.6.6.6:5555", 1_001).is_err());
    }

    #[test]
    fn rejects_a_mismatched_retry_source_cid() {
        let key = RetryTokenKey::new([1u8; 32]);
        let aad = b"1.2.3.4:5555";

        let token = key.seal(1_000, &[3u8], &[2u8; 8], [9u8; 4], aad);
        assert!(key.open(&token, &[9u8; 8], aad, 1_001).is_err());
    }
}
