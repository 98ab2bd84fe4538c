// SPDX-License-Identifier: Apache-2.0

//! Local and remote connection-ID bookkeeping (§4.6): issuance of IDs we
//! advertise, retirement accounting, and the set of IDs we may address the
//! peer with.

use crate::error::LocalError;
use alloc::vec::Vec;
use core::hash::Hasher;
use quic_core::{
    connection_id::{ConnectionId, StatelessResetToken},
    transport_error,
};
use siphasher::sip128::{Hasher128, SipHasher13};

/// Derives the stateless reset token this endpoint offers for
/// `connection_id`, keyed on the endpoint's stateless reset key.
/// Keyed-SipHash rather than true HMAC, since the 32-byte config key gives
/// us two good 64-bit SipHash keys directly.
/// Deterministic in `connection_id` alone so a peer presenting the same
/// token back after this endpoint has lost all per-connection state is
/// still recognized (RFC 9000 §10.3).
pub(crate) fn derive_stateless_reset_token(key: &[u8; 32], connection_id: &ConnectionId) -> StatelessResetToken {
    let k0 = u64::from_le_bytes(key[0..8].try_into().unwrap());
    let k1 = u64::from_le_bytes(key[8..16].try_into().unwrap());
    let mut hasher = SipHasher13::new_with_keys(k0, k1);
    hasher.write(connection_id.as_bytes());
    let hash = hasher.finish128();
    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&hash.h1.to_le_bytes());
    bytes[8..].copy_from_slice(&hash.h2.to_le_bytes());
    StatelessResetToken::from_bytes(bytes)
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct LocalEntry {
    sequence_number: u64,
    id: ConnectionId,
    stateless_reset_token: StatelessResetToken,
    retired: bool,
}

/// Connection IDs we have issued to the peer, which the peer may use as the
/// destination CID on packets it sends us.
pub struct LocalIdRegistry {
    entries: Vec<LocalEntry>,
    next_sequence_number: u64,
    active_connection_id_limit: usize,
    /// Unacknowledged retirements we have sent; bounds how much state a
    /// misbehaving peer can force us to hold open.
    pending_retirements: usize,
    max_pending_retirements: usize,
}

impl LocalIdRegistry {
    pub fn new(first_id: ConnectionId, first_token: StatelessResetToken, active_connection_id_limit: usize) -> Self {
        Self {
            entries: alloc::vec![LocalEntry {
                sequence_number: 0,
                id: first_id,
                stateless_reset_token: first_token,
                retired: false,
            }],
            next_sequence_number: 1,
            active_connection_id_limit,
            pending_retirements: 0,
            max_pending_retirements: 7,
        }
    }

    /// Issues a new ID (the caller sources both the bytes and the token from
    /// the endpoint capability) up to the peer's advertised limit.
    pub fn issue(&mut self, id: ConnectionId, token: StatelessResetToken) -> Option<u64> {
        let active = self.entries.iter().filter(|e| !e.retired).count();
        if active >= self.active_connection_id_limit {
            return None;
        }
        let sequence_number = self.next_sequence_number;
        self.next_sequence_number += 1;
        self.entries.push(LocalEntry {
            sequence_number,
            id,
            stateless_reset_token: token,
            retired: false,
        });
        Some(sequence_number)
    }

    /// Handles a peer RETIRE_CONNECTION_ID for `sequence_number`.
    pub fn on_peer_retire(&mut self, sequence_number: u64) -> Result<(), LocalError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.sequence_number == sequence_number)
            .ok_or_else(|| LocalError::new(transport_error::Error::PROTOCOL_VIOLATION))?;
        entry.retired = true;
        Ok(())
    }

    pub fn on_retirement_acked(&mut self) {
        self.pending_retirements = self.pending_retirements.saturating_sub(1);
    }

    /// Retires the transient DCID the server accepted the client's first
    /// packet on, once the handshake completes.
    pub fn retire(&mut self, sequence_number: u64) -> Result<(), LocalError> {
        self.on_peer_retire(sequence_number)?;
        self.pending_retirements += 1;
        if self.pending_retirements > self.max_pending_retirements {
            return Err(LocalError::new(transport_error::Error::CONNECTION_ID_LIMIT_ERROR));
        }
        Ok(())
    }

    pub fn active_ids(&self) -> impl Iterator<Item = (u64, ConnectionId)> + '_ {
        self.entries
            .iter()
            .filter(|e| !e.retired)
            .map(|e| (e.sequence_number, e.id))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct RemoteEntry {
    sequence_number: u64,
    id: ConnectionId,
    stateless_reset_token: StatelessResetToken,
}

/// Connection IDs the peer has handed us via NEW_CONNECTION_ID (and its
/// initial/preferred-address transport parameters), usable as our
/// destination CID.
pub struct RemoteIdRegistry {
    entries: Vec<RemoteEntry>,
    retire_prior_to: u64,
    peer_uses_zero_length_cid: bool,
}

impl RemoteIdRegistry {
    pub fn new(first_id: ConnectionId, first_token: StatelessResetToken) -> Self {
        let peer_uses_zero_length_cid = first_id.is_empty();
        Self {
            entries: alloc::vec![RemoteEntry {
                sequence_number: 0,
                id: first_id,
                stateless_reset_token: first_token,
            }],
            retire_prior_to: 0,
            peer_uses_zero_length_cid,
        }
    }

    /// Processes a NEW_CONNECTION_ID frame; returns the sequence numbers
    /// that must now be retired via RETIRE_CONNECTION_ID.
    pub fn on_new_connection_id(
        &mut self,
        sequence_number: u64,
        retire_prior_to: u64,
        id: ConnectionId,
        token: StatelessResetToken,
    ) -> Result<Vec<u64>, LocalError> {
        if self.peer_uses_zero_length_cid {
            return Err(LocalError::new(transport_error::Error::PROTOCOL_VIOLATION));
        }
        if retire_prior_to > sequence_number {
            return Err(LocalError::new(transport_error::Error::FRAME_ENCODING_ERROR));
        }

        if let Some(existing) = self.entries.iter().find(|e| e.sequence_number == sequence_number) {
            if existing.id != id || existing.stateless_reset_token != token {
                return Err(LocalError::new(transport_error::Error::PROTOCOL_VIOLATION));
            }
            return Ok(Vec::new());
        }

        self.entries.push(RemoteEntry {
            sequence_number,
            id,
            stateless_reset_token: token,
        });

        self.retire_prior_to = self.retire_prior_to.max(retire_prior_to);
        let to_retire: Vec<u64> = self
            .entries
            .iter()
            .filter(|e| e.sequence_number < self.retire_prior_to)
            .map(|e| e.sequence_number)
            .collect();
        self.entries.retain(|e| e.sequence_number >= self.retire_prior_to);

        Ok(to_retire)
    }

    pub fn current(&self) -> Option<ConnectionId> {
        self.entries.first().map(|e| e.id)
    }

    /// Overwrites the bootstrap entry's token with the real value carried
    /// in the peer's `stateless_reset_token` transport parameter, once it
    /// arrives. Before that, the placeholder token cannot match anything
    /// a genuine stateless reset would carry.
    pub fn set_initial_token(&mut self, token: StatelessResetToken) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.sequence_number == 0) {
            entry.stateless_reset_token = token;
        }
    }

    /// Whether `candidate` matches any token the peer has given us for a
    /// connection ID we currently address it with, i.e. whether an
    /// unparseable short header packet is actually a stateless reset
    /// (RFC 9000 §10.3.1) rather than a corrupted 1-RTT packet.
    pub fn matches_stateless_reset_token(&self, candidate: &StatelessResetToken) -> bool {
        self.entries.iter().any(|e| &e.stateless_reset_token == candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(b: u8) -> ConnectionId {
        ConnectionId::try_from_bytes(&[b; 8]).unwrap()
    }

    fn token() -> StatelessResetToken {
        StatelessResetToken::from_bytes([0u8; 16])
    }

    #[test]
    fn local_registry_respects_active_limit() {
        let mut registry = LocalIdRegistry::new(cid(0), token(), 2);
        assert!(registry.issue(cid(1), token()).is_some());
        assert!(registry.issue(cid(2), token()).is_none());
    }

    #[test]
    fn retiring_an_unknown_sequence_is_a_protocol_violation() {
        let mut registry = LocalIdRegistry::new(cid(0), token(), 4);
        assert!(registry.on_peer_retire(99).is_err());
    }

    #[test]
    fn remote_registry_retires_below_new_floor() {
        let mut registry = RemoteIdRegistry::new(cid(0), token());
        let to_retire = registry.on_new_connection_id(1, 1, cid(1), token()).unwrap();
        assert_eq!(to_retire, alloc::vec![0]);
    }

    #[test]
    fn duplicate_new_connection_id_is_accepted_silently() {
        let mut registry = RemoteIdRegistry::new(cid(0), token());
        registry.on_new_connection_id(1, 0, cid(1), token()).unwrap();
        assert!(registry.on_new_connection_id(1, 0, cid(1), token()).unwrap().is_empty());
    }

    #[test]
    fn mismatched_duplicate_sequence_is_rejected() {
        let mut registry = RemoteIdRegistry::new(cid(0), token());
        registry.on_new_connection_id(1, 0, cid(1), token()).unwrap();
        assert!(registry.on_new_connection_id(1, 0, cid(2), token()).is_err());
    }

    #[test]
    fn zero_length_peer_cid_rejects_any_new_connection_id() {
        let mut registry = RemoteIdRegistry::new(ConnectionId::EMPTY, token());
        assert!(registry.on_new_connection_id(1, 0, cid(1), token()).is_err());
    }

    #[test]
    fn derived_token_is_stable_for_the_same_key_and_cid() {
        let key = [7u8; 32];
        let a = derive_stateless_reset_token(&key, &cid(1));
        let b = derive_stateless_reset_token(&key, &cid(1));
        assert_eq!(a, b);
        let c = derive_stateless_reset_token(&key, &cid(2));
        assert_ne!(a, c);
    }

    #[test]
    fn remote_registry_recognizes_a_previously_offered_token() {
        let mut registry = RemoteIdRegistry::new(cid(0), token());
        let real_token = StatelessResetToken::from_bytes([9u8; 16]);
        registry.set_initial_token(real_token);
        assert!(registry.matches_stateless_reset_token(&real_token));
        assert!(!registry.matches_stateless_reset_token(&token()));
    }
}
