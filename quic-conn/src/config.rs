// SPDX-License-Identifier: Apache-2.0

//! Connection configuration. Every field has a specification-mandated
//! default; callers override only what their application needs.

use core::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfigError;

/// Parameters governing a single connection's behavior. Built with a
/// setter-per-field builder so call sites read as a sequence of overrides
/// from sensible defaults rather than a giant struct literal.
#[derive(Clone, Debug)]
pub struct Config {
    pub(crate) max_bidi_remote_streams: u64,
    pub(crate) max_uni_remote_streams: u64,
    pub(crate) max_stream_read_buffer_size: u64,
    pub(crate) max_stream_write_buffer_size: u64,
    pub(crate) max_conn_read_buffer_size: u64,
    pub(crate) require_address_validation: bool,
    pub(crate) stateless_reset_key: [u8; 32],
    pub(crate) handshake_timeout: Duration,
    pub(crate) max_idle_timeout: Duration,
    pub(crate) keepalive_period: Duration,
    pub(crate) local_connection_id_len: usize,
    pub(crate) active_connection_id_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_bidi_remote_streams: 100,
            max_uni_remote_streams: 100,
            max_stream_read_buffer_size: 1024 * 1024,
            max_stream_write_buffer_size: 1024 * 1024,
            max_conn_read_buffer_size: 1024 * 1024,
            require_address_validation: false,
            stateless_reset_key: [0u8; 32],
            handshake_timeout: Duration::from_secs(10),
            max_idle_timeout: Duration::from_secs(30),
            keepalive_period: Duration::ZERO,
            local_connection_id_len: 8,
            active_connection_id_limit: 4,
        }
    }
}

impl Config {
    pub fn builder() -> Self {
        Self::default()
    }

    pub fn max_bidi_remote_streams(&mut self, value: u64) -> &mut Self {
        self.max_bidi_remote_streams = value;
        self
    }

    pub fn max_uni_remote_streams(&mut self, value: u64) -> &mut Self {
        self.max_uni_remote_streams = value;
        self
    }

    pub fn max_stream_read_buffer_size(&mut self, value: u64) -> &mut Self {
        self.max_stream_read_buffer_size = value;
        self
    }

    pub fn max_stream_write_buffer_size(&mut self, value: u64) -> &mut Self {
        self.max_stream_write_buffer_size = value;
        self
    }

    pub fn max_conn_read_buffer_size(&mut self, value: u64) -> &mut Self {
        self.max_conn_read_buffer_size = value;
        self
    }

    pub fn require_address_validation(&mut self, value: bool) -> &mut Self {
        self.require_address_validation = value;
        self
    }

    pub fn stateless_reset_key(&mut self, key: [u8; 32]) -> &mut Self {
        self.stateless_reset_key = key;
        self
    }

    pub fn handshake_timeout(&mut self, value: Duration) -> &mut Self {
        self.handshake_timeout = value;
        self
    }

    /// `Duration::ZERO` means unlimited, matching RFC 9000 §18.2's
    /// `max_idle_timeout` wire encoding.
    pub fn max_idle_timeout(&mut self, value: Duration) -> &mut Self {
        self.max_idle_timeout = value;
        self
    }

    pub fn keepalive_period(&mut self, value: Duration) -> &mut Self {
        self.keepalive_period = value;
        self
    }

    pub fn local_connection_id_len(&mut self, len: usize) -> Result<&mut Self, ConfigError> {
        if len > quic_core::connection_id::MAX_LEN {
            return Err(ConfigError);
        }
        self.local_connection_id_len = len;
        Ok(self)
    }

    /// `min(local, peer)` idle timeout, honoring the "0 means the other
    /// side's value applies" rule of RFC 9000 §18.2.
    pub fn negotiated_idle_timeout(&self, peer_max_idle_timeout: Duration) -> Duration {
        match (self.max_idle_timeout.is_zero(), peer_max_idle_timeout.is_zero()) {
            (true, true) => Duration::ZERO,
            (true, false) => peer_max_idle_timeout,
            (false, true) => self.max_idle_timeout,
            (false, false) => self.max_idle_timeout.min(peer_max_idle_timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiated_idle_timeout_prefers_the_smaller_nonzero_value() {
        let config = Config::default();
        assert_eq!(
            config.negotiated_idle_timeout(Duration::from_secs(5)),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn zero_on_either_side_defers_to_the_other() {
        let mut config = Config::default();
        config.max_idle_timeout(Duration::ZERO);
        assert_eq!(
            config.negotiated_idle_timeout(Duration::from_secs(5)),
            Duration::from_secs(5)
        );
        assert_eq!(config.negotiated_idle_timeout(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn rejects_oversized_connection_ids() {
        let mut config = Config::default();
        assert!(config.local_connection_id_len(21).is_err());
    }
}
