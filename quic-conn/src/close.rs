// SPDX-License-Identifier: Apache-2.0

//! Connection lifetime state machine.
//!
//! Five states: `Alive` (normal operation), `PeerClosed` (a CONNECTION_CLOSE
//! arrived but we haven't started draining yet — one more flight is allowed
//! so the peer's last packet can be acknowledged), `Closing` (we initiated
//! the close and are retransmitting our own CONNECTION_CLOSE on receipt of
//! anything else), `Draining` (RFC 9000 §10.2: no packets sent, just
//! waiting out the drain period in case stray packets arrive), and `Done`
//! (the connection is fully torn down and can be reaped).

use crate::error::{ConnectionError, LocalError, PeerError};
use core::time::Duration;
use quic_core::time::{Timer, Timestamp};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifetimeState {
    Alive,
    PeerClosed,
    Closing,
    Draining,
    Done,
}

/// Caps how often a CONNECTION_CLOSE is retransmitted in response to
/// incoming packets while closing, per RFC 9000 §10.2.1's anti-amplification
/// concern for a chatty peer that keeps sending after the close.
const CLOSE_RATE_LIMIT_BASE: Duration = Duration::from_millis(100);
const CLOSE_RATE_LIMIT_MAX: Duration = Duration::from_secs(5);

pub struct CloseState {
    state: LifetimeState,
    error: Option<ConnectionError>,
    drain_timer: Timer,
    idle_timer: Timer,
    close_retransmit_timer: Timer,
    close_retransmit_backoff: u32,
}

impl CloseState {
    pub fn new() -> Self {
        Self {
            state: LifetimeState::Alive,
            error: None,
            drain_timer: Timer::default(),
            idle_timer: Timer::default(),
            close_retransmit_timer: Timer::default(),
            close_retransmit_backoff: 0,
        }
    }

    pub fn state(&self) -> LifetimeState {
        self.state
    }

    pub fn error(&self) -> Option<ConnectionError> {
        self.error
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, LifetimeState::Draining | LifetimeState::Done)
    }

    /// The application or a locally-detected protocol violation initiates
    /// the close. `pto_base` is the current PTO estimate, used to size the
    /// drain period per RFC 9000 §10.2: three times the PTO.
    pub fn close_locally(&mut self, error: LocalError, now: Timestamp, pto_base: Duration) {
        if self.state != LifetimeState::Alive {
            return;
        }
        self.state = LifetimeState::Closing;
        self.error = Some(ConnectionError::Local(error));
        self.arm_close_retransmit(now);
        self.drain_timer.set(now + pto_base.saturating_mul(3));
    }

    /// A CONNECTION_CLOSE arrived from the peer.
    pub fn on_peer_close(&mut self, error: PeerError, now: Timestamp, pto_base: Duration) {
        match self.state {
            LifetimeState::Alive => {
                self.state = LifetimeState::PeerClosed;
                self.error = Some(ConnectionError::Peer(error));
                self.drain_timer.set(now + pto_base.saturating_mul(3));
            }
            LifetimeState::Closing => {
                // the peer closed back; move straight to draining, no need
                // to keep retransmitting our own CONNECTION_CLOSE
                self.state = LifetimeState::Draining;
                self.close_retransmit_timer.cancel();
            }
            LifetimeState::PeerClosed | LifetimeState::Draining | LifetimeState::Done => {}
        }
    }

    /// Once the one extra flight permitted after `PeerClosed` has gone out
    /// (our own CONNECTION_CLOSE echo), move to draining.
    pub fn on_peer_closed_flight_sent(&mut self) {
        if self.state == LifetimeState::PeerClosed {
            self.state = LifetimeState::Draining;
        }
    }

    /// A validated stateless reset arrived from the peer (RFC 9000 §10.3.1):
    /// no more packets may be sent and the connection is immediately done,
    /// skipping the drain period entirely since there is no peer state left
    /// to wait out.
    pub fn on_stateless_reset(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.error.get_or_insert(ConnectionError::Closed);
        self.state = LifetimeState::Done;
        self.drain_timer.cancel();
        self.close_retransmit_timer.cancel();
        self.idle_timer.cancel();
    }

    pub fn on_drain_timer_expired(&mut self, now: Timestamp) {
        if self.drain_timer.is_expired(now) {
            self.drain_timer.cancel();
            self.state = LifetimeState::Done;
        }
    }

    fn arm_close_retransmit(&mut self, now: Timestamp) {
        let backoff = 1u32 << self.close_retransmit_backoff.min(16);
        let delay = CLOSE_RATE_LIMIT_BASE.saturating_mul(backoff).min(CLOSE_RATE_LIMIT_MAX);
        self.close_retransmit_timer.set(now + delay);
    }

    /// While closing, an incoming packet can trigger a CONNECTION_CLOSE
    /// retransmission, but no more often than the current backoff allows.
    pub fn should_retransmit_close(&self, now: Timestamp) -> bool {
        self.state == LifetimeState::Closing && self.close_retransmit_timer.is_expired(now)
    }

    pub fn on_close_retransmitted(&mut self, now: Timestamp) {
        self.close_retransmit_backoff = self.close_retransmit_backoff.saturating_add(1);
        self.arm_close_retransmit(now);
    }

    /// Idle timeout per RFC 9000 §10.1: any ack-eliciting activity in
    /// either direction resets it.
    pub fn on_activity(&mut self, now: Timestamp, idle_timeout: Duration) {
        if idle_timeout.is_zero() {
            self.idle_timer.cancel();
            return;
        }
        self.idle_timer.set(now + idle_timeout);
    }

    pub fn on_idle_timer_expired(&mut self, now: Timestamp) -> bool {
        if self.idle_timer.is_expired(now) && self.state != LifetimeState::Done {
            self.idle_timer.cancel();
            self.error.get_or_insert(ConnectionError::Closed);
            self.state = LifetimeState::Done;
            true
        } else {
            false
        }
    }

    pub fn drain_timer(&self) -> &Timer {
        &self.drain_timer
    }

    pub fn idle_timer(&self) -> &Timer {
        &self.idle_timer
    }

    pub fn close_retransmit_timer(&self) -> &Timer {
        &self.close_retransmit_timer
    }
}

impl Default for CloseState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quic_core::transport_error;

    fn ts(nanos: u64) -> Timestamp {
        Timestamp::from_nanos(nanos)
    }

    #[test]
    fn closing_locally_arms_the_drain_timer_at_three_pto() {
        let mut close = CloseState::new();
        let pto = Duration::from_millis(100);
        close.close_locally(LocalError::new(transport_error::Error::NO_ERROR), ts(1_000_000_000), pto);
        assert_eq!(close.state(), LifetimeState::Closing);
        assert!(close.drain_timer().is_armed());
    }

    #[test]
    fn peer_close_after_local_close_skips_straight_to_draining() {
        let mut close = CloseState::new();
        let pto = Duration::from_millis(100);
        close.close_locally(LocalError::new(transport_error::Error::NO_ERROR), ts(1_000_000_000), pto);
        close.on_peer_close(
            PeerError::Transport(transport_error::Error::NO_ERROR),
            ts(1_000_000_500),
            pto,
        );
        assert_eq!(close.state(), LifetimeState::Draining);
    }

    #[test]
    fn drain_timer_expiry_moves_to_done() {
        let mut close = CloseState::new();
        let pto = Duration::from_millis(100);
        close.close_locally(LocalError::new(transport_error::Error::NO_ERROR), ts(1_000_000_000), pto);
        let expiry = close.drain_timer().expiration().unwrap();
        close.on_drain_timer_expired(expiry);
        assert_eq!(close.state(), LifetimeState::Done);
    }

    #[test]
    fn stateless_reset_jumps_straight_to_done_from_alive() {
        let mut close = CloseState::new();
        close.on_activity(ts(1_000_000_000), Duration::from_secs(30));
        close.on_stateless_reset();
        assert_eq!(close.state(), LifetimeState::Done);
        assert!(!close.idle_timer().is_armed());
    }

    #[test]
    fn idle_timeout_zero_disarms_the_idle_timer() {
        let mut close = CloseState::new();
        close.on_activity(ts(1_000_000_000), Duration::from_secs(30));
        assert!(close.idle_timer().is_armed());
        close.on_activity(ts(1_000_000_000), Duration::ZERO);
        assert!(!close.idle_timer().is_armed());
    }

    #[test]
    fn close_retransmit_backoff_grows_each_time() {
        let mut close = CloseState::new();
        let pto = Duration::from_millis(100);
        close.close_locally(LocalError::new(transport_error::Error::NO_ERROR), ts(1_000_000_000), pto);
        let first = close.close_retransmit_timer().expiration().unwrap();
        close.on_close_retransmitted(ts(1_000_000_000));
        let second = close.close_retransmit_timer().expiration().unwrap();
        assert!(second > first);
    }
}
