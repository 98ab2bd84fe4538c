// SPDX-License-Identifier: Apache-2.0

//! Time primitives usable without depending on `std::time::Instant`
//! directly, so the connection engine can be driven by a caller-provided
//! clock rather than owning a wall-clock source itself.

use core::{fmt, num::NonZeroU64, ops::Add, task::Poll, time::Duration};

/// The recommended timer granularity of RFC 9002 §6.1.2.
pub const K_GRANULARITY: Duration = Duration::from_millis(1);

/// An opaque point in time sourced from the caller's monotonic clock.
/// Only comparable to other `Timestamp`s from the same clock.
#[derive(PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Hash)]
pub struct Timestamp(NonZeroU64);

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Timestamp({}ns)", self.0.get())
    }
}

impl Timestamp {
    /// Constructs a `Timestamp` from a monotonic nanosecond counter. `0` is
    /// reserved as a sentinel and bumped to `1`.
    pub fn from_nanos(nanos: u64) -> Self {
        Self(NonZeroU64::new(nanos.max(1)).unwrap())
    }

    pub fn as_nanos(self) -> u64 {
        self.0.get()
    }

    pub fn checked_sub(self, other: Self) -> Option<Duration> {
        self.0
            .get()
            .checked_sub(other.0.get())
            .map(Duration::from_nanos)
    }

    /// `self - duration`, saturating at the epoch rather than underflowing.
    pub fn checked_sub_duration(self, duration: Duration) -> Option<Self> {
        self.0
            .get()
            .checked_sub(duration.as_nanos() as u64)
            .map(Self::from_nanos)
    }

    /// `true` if `self` is at or before `now`
    pub fn has_elapsed(self, now: Self) -> bool {
        self <= now
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;
    fn add(self, rhs: Duration) -> Timestamp {
        Self::from_nanos(self.0.get().saturating_add(rhs.as_nanos() as u64))
    }
}

impl core::ops::Sub for Timestamp {
    type Output = Duration;
    fn sub(self, rhs: Timestamp) -> Duration {
        self.checked_sub(rhs).unwrap_or_default()
    }
}

/// A single-shot deadline. Distinct from a timer *list*: each component
/// (idle, loss, PTO, drain) owns one and the event loop polls the minimum
/// of all of them to decide how long to sleep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timer {
    expiration: Option<Timestamp>,
}

impl Timer {
    pub fn set(&mut self, time: Timestamp) {
        self.expiration = Some(time);
    }

    pub fn cancel(&mut self) {
        self.expiration = None;
    }

    pub fn is_armed(&self) -> bool {
        self.expiration.is_some()
    }

    pub fn expiration(&self) -> Option<Timestamp> {
        self.expiration
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        matches!(self.expiration, Some(t) if t.has_elapsed(now))
    }

    /// Polls the timer, cancelling it and reporting `Ready` exactly once
    /// per expiration.
    pub fn poll_expiration(&mut self, now: Timestamp) -> Poll<()> {
        if self.is_expired(now) {
            self.cancel();
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_fires_once() {
        let mut timer = Timer::default();
        let t0 = Timestamp::from_nanos(1000);
        timer.set(t0);
        assert_eq!(timer.poll_expiration(Timestamp::from_nanos(999)), Poll::Pending);
        assert_eq!(timer.poll_expiration(Timestamp::from_nanos(1000)), Poll::Ready(()));
        assert_eq!(timer.poll_expiration(Timestamp::from_nanos(2000)), Poll::Pending);
    }

    #[test]
    fn duration_between_timestamps() {
        let a = Timestamp::from_nanos(100);
        let b = Timestamp::from_nanos(1_000_100);
        assert_eq!(b - a, Duration::from_micros(1000));
    }
}
