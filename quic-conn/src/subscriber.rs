// SPDX-License-Identifier: Apache-2.0

//! Per-connection instrumentation. Clients implement `Subscriber` to
//! observe what a connection does; the default implementation is a noop so
//! the compiler can optimize away any event nobody is listening for.

use quic_core::{packet::PacketNumberSpace, time::Timestamp};

#[derive(Clone, Copy, Debug)]
pub struct PacketSent {
    pub space: PacketNumberSpace,
    pub packet_number: u64,
    pub len: usize,
    pub timestamp: Timestamp,
}

#[derive(Clone, Copy, Debug)]
pub struct PacketReceived {
    pub space: PacketNumberSpace,
    pub packet_number: u64,
    pub timestamp: Timestamp,
}

#[derive(Clone, Copy, Debug)]
pub struct PacketLost {
    pub space: PacketNumberSpace,
    pub packet_number: u64,
    pub timestamp: Timestamp,
}

#[derive(Clone, Copy, Debug)]
pub struct KeyUpdated {
    pub timestamp: Timestamp,
}

pub trait Subscriber {
    fn on_packet_sent(&mut self, event: &PacketSent) {
        let _ = event;
    }

    fn on_packet_received(&mut self, event: &PacketReceived) {
        let _ = event;
    }

    fn on_packet_lost(&mut self, event: &PacketLost) {
        let _ = event;
    }

    fn on_key_update(&mut self, event: &KeyUpdated) {
        let _ = event;
    }
}

/// The default subscriber: observes nothing, costs nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSubscriber;

impl Subscriber for NoopSubscriber {}

#[cfg(feature = "tracing-events")]
mod tracing_subscriber {
    use super::*;

    /// Forwards every event to the `tracing` crate at debug level.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct TracingSubscriber;

    impl Subscriber for TracingSubscriber {
        fn on_packet_sent(&mut self, event: &PacketSent) {
            tracing::debug!(space = ?event.space, packet_number = event.packet_number, len = event.len, "packet_sent");
        }

        fn on_packet_received(&mut self, event: &PacketReceived) {
            tracing::debug!(space = ?event.space, packet_number = event.packet_number, "packet_received");
        }

        fn on_packet_lost(&mut self, event: &PacketLost) {
            tracing::debug!(space = ?event.space, packet_number = event.packet_number, "packet_lost");
        }

        fn on_key_update(&mut self, _event: &KeyUpdated) {
            tracing::debug!("key_update");
        }
    }
}

#[cfg(feature = "tracing-events")]
pub use tracing_subscriber::TracingSubscriber;

#[cfg(test)]
mod tests {
    use super::*;

    struct Counting {
        sent: u32,
    }

    impl Subscriber for Counting {
        fn on_packet_sent(&mut self, _event: &PacketSent) {
            self.sent += 1;
        }
    }

    #[test]
    fn custom_subscriber_observes_calls_the_default_ignores() {
        let mut sub = Counting { sent: 0 };
        sub.on_packet_sent(&PacketSent {
            space: PacketNumberSpace::ApplicationData,
            packet_number: 0,
            len: 100,
            timestamp: Timestamp::from_nanos(0),
        });
        assert_eq!(sub.sent, 1);

        let mut noop = NoopSubscriber;
        noop.on_packet_sent(&PacketSent {
            space: PacketNumberSpace::ApplicationData,
            packet_number: 0,
            len: 100,
            timestamp: Timestamp::from_nanos(0),
        });
    }
}
