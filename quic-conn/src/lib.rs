// SPDX-License-Identifier: Apache-2.0

//! The stateful QUIC connection engine: packet protection, packet assembly
//! and parsing, ACK tracking, RFC 9002 loss recovery, stream multiplexing,
//! flow control, connection ID management, and connection lifetime.
//!
//! This crate is sans-I/O and sans-TLS: it consumes a handshake's derived
//! secrets and peer transport parameters rather than running a TLS state
//! machine itself, and it produces and consumes opaque datagram bytes
//! rather than owning a socket. Those concerns belong to an embedder.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod cid_manager;
mod close;
mod config;
mod connection;
mod crypto;
mod error;
mod gate;
mod packet_protection;
mod recovery_manager;
mod retry_token;
mod space;
mod stream;
mod subscriber;

pub use close::LifetimeState;
pub use config::{Config, ConfigError};
pub use connection::Connection;
pub use crypto::CipherSuite;
pub use error::{Cancelled, ConnectionError, LocalError, PeerError};
pub use retry_token::{RetryTokenError, RetryTokenKey, TOKEN_LIFETIME};
pub use stream::SendState;
pub use subscriber::{KeyUpdated, NoopSubscriber, PacketLost, PacketReceived, PacketSent, Subscriber};
#[cfg(feature = "tracing-events")]
pub use subscriber::TracingSubscriber;
