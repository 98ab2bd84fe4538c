// SPDX-License-Identifier: Apache-2.0

//! Wire-level types and algorithms for the QUIC transport protocol: varints,
//! connection and stream IDs, transport parameters, packet headers, frames,
//! and RFC 9002 loss-recovery primitives. Stateful connection behavior
//! (key schedule, stream buffering, the event loop) lives in `quic-conn`.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod ack;
pub mod application_error;
pub mod connection_id;
pub mod frame;
pub mod interval_set;
pub mod packet;
pub mod recovery;
pub mod stream_id;
pub mod time;
pub mod transport_error;
pub mod transport_parameters;
pub mod varint;

pub use connection_id::ConnectionId;
pub use stream_id::StreamId;
pub use varint::VarInt;
