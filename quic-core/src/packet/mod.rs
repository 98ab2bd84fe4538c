// SPDX-License-Identifier: Apache-2.0

//! Packet header parsing and assembly (RFC 9000 §17). Everything here is
//! cleartext structure; removing header protection and opening/sealing the
//! AEAD payload happens in the connection engine, which owns the keys.

pub mod header;
pub mod number;

pub use header::{LongHeader, LongPacketType, ShortHeader, VersionNegotiation, QUIC_VERSION_1};
pub use number::{PacketNumber, PacketNumberSpace, TruncatedPacketNumber};
