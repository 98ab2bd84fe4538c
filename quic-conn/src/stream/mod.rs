// SPDX-License-Identifier: Apache-2.0

//! Stream multiplexing: per-stream send/receive buffering, lifecycle and
//! limit bookkeeping, and the scheduler deciding which stream fills the
//! next outgoing packet.

pub mod manager;
pub mod recv;
pub mod scheduler;
pub mod send;

pub use manager::{Stream, StreamManager};
pub use recv::RecvBuffer;
pub use scheduler::StreamScheduler;
pub use send::{SendBuffer, SendState};
