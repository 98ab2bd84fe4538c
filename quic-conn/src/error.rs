// SPDX-License-Identifier: Apache-2.0

//! Error wrappers that distinguish errors we detected locally from errors
//! the peer reported to us (§7 of the transport design).

use core::fmt;
use quic_core::{application_error, transport_error, varint::VarInt};

/// An error this endpoint detected and is about to report to the peer via
/// CONNECTION_CLOSE.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalError {
    pub code: transport_error::Error,
    /// Whether this error belongs in the application or transport error
    /// code space, i.e. which CONNECTION_CLOSE frame type reports it.
    pub is_application: bool,
}

impl LocalError {
    pub const fn new(code: transport_error::Error) -> Self {
        Self { code, is_application: false }
    }

    pub fn application(code: VarInt) -> Self {
        Self {
            code: transport_error::Error::new(code, "application close"),
            is_application: true,
        }
    }
}

impl fmt::Display for LocalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "local error: {}", self.code)
    }
}

/// An error the peer reported to us in a CONNECTION_CLOSE frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerError {
    Transport(transport_error::Error),
    Application(application_error::Error),
}

impl fmt::Display for PeerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PeerError::Transport(e) => write!(f, "peer transport error: {e}"),
            PeerError::Application(e) => write!(f, "peer application error: {e}"),
        }
    }
}

/// The error a suspended public-API call reports when its caller-supplied
/// cancellation token fires before the operation completes. The call leaves
/// connection state exactly as it would without the cancellation: any data
/// already buffered remains buffered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "operation cancelled")
    }
}

/// The terminal error surfaced by public API calls once a connection has
/// entered `draining` or `done`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionError {
    Local(LocalError),
    Peer(PeerError),
    /// The application called `close`/`abort` with no error.
    Closed,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectionError::Local(e) => e.fmt(f),
            ConnectionError::Peer(e) => e.fmt(f),
            ConnectionError::Closed => write!(f, "connection closed"),
        }
    }
}
