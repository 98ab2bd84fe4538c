// SPDX-License-Identifier: Apache-2.0

//! Application-defined error codes carried by RESET_STREAM, STOP_SENDING,
//! and application-close CONNECTION_CLOSE frames. These are opaque 62-bit
//! values the core never interprets.

use crate::varint::VarInt;
use core::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Error {
    pub code: VarInt,
}

impl Error {
    pub fn new(code: u64) -> Result<Self, crate::varint::VarIntError> {
        Ok(Self {
            code: VarInt::new(code)?,
        })
    }

    pub const fn from_varint(code: VarInt) -> Self {
        Self { code }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "application error {}", self.code)
    }
}
