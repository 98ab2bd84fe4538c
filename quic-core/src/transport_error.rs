// SPDX-License-Identifier: Apache-2.0

//! The RFC 9000 §20.1 transport error code space, plus the crypto-alert
//! range of RFC 9001 §4.8.

use crate::varint::VarInt;
use core::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Error {
    pub code: VarInt,
    pub frame_type: Option<VarInt>,
    pub reason: &'static str,
}

impl Error {
    pub const fn new(code: VarInt, reason: &'static str) -> Self {
        Self {
            code,
            reason,
            frame_type: None,
        }
    }

    pub const fn with_frame_type(mut self, frame_type: VarInt) -> Self {
        self.frame_type = Some(frame_type);
        self
    }

    pub const fn with_reason(mut self, reason: &'static str) -> Self {
        self.reason = reason;
        self
    }

    /// Wraps a TLS alert as the `crypto(0x0100 + alert)` code of RFC 9001 §4.8
    pub fn crypto(alert: u8) -> Self {
        Self::new(VarInt::from_u16(0x0100 + alert as u16), "tls alert")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "transport error {}", self.code)
        } else {
            write!(f, "{}", self.reason)
        }
    }
}

macro_rules! def_error {
    ($name:ident, $code:expr, $reason:expr) => {
        impl Error {
            pub const $name: Error = Error::new(VarInt::from_u32($code), $reason);
        }
    };
}

def_error!(NO_ERROR, 0x00, "no error");
def_error!(INTERNAL_ERROR, 0x01, "internal error");
def_error!(CONNECTION_REFUSED, 0x02, "connection refused");
def_error!(FLOW_CONTROL_ERROR, 0x03, "flow control error");
def_error!(STREAM_LIMIT_ERROR, 0x04, "stream limit error");
def_error!(STREAM_STATE_ERROR, 0x05, "stream state error");
def_error!(FINAL_SIZE_ERROR, 0x06, "final size error");
def_error!(FRAME_ENCODING_ERROR, 0x07, "frame encoding error");
def_error!(TRANSPORT_PARAMETER_ERROR, 0x08, "transport parameter error");
def_error!(CONNECTION_ID_LIMIT_ERROR, 0x09, "connection id limit error");
def_error!(PROTOCOL_VIOLATION, 0x0a, "protocol violation");
def_error!(INVALID_TOKEN, 0x0b, "invalid token");
def_error!(APPLICATION_ERROR, 0x0c, "application error");
def_error!(CRYPTO_BUFFER_EXCEEDED, 0x0d, "crypto buffer exceeded");
def_error!(KEY_UPDATE_ERROR, 0x0e, "key update error");
def_error!(AEAD_LIMIT_REACHED, 0x0f, "aead integrity limit reached");
def_error!(NO_VIABLE_PATH, 0x10, "no viable path");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypto_alert_is_offset_correctly() {
        let err = Error::crypto(40);
        assert_eq!(err.code.as_u64(), 0x0100 + 40);
    }
}
