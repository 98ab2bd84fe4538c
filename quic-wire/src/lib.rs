// SPDX-License-Identifier: Apache-2.0

//! Minimal, allocation-free buffer primitives for parsing and emitting the
//! QUIC wire format. Everything here is agnostic of QUIC itself: it only
//! knows how to consume and produce bytes in a way that plays well with
//! `?`-based error propagation and zero-copy slicing.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

mod decoder;
mod encoder;

pub use decoder::{
    DecoderBuffer, DecoderBufferMut, DecoderBufferMutResult, DecoderBufferResult, DecoderError,
    DecoderValue, DecoderValueMut,
};
pub use encoder::{Encoder, EncoderBuffer, EncoderValue};
