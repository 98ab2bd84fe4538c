// SPDX-License-Identifier: Apache-2.0

//! Frame encoding and parsing (RFC 9000 §19). A `Frame` is the unit that
//! packet payloads are built from once header protection has been removed.

mod ack;
mod close;
mod connection_id;
mod flow_control;
mod simple;
mod stream;

pub use ack::{AckFrame, EcnCounts};
pub use close::ConnectionCloseFrame;
pub use connection_id::{NewConnectionIdFrame, RetireConnectionIdFrame};
pub use flow_control::{
    DataBlockedFrame, MaxDataFrame, MaxStreamDataFrame, MaxStreamsFrame, StreamDataBlockedFrame,
    StreamsBlockedFrame,
};
pub use simple::{
    CryptoFrame, NewTokenFrame, PathChallengeFrame, PathResponseFrame, ResetStreamFrame,
    StopSendingFrame,
};
pub use stream::StreamFrame;

use crate::varint::VarInt;
use quic_wire::{DecoderBuffer, DecoderBufferResult, DecoderError, Encoder, EncoderValue};

macro_rules! tag {
    ($name:ident, $value:expr) => {
        pub const $name: u64 = $value;
    };
}

/// RFC 9000 §19 frame type codes. STREAM and the blocked-streams/max-streams
/// pairs each occupy a small range whose low bits carry flags.
pub mod tag {
    tag!(PADDING, 0x00);
    tag!(PING, 0x01);
    tag!(ACK, 0x02);
    tag!(ACK_ECN, 0x03);
    tag!(RESET_STREAM, 0x04);
    tag!(STOP_SENDING, 0x05);
    tag!(CRYPTO, 0x06);
    tag!(NEW_TOKEN, 0x07);
    tag!(STREAM_START, 0x08);
    tag!(STREAM_END, 0x0f);
    tag!(MAX_DATA, 0x10);
    tag!(MAX_STREAM_DATA, 0x11);
    tag!(MAX_STREAMS_BIDI, 0x12);
    tag!(MAX_STREAMS_UNI, 0x13);
    tag!(DATA_BLOCKED, 0x14);
    tag!(STREAM_DATA_BLOCKED, 0x15);
    tag!(STREAMS_BLOCKED_BIDI, 0x16);
    tag!(STREAMS_BLOCKED_UNI, 0x17);
    tag!(NEW_CONNECTION_ID, 0x18);
    tag!(RETIRE_CONNECTION_ID, 0x19);
    tag!(PATH_CHALLENGE, 0x1a);
    tag!(PATH_RESPONSE, 0x1b);
    tag!(CONNECTION_CLOSE_TRANSPORT, 0x1c);
    tag!(CONNECTION_CLOSE_APPLICATION, 0x1d);
    tag!(HANDSHAKE_DONE, 0x1e);
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame<'a> {
    Padding,
    Ping,
    Ack(AckFrame),
    ResetStream(ResetStreamFrame),
    StopSending(StopSendingFrame),
    Crypto(CryptoFrame<'a>),
    NewToken(NewTokenFrame<'a>),
    Stream(StreamFrame<'a>),
    MaxData(MaxDataFrame),
    MaxStreamData(MaxStreamDataFrame),
    MaxStreams(MaxStreamsFrame),
    DataBlocked(DataBlockedFrame),
    StreamDataBlocked(StreamDataBlockedFrame),
    StreamsBlocked(StreamsBlockedFrame),
    NewConnectionId(NewConnectionIdFrame),
    RetireConnectionId(RetireConnectionIdFrame),
    PathChallenge(PathChallengeFrame),
    PathResponse(PathResponseFrame),
    ConnectionClose(ConnectionCloseFrame<'a>),
    HandshakeDone,
}

impl<'a> Frame<'a> {
    /// RFC 9000 §13.2: every frame except ACK, PADDING, and
    /// CONNECTION_CLOSE elicits an acknowledgment from the peer.
    pub fn is_ack_eliciting(&self) -> bool {
        !matches!(self, Frame::Ack(_) | Frame::Padding | Frame::ConnectionClose(_))
    }

    pub fn is_congestion_controlled(&self) -> bool {
        !matches!(self, Frame::Ack(_) | Frame::Padding | Frame::ConnectionClose(_))
    }

    pub fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (tag, _) = buffer.decode::<VarInt>()?;
        match tag.as_u64() {
            tag::PADDING => {
                let (_, buffer) = buffer.decode::<VarInt>()?;
                Ok((Frame::Padding, buffer))
            }
            tag::PING => {
                let (_, buffer) = buffer.decode::<VarInt>()?;
                Ok((Frame::Ping, buffer))
            }
            tag::ACK | tag::ACK_ECN => {
                let (frame, buffer) = AckFrame::decode(buffer)?;
                Ok((Frame::Ack(frame), buffer))
            }
            tag::RESET_STREAM => {
                let (_, buffer) = buffer.decode::<VarInt>()?;
                let (frame, buffer) = ResetStreamFrame::decode(buffer)?;
                Ok((Frame::ResetStream(frame), buffer))
            }
            tag::STOP_SENDING => {
                let (_, buffer) = buffer.decode::<VarInt>()?;
                let (frame, buffer) = StopSendingFrame::decode(buffer)?;
                Ok((Frame::StopSending(frame), buffer))
            }
            tag::CRYPTO => {
                let (_, buffer) = buffer.decode::<VarInt>()?;
                let (frame, buffer) = CryptoFrame::decode(buffer)?;
                Ok((Frame::Crypto(frame), buffer))
            }
            tag::NEW_TOKEN => {
                let (_, buffer) = buffer.decode::<VarInt>()?;
                let (frame, buffer) = NewTokenFrame::decode(buffer)?;
                Ok((Frame::NewToken(frame), buffer))
            }
            t if (tag::STREAM_START..=tag::STREAM_END).contains(&t) => {
                let (frame, buffer) = StreamFrame::decode(buffer, t)?;
                Ok((Frame::Stream(frame), buffer))
            }
            tag::MAX_DATA => {
                let (_, buffer) = buffer.decode::<VarInt>()?;
                let (frame, buffer) = MaxDataFrame::decode(buffer)?;
                Ok((Frame::MaxData(frame), buffer))
            }
            tag::MAX_STREAM_DATA => {
                let (_, buffer) = buffer.decode::<VarInt>()?;
                let (frame, buffer) = MaxStreamDataFrame::decode(buffer)?;
                Ok((Frame::MaxStreamData(frame), buffer))
            }
            tag::MAX_STREAMS_BIDI | tag::MAX_STREAMS_UNI => {
                let (frame, buffer) = MaxStreamsFrame::decode(buffer)?;
                Ok((Frame::MaxStreams(frame), buffer))
            }
            tag::DATA_BLOCKED => {
                let (_, buffer) = buffer.decode::<VarInt>()?;
                let (frame, buffer) = DataBlockedFrame::decode(buffer)?;
                Ok((Frame::DataBlocked(frame), buffer))
            }
            tag::STREAM_DATA_BLOCKED => {
                let (_, buffer) = buffer.decode::<VarInt>()?;
                let (frame, buffer) = StreamDataBlockedFrame::decode(buffer)?;
                Ok((Frame::StreamDataBlocked(frame), buffer))
            }
            tag::STREAMS_BLOCKED_BIDI | tag::STREAMS_BLOCKED_UNI => {
                let (frame, buffer) = StreamsBlockedFrame::decode(buffer)?;
                Ok((Frame::StreamsBlocked(frame), buffer))
            }
            tag::NEW_CONNECTION_ID => {
                let (_, buffer) = buffer.decode::<VarInt>()?;
                let (frame, buffer) = NewConnectionIdFrame::decode(buffer)?;
                Ok((Frame::NewConnectionId(frame), buffer))
            }
            tag::RETIRE_CONNECTION_ID => {
                let (_, buffer) = buffer.decode::<VarInt>()?;
                let (frame, buffer) = RetireConnectionIdFrame::decode(buffer)?;
                Ok((Frame::RetireConnectionId(frame), buffer))
            }
            tag::PATH_CHALLENGE => {
                let (_, buffer) = buffer.decode::<VarInt>()?;
                let (frame, buffer) = PathChallengeFrame::decode(buffer)?;
                Ok((Frame::PathChallenge(frame), buffer))
            }
            tag::PATH_RESPONSE => {
                let (_, buffer) = buffer.decode::<VarInt>()?;
                let (frame, buffer) = PathResponseFrame::decode(buffer)?;
                Ok((Frame::PathResponse(frame), buffer))
            }
            tag::CONNECTION_CLOSE_TRANSPORT | tag::CONNECTION_CLOSE_APPLICATION => {
                let (frame, buffer) =
                    ConnectionCloseFrame::decode(buffer, tag.as_u64() == tag::CONNECTION_CLOSE_APPLICATION)?;
                Ok((Frame::ConnectionClose(frame), buffer))
            }
            tag::HANDSHAKE_DONE => {
                let (_, buffer) = buffer.decode::<VarInt>()?;
                Ok((Frame::HandshakeDone, buffer))
            }
            _ => Err(DecoderError::InvariantViolation("unknown frame type")),
        }
    }

    pub fn encode<E: Encoder>(&self, encoder: &mut E) {
        match self {
            Frame::Padding => VarInt::from_u8(tag::PADDING as u8).encode(encoder),
            Frame::Ping => VarInt::from_u8(tag::PING as u8).encode(encoder),
            Frame::Ack(frame) => frame.encode(encoder),
            Frame::ResetStream(frame) => {
                VarInt::from_u8(tag::RESET_STREAM as u8).encode(encoder);
                frame.encode(encoder);
            }
            Frame::StopSending(frame) => {
                VarInt::from_u8(tag::STOP_SENDING as u8).encode(encoder);
                frame.encode(encoder);
            }
            Frame::Crypto(frame) => {
                VarInt::from_u8(tag::CRYPTO as u8).encode(encoder);
                frame.encode(encoder);
            }
            Frame::NewToken(frame) => {
                VarInt::from_u8(tag::NEW_TOKEN as u8).encode(encoder);
                frame.encode(encoder);
            }
            Frame::Stream(frame) => frame.encode(encoder),
            Frame::MaxData(frame) => {
                VarInt::from_u8(tag::MAX_DATA as u8).encode(encoder);
                frame.encode(encoder);
            }
            Frame::MaxStreamData(frame) => {
                VarInt::from_u8(tag::MAX_STREAM_DATA as u8).encode(encoder);
                frame.encode(encoder);
            }
            Frame::MaxStreams(frame) => frame.encode(encoder),
            Frame::DataBlocked(frame) => {
                VarInt::from_u8(tag::DATA_BLOCKED as u8).encode(encoder);
                frame.encode(encoder);
            }
            Frame::StreamDataBlocked(frame) => {
                VarInt::from_u8(tag::STREAM_DATA_BLOCKED as u8).encode(encoder);
                frame.encode(encoder);
            }
            Frame::StreamsBlocked(frame) => frame.encode(encoder),
            Frame::NewConnectionId(frame) => {
                VarInt::from_u8(tag::NEW_CONNECTION_ID as u8).encode(encoder);
                frame.encode(encoder);
            }
            Frame::RetireConnectionId(frame) => {
                VarInt::from_u8(tag::RETIRE_CONNECTION_ID as u8).encode(encoder);
                frame.encode(encoder);
            }
            Frame::PathChallenge(frame) => {
                VarInt::from_u8(tag::PATH_CHALLENGE as u8).encode(encoder);
                frame.encode(encoder);
            }
            Frame::PathResponse(frame) => {
                VarInt::from_u8(tag::PATH_RESPONSE as u8).encode(encoder);
                frame.encode(encoder);
            }
            Frame::ConnectionClose(frame) => frame.encode(encoder),
            Frame::HandshakeDone => VarInt::from_u8(tag::HANDSHAKE_DONE as u8).encode(encoder),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quic_wire::EncoderBuffer;

    #[test]
    fn ping_and_padding_round_trip() {
        for frame in [Frame::Padding, Frame::Ping, Frame::HandshakeDone] {
            let mut storage = [0u8; 8];
            let mut encoder = EncoderBuffer::new(&mut storage);
            frame.encode(&mut encoder);
            let (decoded, remaining) = Frame::decode(DecoderBuffer::new(encoder.as_slice())).unwrap();
            assert_eq!(decoded, frame);
            assert!(remaining.is_empty());
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let bytes = [0x2f];
        let err = Frame::decode(DecoderBuffer::new(&bytes)).unwrap_err();
        assert_eq!(err, DecoderError::InvariantViolation("unknown frame type"));
    }
}
