// SPDX-License-Identifier: Apache-2.0

//! Connection- and stream-level flow control frames (RFC 9000 §19.9-§19.14).

use super::tag;
use crate::varint::VarInt;
use quic_wire::{DecoderBuffer, DecoderBufferResult, Encoder, EncoderValue};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaxDataFrame {
    pub maximum_data: VarInt,
}

impl MaxDataFrame {
    pub fn decode(buffer: DecoderBuffer) -> DecoderBufferResult<Self> {
        let (maximum_data, buffer) = buffer.decode::<VarInt>()?;
        Ok((MaxDataFrame { maximum_data }, buffer))
    }

    pub fn encode<E: Encoder>(&self, encoder: &mut E) {
        self.maximum_data.encode(encoder);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaxStreamDataFrame {
    pub stream_id: VarInt,
    pub maximum_stream_data: VarInt,
}

impl MaxStreamDataFrame {
    pub fn decode(buffer: DecoderBuffer) -> DecoderBufferResult<Self> {
        let (stream_id, buffer) = buffer.decode::<VarInt>()?;
        let (maximum_stream_data, buffer) = buffer.decode::<VarInt>()?;
        Ok((
            MaxStreamDataFrame {
                stream_id,
                maximum_stream_data,
            },
            buffer,
        ))
    }

    pub fn encode<E: Encoder>(&self, encoder: &mut E) {
        self.stream_id.encode(encoder);
        self.maximum_stream_data.encode(encoder);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaxStreamsFrame {
    pub is_unidirectional: bool,
    pub maximum_streams: VarInt,
}

impl MaxStreamsFrame {
    pub fn decode(buffer: DecoderBuffer) -> DecoderBufferResult<Self> {
        let (raw_tag, buffer) = buffer.decode::<VarInt>()?;
        let (maximum_streams, buffer) = buffer.decode::<VarInt>()?;
        Ok((
            MaxStreamsFrame {
                is_unidirectional: raw_tag.as_u64() == tag::MAX_STREAMS_UNI,
                maximum_streams,
            },
            buffer,
        ))
    }

    pub fn encode<E: Encoder>(&self, encoder: &mut E) {
        let t = if self.is_unidirectional {
            tag::MAX_STREAMS_UNI
        } else {
            tag::MAX_STREAMS_BIDI
        };
        VarInt::from_u8(t as u8).encode(encoder);
        self.maximum_streams.encode(encoder);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DataBlockedFrame {
    pub maximum_data: VarInt,
}

impl DataBlockedFrame {
    pub fn decode(buffer: DecoderBuffer) -> DecoderBufferResult<Self> {
        let (maximum_data, buffer) = buffer.decode::<VarInt>()?;
        Ok((DataBlockedFrame { maximum_data }, buffer))
    }

    pub fn encode<E: Encoder>(&self, encoder: &mut E) {
        self.maximum_data.encode(encoder);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamDataBlockedFrame {
    pub stream_id: VarInt,
    pub maximum_stream_data: VarInt,
}

impl StreamDataBlockedFrame {
    pub fn decode(buffer: DecoderBuffer) -> DecoderBufferResult<Self> {
        let (stream_id, buffer) = buffer.decode::<VarInt>()?;
        let (maximum_stream_data, buffer) = buffer.decode::<VarInt>()?;
        Ok((
            StreamDataBlockedFrame {
                stream_id,
                maximum_stream_data,
            },
            buffer,
        ))
    }

    pub fn encode<E: Encoder>(&self, encoder: &mut E) {
        self.stream_id.encode(encoder);
        self.maximum_stream_data.encode(encoder);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamsBlockedFrame {
    pub is_unidirectional: bool,
    pub maximum_streams: VarInt,
}

impl StreamsBlockedFrame {
    pub fn decode(buffer: DecoderBuffer) -> DecoderBufferResult<Self> {
        let (raw_tag, buffer) = buffer.decode::<VarInt>()?;
        let (maximum_streams, buffer) = buffer.decode::<VarInt>()?;
        Ok((
            StreamsBlockedFrame {
                is_unidirectional: raw_tag.as_u64() == tag::STREAMS_BLOCKED_UNI,
                maximum_streams,
            },
            buffer,
        ))
    }

    pub fn encode<E: Encoder>(&self, encoder: &mut E) {
        let t = if self.is_unidirectional {
            tag::STREAMS_BLOCKED_UNI
        } else {
            tag::STREAMS_BLOCKED_BIDI
        };
        VarInt::from_u8(t as u8).encode(encoder);
        self.maximum_streams.encode(encoder);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quic_wire::EncoderBuffer;

    #[test]
    fn max_streams_round_trips_both_directions() {
        for is_unidirectional in [false, true] {
            let frame = MaxStreamsFrame {
                is_unidirectional,
                maximum_streams: VarInt::new(16).unwrap(),
            };
            let mut storage = [0u8; 16];
            let mut encoder = EncoderBuffer::new(&mut storage);
            frame.encode(&mut encoder);
            let (decoded, _) = MaxStreamsFrame::decode(DecoderBuffer::new(encoder.as_slice())).unwrap();
            assert_eq!(decoded, frame);
        }
    }
}
