// SPDX-License-Identifier: Apache-2.0

//! Stream lifecycle and limit bookkeeping: local stream creation against
//! the peer's advertised limits, implicit opening of lower-numbered remote
//! streams, and the combined send/receive state each stream id maps to.

use super::{recv::RecvBuffer, send::SendBuffer};
use crate::{error::LocalError, gate::Gate};
use hashbrown::HashMap;
use quic_core::{
    stream_id::{Direction, Side, StreamId},
    transport_error,
};

/// `Direction` has exactly two inhabitants; a map would be overkill.
#[derive(Clone, Copy, Debug, Default)]
struct PerDirection<T> {
    bidi: T,
    uni: T,
}

impl<T> PerDirection<T> {
    fn get(&self, direction: Direction) -> &T {
        match direction {
            Direction::Bidirectional => &self.bidi,
            Direction::Unidirectional => &self.uni,
        }
    }

    fn get_mut(&mut self, direction: Direction) -> &mut T {
        match direction {
            Direction::Bidirectional => &mut self.bidi,
            Direction::Unidirectional => &mut self.uni,
        }
    }
}

pub struct Stream {
    pub send: Option<SendBuffer>,
    pub recv: Option<RecvBuffer>,
    pub readable_gate: Gate,
    pub writable_gate: Gate,
}

impl Stream {
    fn bidirectional(peer_max_stream_data: u64, local_max_stream_data: u64) -> Self {
        Self {
            send: Some(SendBuffer::new(peer_max_stream_data)),
            recv: Some(RecvBuffer::new(local_max_stream_data)),
            readable_gate: Gate::new(false),
            writable_gate: Gate::new(true),
        }
    }

    fn send_only(peer_max_stream_data: u64) -> Self {
        Self {
            send: Some(SendBuffer::new(peer_max_stream_data)),
            recv: None,
            readable_gate: Gate::new(false),
            writable_gate: Gate::new(true),
        }
    }

    fn recv_only(local_max_stream_data: u64) -> Self {
        Self {
            send: None,
            recv: Some(RecvBuffer::new(local_max_stream_data)),
            readable_gate: Gate::new(false),
            writable_gate: Gate::new(true),
        }
    }

    pub fn is_send_only(&self) -> bool {
        self.send.is_some() && self.recv.is_none()
    }

    pub fn is_recv_only(&self) -> bool {
        self.send.is_none() && self.recv.is_some()
    }
}

pub struct StreamManager {
    local_side: Side,
    streams: HashMap<StreamId, Stream>,
    /// Highest remote stream number implicitly opened so far, per
    /// direction; used to detect which lower-numbered ids still need
    /// implicit creation (RFC 9000 §2.1).
    remote_high_water: PerDirection<Option<u64>>,
    local_next: PerDirection<u64>,
    peer_max_streams: PerDirection<u64>,
    local_max_streams: PerDirection<u64>,
    accept_queue: alloc::collections::VecDeque<StreamId>,
    default_peer_max_stream_data: u64,
    default_local_max_stream_data: u64,
}

impl StreamManager {
    pub fn new(
        local_side: Side,
        peer_max_bidi_streams: u64,
        peer_max_uni_streams: u64,
        local_max_bidi_streams: u64,
        local_max_uni_streams: u64,
        default_peer_max_stream_data: u64,
        default_local_max_stream_data: u64,
    ) -> Self {
        Self {
            local_side,
            streams: HashMap::new(),
            remote_high_water: PerDirection::default(),
            local_next: PerDirection::default(),
            peer_max_streams: PerDirection {
                bidi: peer_max_bidi_streams,
                uni: peer_max_uni_streams,
            },
            local_max_streams: PerDirection {
                bidi: local_max_bidi_streams,
                uni: local_max_uni_streams,
            },
            accept_queue: alloc::collections::VecDeque::new(),
            default_peer_max_stream_data,
            default_local_max_stream_data,
        }
    }

    /// Opens the next locally-initiated stream, failing if doing so would
    /// exceed the peer's advertised MAX_STREAMS for this direction.
    pub fn open_local(&mut self, direction: Direction) -> Result<StreamId, LocalError> {
        let number = *self.local_next.get(direction);
        let limit = *self.peer_max_streams.get(direction);
        if number >= limit {
            return Err(LocalError::new(transport_error::Error::STREAM_LIMIT_ERROR));
        }

        let id = StreamId::nth(self.local_side, direction, number)
            .ok_or_else(|| LocalError::new(transport_error::Error::STREAM_LIMIT_ERROR))?;
        let stream = match direction {
            Direction::Bidirectional => {
                Stream::bidirectional(self.default_peer_max_stream_data, self.default_local_max_stream_data)
            }
            Direction::Unidirectional => Stream::send_only(self.default_peer_max_stream_data),
        };
        self.streams.insert(id, stream);
        *self.local_next.get_mut(direction) = number + 1;
        Ok(id)
    }

    pub fn on_peer_max_streams(&mut self, direction: Direction, maximum: u64) {
        let entry = self.peer_max_streams.get_mut(direction);
        *entry = (*entry).max(maximum);
    }

    /// Implicitly opens every remote stream of `id`'s initiator/direction
    /// up to and including `id`, per RFC 9000 §2.1. Already-open streams
    /// are left untouched; returns an error if `id` exceeds what this
    /// endpoint has advertised as its own MAX_STREAMS.
    pub fn open_remote_implicit(&mut self, id: StreamId) -> Result<(), LocalError> {
        if id.is_initiated_by(self.local_side) {
            // a "remote" frame referencing a locally-initiated id must
            // already have an entry, or it names a stream never opened
            return if self.streams.contains_key(&id) {
                Ok(())
            } else {
                Err(LocalError::new(transport_error::Error::STREAM_STATE_ERROR))
            };
        }

        let direction = id.direction();
        let limit = *self.local_max_streams.get(direction);
        if id.stream_number() >= limit {
            return Err(LocalError::new(transport_error::Error::STREAM_LIMIT_ERROR));
        }

        let high_water = *self.remote_high_water.get(direction);
        if let Some(hw) = high_water {
            if id.stream_number() <= hw {
                return Ok(());
            }
        }
        let start = high_water.map_or(0, |hw| hw + 1);

        for number in start..=id.stream_number() {
            let opened_id = StreamId::nth(id.initiator(), direction, number).expect("within varint range");
            let stream = match direction {
                Direction::Bidirectional => {
                    Stream::bidirectional(self.default_peer_max_stream_data, self.default_local_max_stream_data)
                }
                Direction::Unidirectional => Stream::recv_only(self.default_local_max_stream_data),
            };
            self.streams.insert(opened_id, stream);
            self.accept_queue.push_back(opened_id);
        }
        *self.remote_high_water.get_mut(direction) = Some(id.stream_number());
        Ok(())
    }

    pub fn accept(&mut self) -> Option<StreamId> {
        self.accept_queue.pop_front()
    }

    pub fn get(&self, id: StreamId) -> Option<&Stream> {
        self.streams.get(&id)
    }

    pub fn get_mut(&mut self, id: StreamId) -> Option<&mut Stream> {
        self.streams.get_mut(&id)
    }

    pub fn remove(&mut self, id: StreamId) {
        self.streams.remove(&id);
    }

    /// How many additional streams of this direction this endpoint may
    /// advertise being willing to accept, used to decide whether a
    /// MAX_STREAMS update is due.
    pub fn local_max_streams(&self, direction: Direction) -> u64 {
        *self.local_max_streams.get(direction)
    }

    pub fn raise_local_max_streams(&mut self, direction: Direction, new_limit: u64) {
        let entry = self.local_max_streams.get_mut(direction);
        *entry = (*entry).max(new_limit);
    }

    pub fn ids(&self) -> impl Iterator<Item = StreamId> + '_ {
        self.streams.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> StreamManager {
        StreamManager::new(Side::Server, 2, 2, 100, 100, 1024, 1024)
    }

    #[test]
    fn local_open_respects_peer_limit() {
        let mut mgr = manager();
        assert!(mgr.open_local(Direction::Bidirectional).is_ok());
        assert!(mgr.open_local(Direction::Bidirectional).is_ok());
        assert!(mgr.open_local(Direction::Bidirectional).is_err());
    }

    #[test]
    fn remote_open_implicitly_opens_lower_numbered_streams() {
        let mut mgr = manager();
        let fifth = StreamId::nth(Side::Client, Direction::Bidirectional, 4).unwrap();
        mgr.raise_local_max_streams(Direction::Bidirectional, 10);
        mgr.open_remote_implicit(fifth).unwrap();
        for n in 0..=4 {
            let id = StreamId::nth(Side::Client, Direction::Bidirectional, n).unwrap();
            assert!(mgr.get(id).is_some());
        }
        assert_eq!(mgr.accept().unwrap(), StreamId::nth(Side::Client, Direction::Bidirectional, 0).unwrap());
    }

    #[test]
    fn remote_open_beyond_local_limit_is_rejected() {
        let mut mgr = manager();
        let id = StreamId::nth(Side::Client, Direction::Bidirectional, 200).unwrap();
        assert!(mgr.open_remote_implicit(id).is_err());
    }
}
