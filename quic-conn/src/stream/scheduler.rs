// SPDX-License-Identifier: Apache-2.0

//! Fair ordering of which stream gets to fill the next packet.
//!
//! RFC 9000 leaves scheduling policy to the implementation. This keeps two
//! round-robin rings: a meta ring for small control frames (MAX_STREAM_DATA,
//! STOP_SENDING, RESET_STREAM, STREAM_DATA_BLOCKED) that must stay responsive
//! even while a bulk transfer is running, and a data ring for STREAM frames.
//! A stream that still has data left after being serviced goes to the back
//! of the data ring rather than being drained in one pass, so one writer
//! can't starve the others out of a send.

use alloc::collections::VecDeque;
use hashbrown::HashSet;
use quic_core::stream_id::StreamId;

/// Bytes of STREAM data handed to one stream per turn through the data ring
/// before it is cycled to the back, even if more is pending.
pub const MAX_BYTES_PER_TURN: usize = 512;

#[derive(Default)]
pub struct StreamScheduler {
    meta_queue: VecDeque<StreamId>,
    meta_queued: HashSet<StreamId>,
    data_queue: VecDeque<StreamId>,
    data_queued: HashSet<StreamId>,
}

impl StreamScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_meta_pending(&mut self, id: StreamId) {
        if self.meta_queued.insert(id) {
            self.meta_queue.push_back(id);
        }
    }

    pub fn mark_data_pending(&mut self, id: StreamId) {
        if self.data_queued.insert(id) {
            self.data_queue.push_back(id);
        }
    }

    pub fn next_meta(&mut self) -> Option<StreamId> {
        let id = self.meta_queue.pop_front()?;
        self.meta_queued.remove(&id);
        Some(id)
    }

    /// Pops the next stream due for data service. Callers must follow up
    /// with `requeue_data` if more than `MAX_BYTES_PER_TURN` remains after
    /// servicing it, or let it drop out of the ring otherwise.
    pub fn next_data(&mut self) -> Option<StreamId> {
        let id = self.data_queue.pop_front()?;
        self.data_queued.remove(&id);
        Some(id)
    }

    pub fn requeue_data(&mut self, id: StreamId) {
        self.mark_data_pending(id);
    }

    pub fn has_meta_pending(&self) -> bool {
        !self.meta_queue.is_empty()
    }

    pub fn has_data_pending(&self) -> bool {
        !self.data_queue.is_empty()
    }

    /// Drops a stream from both rings; called once it's removed from the
    /// manager entirely and will never be serviced again.
    pub fn remove(&mut self, id: StreamId) {
        self.meta_queued.remove(&id);
        self.data_queued.remove(&id);
        self.meta_queue.retain(|&x| x != id);
        self.data_queue.retain(|&x| x != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quic_core::stream_id::{Direction, Side};

    fn id(n: u64) -> StreamId {
        StreamId::nth(Side::Client, Direction::Bidirectional, n).unwrap()
    }

    #[test]
    fn data_ring_is_round_robin() {
        let mut sched = StreamScheduler::new();
        sched.mark_data_pending(id(0));
        sched.mark_data_pending(id(1));
        assert_eq!(sched.next_data(), Some(id(0)));
        sched.requeue_data(id(0));
        assert_eq!(sched.next_data(), Some(id(1)));
        assert_eq!(sched.next_data(), Some(id(0)));
    }

    #[test]
    fn marking_pending_twice_does_not_duplicate_entries() {
        let mut sched = StreamScheduler::new();
        sched.mark_meta_pending(id(0));
        sched.mark_meta_pending(id(0));
        assert_eq!(sched.next_meta(), Some(id(0)));
        assert_eq!(sched.next_meta(), None);
    }

    #[test]
    fn removed_streams_drop_out_of_both_rings() {
        let mut sched = StreamScheduler::new();
        sched.mark_meta_pending(id(0));
        sched.mark_data_pending(id(0));
        sched.remove(id(0));
        assert!(!sched.has_meta_pending());
        assert!(!sched.has_data_pending());
    }
}
