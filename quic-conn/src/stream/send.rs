// SPDX-License-Identifier: Apache-2.0

//! The send side of a stream: buffered bytes waiting to go out, tracked as
//! an offset rangeset so loss and retransmission never need to touch the
//! byte storage directly.

use crate::error::LocalError;
use alloc::{collections::VecDeque, vec::Vec};
use quic_core::{interval_set::RangeSet, transport_error, varint::VarInt};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendState {
    Ready,
    /// A RESET_STREAM has been queued or sent; no further data is sendable.
    Reset,
}

pub struct SendBuffer {
    data: VecDeque<u8>,
    /// Stream offset of `data[0]`.
    base_offset: u64,
    /// Stream offset one past the last byte ever written.
    write_offset: u64,
    /// Offsets within `[base_offset, write_offset)` still needing (re)send.
    unsent: RangeSet,
    /// Offsets acknowledged by the peer; once a prefix from `base_offset`
    /// is fully acked it is popped out of `data`.
    acked: RangeSet,
    peer_max_stream_data: u64,
    final_size: Option<u64>,
    state: SendState,
    reset_error_code: Option<VarInt>,
}

impl SendBuffer {
    pub fn new(peer_max_stream_data: u64) -> Self {
        Self {
            data: VecDeque::new(),
            base_offset: 0,
            write_offset: 0,
            unsent: RangeSet::new(),
            acked: RangeSet::new(),
            peer_max_stream_data,
            final_size: None,
            state: SendState::Ready,
            reset_error_code: None,
        }
    }

    pub fn state(&self) -> SendState {
        self.state
    }

    pub fn write_offset(&self) -> u64 {
        self.write_offset
    }

    pub fn is_flow_blocked(&self) -> bool {
        self.write_offset >= self.peer_max_stream_data
    }

    pub fn on_max_stream_data(&mut self, new_limit: u64) {
        self.peer_max_stream_data = self.peer_max_stream_data.max(new_limit);
    }

    /// Buffers `bytes`, truncated to whatever fits under the peer's
    /// advertised stream data limit. Returns the number of bytes accepted;
    /// the caller is responsible for suspending the writer on a short
    /// write via the stream's gate.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        if self.state == SendState::Reset || self.final_size.is_some() {
            return 0;
        }
        let budget = self.peer_max_stream_data.saturating_sub(self.write_offset) as usize;
        let accepted = bytes.len().min(budget);
        if accepted == 0 {
            return 0;
        }
        self.data.extend(&bytes[..accepted]);
        self.unsent.insert(self.write_offset, self.write_offset + accepted as u64);
        self.write_offset += accepted as u64;
        accepted
    }

    /// Marks the stream as having no more data after what has already been
    /// written; the next `pending_range` call that drains through
    /// `write_offset` carries the FIN bit.
    pub fn finish(&mut self) {
        if self.state == SendState::Reset {
            return;
        }
        self.final_size = Some(self.write_offset);
    }

    pub fn final_size(&self) -> Option<u64> {
        self.final_size
    }

    /// RFC 9000 §3.2: resets drop all buffered data immediately; only the
    /// final size the peer needs for flow-control accounting is retained.
    pub fn reset(&mut self, error_code: VarInt) -> u64 {
        let final_size = self.write_offset;
        self.data.clear();
        self.unsent = RangeSet::new();
        self.acked = RangeSet::new();
        self.final_size = Some(final_size);
        self.state = SendState::Reset;
        self.reset_error_code = Some(error_code);
        final_size
    }

    pub fn reset_error_code(&self) -> Option<VarInt> {
        self.reset_error_code
    }

    /// Returns the next chunk of at most `max_len` bytes still needing to
    /// be sent, along with whether it carries the FIN bit, without
    /// removing it from `unsent` (that happens once the packet carrying it
    /// is acknowledged or declared lost).
    pub fn pending_range(&self, max_len: usize) -> Option<(u64, Vec<u8>, bool)> {
        if self.state == SendState::Reset {
            return None;
        }
        let range = self.unsent.iter().next()?;
        let end = range.end.min(range.start + max_len as u64);
        let start_index = (range.start - self.base_offset) as usize;
        let end_index = (end - self.base_offset) as usize;
        let chunk: Vec<u8> = self
            .data
            .iter()
            .skip(start_index)
            .take(end_index - start_index)
            .copied()
            .collect();
        let is_fin = self.final_size == Some(end) && end == range.end;
        Some((range.start, chunk, is_fin))
    }

    pub fn has_pending(&self) -> bool {
        !self.unsent.is_empty()
    }

    pub fn on_sent(&mut self, offset: u64, len: u64) {
        self.unsent.remove(offset, offset + len);
    }

    pub fn on_lost(&mut self, offset: u64, len: u64) {
        if offset + len > self.base_offset {
            self.unsent.insert(offset.max(self.base_offset), offset + len);
        }
    }

    pub fn on_acked(&mut self, offset: u64, len: u64) -> Result<(), LocalError> {
        if offset + len > self.write_offset {
            return Err(LocalError::new(transport_error::Error::PROTOCOL_VIOLATION));
        }
        self.acked.insert(offset, offset + len);
        self.unsent.remove(offset, offset + len);

        while self.acked.contains(self.base_offset) && self.base_offset < self.write_offset {
            self.data.pop_front();
            self.base_offset += 1;
        }
        Ok(())
    }

    pub fn is_fully_acked(&self) -> bool {
        matches!(self.final_size, Some(size) if self.acked.is_range(0, size) || size == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_is_capped_by_peer_flow_limit() {
        let mut send = SendBuffer::new(4);
        assert_eq!(send.write(b"hello"), 4);
        assert!(send.is_flow_blocked());
    }

    #[test]
    fn raising_the_limit_unblocks_writes() {
        let mut send = SendBuffer::new(4);
        send.write(b"hello");
        send.on_max_stream_data(10);
        assert_eq!(send.write(b"!!"), 2);
    }

    #[test]
    fn pending_range_carries_fin_once_finished() {
        let mut send = SendBuffer::new(100);
        send.write(b"hi");
        send.finish();
        let (offset, chunk, is_fin) = send.pending_range(100).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(chunk, b"hi");
        assert!(is_fin);
    }

    #[test]
    fn lost_ranges_return_to_unsent() {
        let mut send = SendBuffer::new(100);
        send.write(b"hi");
        send.on_sent(0, 2);
        assert!(!send.has_pending());
        send.on_lost(0, 2);
        assert!(send.has_pending());
    }

    #[test]
    fn acked_prefix_is_reclaimed_from_the_buffer() {
        let mut send = SendBuffer::new(100);
        send.write(b"hello");
        send.on_sent(0, 5);
        send.on_acked(0, 5).unwrap();
        assert_eq!(send.write_offset(), 5);
    }

    #[test]
    fn reset_drops_buffered_data_and_reports_final_size() {
        let mut send = SendBuffer::new(100);
        send.write(b"hello");
        let final_size = send.reset(VarInt::from_u8(1));
        assert_eq!(final_size, 5);
        assert_eq!(send.state(), SendState::Reset);
        assert!(!send.has_pending());
    }
}
