// SPDX-License-Identifier: Apache-2.0

//! The receive side of a stream: reassembles out-of-order STREAM frames
//! into a contiguous byte sequence the application reads from, and tracks
//! how much flow-control credit to return to the peer.

use crate::error::LocalError;
use alloc::{collections::BTreeMap, vec::Vec};
use quic_core::{interval_set::RangeSet, transport_error, varint::VarInt};

pub struct RecvBuffer {
    /// Out-of-order chunks keyed by their stream offset; contiguous data is
    /// drained out of here into `ready` as gaps close.
    chunks: BTreeMap<u64, Vec<u8>>,
    ready: alloc::collections::VecDeque<u8>,
    received: RangeSet,
    read_offset: u64,
    final_size: Option<u64>,
    max_stream_data_sent: u64,
    max_stream_data_window: u64,
    reset_error_code: Option<VarInt>,
    stop_sending_error_code: Option<VarInt>,
}

impl RecvBuffer {
    pub fn new(max_stream_data_window: u64) -> Self {
        Self {
            chunks: BTreeMap::new(),
            ready: alloc::collections::VecDeque::new(),
            received: RangeSet::new(),
            read_offset: 0,
            final_size: None,
            max_stream_data_sent: max_stream_data_window,
            max_stream_data_window,
            reset_error_code: None,
            stop_sending_error_code: None,
        }
    }

    pub fn max_stream_data_sent(&self) -> u64 {
        self.max_stream_data_sent
    }

    /// Accepts a STREAM frame's payload. Rejects data beyond the
    /// advertised window or that contradicts an already-known final size.
    pub fn on_stream_frame(&mut self, offset: u64, data: &[u8], is_fin: bool) -> Result<(), LocalError> {
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| LocalError::new(transport_error::Error::FRAME_ENCODING_ERROR))?;

        if end > self.max_stream_data_sent {
            return Err(LocalError::new(transport_error::Error::FLOW_CONTROL_ERROR));
        }
        if let Some(final_size) = self.final_size {
            if end > final_size || (is_fin && end != final_size) {
                return Err(LocalError::new(transport_error::Error::FINAL_SIZE_ERROR));
            }
        }
        if is_fin {
            self.final_size = Some(end);
        }

        if end > offset {
            self.received.insert(offset, end);
            if offset >= self.read_offset {
                self.chunks.insert(offset, data.to_vec());
            } else if end > self.read_offset {
                let skip = (self.read_offset - offset) as usize;
                self.chunks.insert(self.read_offset, data[skip..].to_vec());
            }
        }

        self.drain_contiguous();
        Ok(())
    }

    fn drain_contiguous(&mut self) {
        loop {
            let next_offset = match self.chunks.keys().next() {
                Some(&offset) if offset == self.read_offset => offset,
                _ => break,
            };
            let chunk = self.chunks.remove(&next_offset).unwrap();
            self.read_offset += chunk.len() as u64;
            self.ready.extend(chunk);
        }
    }

    pub fn readable_len(&self) -> usize {
        self.ready.len()
    }

    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.ready.len());
        for slot in out.iter_mut().take(n) {
            *slot = self.ready.pop_front().unwrap();
        }
        n
    }

    /// True once every byte up to the final size has been delivered to the
    /// application.
    pub fn is_finished(&self) -> bool {
        matches!(self.final_size, Some(size) if self.read_offset >= size && self.ready.is_empty())
    }

    pub fn on_reset(&mut self, error_code: VarInt, final_size: u64) -> Result<(), LocalError> {
        if let Some(existing) = self.final_size {
            if existing != final_size {
                return Err(LocalError::new(transport_error::Error::FINAL_SIZE_ERROR));
            }
        }
        self.final_size = Some(final_size);
        self.reset_error_code = Some(error_code);
        self.chunks.clear();
        self.ready.clear();
        Ok(())
    }

    pub fn reset_error_code(&self) -> Option<VarInt> {
        self.reset_error_code
    }

    pub fn request_stop_sending(&mut self, error_code: VarInt) {
        self.stop_sending_error_code.get_or_insert(error_code);
    }

    pub fn pending_stop_sending(&self) -> Option<VarInt> {
        self.stop_sending_error_code
    }

    /// RFC 9000 §4.1: once the window the application has freed by reading
    /// exceeds an eighth of the total window, advertise a new limit rather
    /// than trickling out MAX_STREAM_DATA updates for every read.
    pub fn credit_update(&mut self) -> Option<u64> {
        let consumed = self.read_offset;
        let new_limit = consumed + self.max_stream_data_window;
        if new_limit >= self.max_stream_data_sent + self.max_stream_data_window / 8 {
            self.max_stream_data_sent = new_limit;
            Some(new_limit)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_data_is_immediately_readable() {
        let mut recv = RecvBuffer::new(1024);
        recv.on_stream_frame(0, b"hello", false).unwrap();
        assert_eq!(recv.readable_len(), 5);
    }

    #[test]
    fn out_of_order_data_waits_for_the_gap_to_close() {
        let mut recv = RecvBuffer::new(1024);
        recv.on_stream_frame(5, b"world", false).unwrap();
        assert_eq!(recv.readable_len(), 0);
        recv.on_stream_frame(0, b"hello", false).unwrap();
        assert_eq!(recv.readable_len(), 10);
    }

    #[test]
    fn data_beyond_the_window_is_a_flow_control_error() {
        let mut recv = RecvBuffer::new(4);
        assert!(recv.on_stream_frame(0, b"hello", false).is_err());
    }

    #[test]
    fn conflicting_final_size_is_rejected() {
        let mut recv = RecvBuffer::new(1024);
        recv.on_stream_frame(0, b"hi", true).unwrap();
        assert!(recv.on_stream_frame(5, b"more", false).is_err());
    }

    #[test]
    fn finishes_once_all_bytes_up_to_fin_are_read() {
        let mut recv = RecvBuffer::new(1024);
        recv.on_stream_frame(0, b"hi", true).unwrap();
        let mut buf = [0u8; 2];
        recv.read(&mut buf);
        assert!(recv.is_finished());
    }
}
