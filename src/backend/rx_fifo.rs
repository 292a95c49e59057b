//! Driver-side receive FIFO with pattern detection
//!
//! Both drivers buffer inbound bytes here. When pattern detection is armed,
//! every terminator byte that enters the FIFO is counted and its stream
//! offset is queued. The queue is bounded; once full, further positions are
//! lost while their detections are still reported, which is how a consumer
//! ends up popping an empty queue.

use std::collections::VecDeque;

/// Result of pushing bytes into the FIFO
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushOutcome {
    /// Bytes stored
    pub accepted: usize,
    /// Terminators detected among the stored bytes
    pub patterns: usize,
    /// Bytes were discarded because the FIFO was full
    pub overflowed: bool,
}

/// Bounded byte FIFO with a pattern position queue
#[derive(Debug)]
pub struct RxFifo {
    data: VecDeque<u8>,
    capacity: usize,
    pattern: Option<u8>,
    /// Absolute stream offsets of detected terminators
    positions: VecDeque<u64>,
    queue_len: usize,
    /// Absolute stream offset of `data[0]`
    read_offset: u64,
}

impl RxFifo {
    /// Create a FIFO holding at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
            pattern: None,
            positions: VecDeque::new(),
            queue_len: 0,
            read_offset: 0,
        }
    }

    /// Arm pattern detection, discarding any queued positions
    pub fn set_pattern(&mut self, pattern: u8, queue_len: usize) {
        self.pattern = Some(pattern);
        self.queue_len = queue_len;
        self.positions = VecDeque::with_capacity(queue_len);
    }

    /// Store as many of `bytes` as fit
    pub fn push(&mut self, bytes: &[u8]) -> PushOutcome {
        let room = self.capacity - self.data.len();
        let accepted = room.min(bytes.len());
        let mut patterns = 0;

        for &byte in &bytes[..accepted] {
            if self.pattern == Some(byte) {
                patterns += 1;
                if self.positions.len() < self.queue_len {
                    let offset = self.read_offset + self.data.len() as u64;
                    self.positions.push_back(offset);
                }
            }
            self.data.push_back(byte);
        }

        PushOutcome {
            accepted,
            patterns,
            overflowed: accepted < bytes.len(),
        }
    }

    /// Pop the oldest terminator position relative to the read position
    pub fn pop_pattern_position(&mut self) -> Option<usize> {
        while let Some(offset) = self.positions.pop_front() {
            // Positions behind the read position were consumed or flushed
            if offset >= self.read_offset {
                return Some((offset - self.read_offset) as usize);
            }
        }
        None
    }

    /// Move up to `buf.len()` bytes out of the FIFO
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.data.len());
        for (dst, src) in buf.iter_mut().zip(self.data.drain(..n)) {
            *dst = src;
        }
        self.read_offset += n as u64;
        n
    }

    /// Discard all buffered bytes and queued positions
    pub fn flush(&mut self) {
        self.read_offset += self.data.len() as u64;
        self.data.clear();
        self.positions.clear();
    }

    /// Number of buffered bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if no bytes are buffered
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of queued pattern positions
    pub fn queued_positions(&self) -> usize {
        self.positions.len()
    }
}
