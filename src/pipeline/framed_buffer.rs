//! Bounded buffer of framed byte chunks
//!
//! A [`FramedBuffer`] is a fixed-capacity byte arena organized as a ring of
//! variable-length records. It is the only state shared between a port's
//! event task (the producer) and the consumers pulling lines out of it.
//!
//! # Protocol
//!
//! 1. [`FramedBuffer::acquire`] reserves contiguous space and returns a
//!    [`WritableChunk`], waiting up to a timeout for space to free up
//! 2. The producer fills it and calls [`WritableChunk::commit`]
//! 3. [`FramedBuffer::receive`] hands out committed chunks in commit order as
//!    [`FramedChunk`]s, waiting up to a timeout
//! 4. Dropping a `FramedChunk` (or [`FramedBuffer::release`]) gives its
//!    space back
//!
//! Handles carry only an offset and length into the arena plus a sequence
//! number; the arena itself is never exposed. Records are never split
//! across the end of the arena. Space is reclaimed from the oldest end of
//! the ring only, so a chunk released early is held until every chunk
//! allocated before it has been released as well.
//!
//! A `WritableChunk` dropped without committing gives its space back and is
//! never delivered.
//!
//! [`FramedBuffer::close`] marks the end of the stream: receivers blocked in
//! `receive` wake up, drain what was committed, then get
//! [`ReceiveError::Closed`].
//!
//! # Example
//!
//! ```ignore
//! let buffer = FramedBuffer::with_capacity(4096)?;
//!
//! let mut chunk = buffer.acquire(5, Duration::from_millis(300))?;
//! chunk.as_mut_slice().copy_from_slice(b"hello");
//! chunk.commit();
//!
//! let line = buffer.receive(WAIT_FOREVER)?;
//! assert_eq!(line.as_bytes(), b"hello");
//! buffer.release(line);
//! ```

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Timeout value that waits without limit
pub const WAIT_FOREVER: Duration = Duration::MAX;

/// Why [`FramedBuffer::acquire`] failed
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireError {
    /// Space did not free up before the deadline
    #[error("timed out waiting for buffer space")]
    Timeout,

    /// Zero-length chunks are not allowed
    #[error("zero-length chunk requested")]
    ZeroLength,

    /// The request can never fit
    #[error("chunk of {requested} bytes exceeds buffer capacity {capacity}")]
    TooLarge { requested: usize, capacity: usize },
}

/// Why [`FramedBuffer::receive`] returned no chunk
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveError {
    /// Nothing was committed before the deadline
    #[error("timed out waiting for a chunk")]
    Timeout,

    /// The buffer was closed and every committed chunk has been received
    #[error("buffer closed")]
    Closed,
}

/// The arena could not be allocated
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("failed to allocate a {capacity} byte buffer")]
pub struct AllocError {
    pub capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordState {
    Writing,
    Committed,
    Delivered,
    Released,
}

#[derive(Debug)]
struct Record {
    seq: u64,
    offset: usize,
    len: usize,
    prefix_len: usize,
    state: RecordState,
}

/// Ring bookkeeping, guarded by the buffer mutex
#[derive(Debug, Default)]
struct Ring {
    /// Unreclaimed records in allocation order
    records: VecDeque<Record>,
    /// Committed, undelivered sequence numbers in commit order
    ready: VecDeque<u64>,
    next_seq: u64,
    /// Bytes held by unreclaimed records
    used: usize,
    /// No more chunks will be committed
    closed: bool,
}

impl Ring {
    fn record_mut(&mut self, seq: u64) -> &mut Record {
        let first = self.records.front().map_or(seq, |r| r.seq);
        let index = (seq - first) as usize;
        &mut self.records[index]
    }

    /// Offset of a contiguous free region of `len` bytes, if one exists
    fn find_space(&self, len: usize, capacity: usize) -> Option<usize> {
        let (Some(front), Some(back)) = (self.records.front(), self.records.back()) else {
            return (len <= capacity).then_some(0);
        };
        let head = front.offset;
        let tail = back.offset + back.len;

        if back.offset < front.offset {
            // Wrapped: live data in [head, end) and [0, tail)
            (tail + len <= head).then_some(tail)
        } else if tail + len <= capacity {
            Some(tail)
        } else if len <= head {
            Some(0)
        } else {
            None
        }
    }

    fn allocate(&mut self, offset: usize, len: usize) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.used += len;
        self.records.push_back(Record {
            seq,
            offset,
            len,
            prefix_len: 0,
            state: RecordState::Writing,
        });
        seq
    }

    /// Drop released records from the oldest end. Returns true if any space was freed.
    fn reclaim(&mut self) -> bool {
        let mut freed = false;
        while self
            .records
            .front()
            .is_some_and(|r| r.state == RecordState::Released)
        {
            if let Some(record) = self.records.pop_front() {
                self.used -= record.len;
                freed = true;
            }
        }
        freed
    }
}

/// Backing storage. Regions are only touched through handles that the ring
/// bookkeeping keeps disjoint.
struct Arena {
    cells: Box<[UnsafeCell<u8>]>,
}

// SAFETY: the bytes of a record are accessed only by the single handle that
// owns the record (a `WritableChunk` while writing, then a `FramedChunk` after
// delivery). The ring never hands out overlapping live records, and ownership
// of a record moves between threads only through the mutex-protected ring.
unsafe impl Sync for Arena {}

impl Arena {
    fn new(capacity: usize) -> Result<Self, AllocError> {
        let mut cells = Vec::new();
        cells
            .try_reserve_exact(capacity)
            .map_err(|_| AllocError { capacity })?;
        cells.resize_with(capacity, || UnsafeCell::new(0));
        Ok(Self {
            cells: cells.into_boxed_slice(),
        })
    }

    fn base(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.cells.as_ptr())
    }

    /// # Safety
    /// `offset..offset + len` must lie inside the arena and belong to a record
    /// owned by the caller.
    unsafe fn slice(&self, offset: usize, len: usize) -> &[u8] {
        debug_assert!(offset + len <= self.cells.len());
        std::slice::from_raw_parts(self.base().add(offset), len)
    }

    /// # Safety
    /// Same as [`Arena::slice`], and no other reference to the region may exist.
    #[allow(clippy::mut_from_ref)]
    unsafe fn slice_mut(&self, offset: usize, len: usize) -> &mut [u8] {
        debug_assert!(offset + len <= self.cells.len());
        std::slice::from_raw_parts_mut(self.base().add(offset), len)
    }
}

struct Inner {
    arena: Arena,
    capacity: usize,
    ring: Mutex<Ring>,
    space_freed: Condvar,
    committed: Condvar,
}

impl Inner {
    fn release(&self, seq: u64) {
        let freed = {
            let mut ring = self.ring.lock();
            ring.record_mut(seq).state = RecordState::Released;
            ring.reclaim()
        };
        if freed {
            self.space_freed.notify_all();
        }
    }
}

/// Bounded single-producer, multi-consumer chunk buffer
///
/// Cloning yields another handle to the same buffer.
#[derive(Clone)]
pub struct FramedBuffer {
    inner: Arc<Inner>,
}

impl FramedBuffer {
    /// Allocate a buffer of `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Result<Self, AllocError> {
        if capacity == 0 {
            return Err(AllocError { capacity });
        }
        Ok(Self {
            inner: Arc::new(Inner {
                arena: Arena::new(capacity)?,
                capacity,
                ring: Mutex::new(Ring::default()),
                space_freed: Condvar::new(),
                committed: Condvar::new(),
            }),
        })
    }

    /// Total arena size in bytes
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Bytes held by chunks not yet reclaimed
    pub fn used(&self) -> usize {
        self.inner.ring.lock().used
    }

    /// Committed chunks waiting to be received
    pub fn pending(&self) -> usize {
        self.inner.ring.lock().ready.len()
    }

    /// Reserve `len` contiguous bytes, waiting up to `timeout` for space
    pub fn acquire(&self, len: usize, timeout: Duration) -> Result<WritableChunk, AcquireError> {
        if len == 0 {
            return Err(AcquireError::ZeroLength);
        }
        if len > self.inner.capacity {
            return Err(AcquireError::TooLarge {
                requested: len,
                capacity: self.inner.capacity,
            });
        }

        let deadline = Instant::now().checked_add(timeout);
        let mut ring = self.inner.ring.lock();
        loop {
            if let Some(offset) = ring.find_space(len, self.inner.capacity) {
                let seq = ring.allocate(offset, len);
                return Ok(WritableChunk {
                    buffer: self.clone(),
                    seq,
                    offset,
                    len,
                    prefix_len: 0,
                    committed: false,
                });
            }
            if !wait(&self.inner.space_freed, &mut ring, deadline) {
                return Err(AcquireError::Timeout);
            }
        }
    }

    /// Reserve space without waiting
    pub fn try_acquire(&self, len: usize) -> Result<WritableChunk, AcquireError> {
        self.acquire(len, Duration::ZERO)
    }

    /// Publish a filled chunk. Same as [`WritableChunk::commit`].
    pub fn commit(&self, chunk: WritableChunk) {
        chunk.commit();
    }

    /// Take the oldest committed chunk, waiting up to `timeout`
    ///
    /// Returns [`ReceiveError::Closed`] instead of waiting once the buffer is
    /// closed and drained.
    pub fn receive(&self, timeout: Duration) -> Result<FramedChunk, ReceiveError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut ring = self.inner.ring.lock();
        loop {
            if let Some(seq) = ring.ready.pop_front() {
                let record = ring.record_mut(seq);
                record.state = RecordState::Delivered;
                return Ok(FramedChunk {
                    buffer: self.clone(),
                    seq,
                    offset: record.offset,
                    len: record.len,
                    prefix_len: record.prefix_len,
                });
            }
            if ring.closed {
                return Err(ReceiveError::Closed);
            }
            if !wait(&self.inner.committed, &mut ring, deadline) {
                return Err(ReceiveError::Timeout);
            }
        }
    }

    /// Take the oldest committed chunk without waiting
    pub fn try_receive(&self) -> Option<FramedChunk> {
        self.receive(Duration::ZERO).ok()
    }

    /// End the stream and wake every blocked receiver
    ///
    /// Chunks committed before the call can still be received. Idempotent.
    pub fn close(&self) {
        self.inner.ring.lock().closed = true;
        self.inner.committed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.ring.lock().closed
    }

    /// Give a received chunk's space back. Same as dropping it.
    pub fn release(&self, chunk: FramedChunk) {
        drop(chunk);
    }
}

/// Wait on `condvar` until notified or `deadline`. Returns false on timeout.
fn wait(condvar: &Condvar, ring: &mut MutexGuard<'_, Ring>, deadline: Option<Instant>) -> bool {
    match deadline {
        Some(deadline) => {
            if Instant::now() >= deadline {
                return false;
            }
            // A timed-out wait still gets one more look at the ring
            condvar.wait_until(ring, deadline);
            true
        }
        None => {
            condvar.wait(ring);
            true
        }
    }
}

impl std::fmt::Debug for FramedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ring = self.inner.ring.lock();
        f.debug_struct("FramedBuffer")
            .field("capacity", &self.inner.capacity)
            .field("used", &ring.used)
            .field("records", &ring.records.len())
            .field("pending", &ring.ready.len())
            .field("closed", &ring.closed)
            .finish()
    }
}

/// Space reserved for writing, not yet visible to consumers
pub struct WritableChunk {
    buffer: FramedBuffer,
    seq: u64,
    offset: usize,
    len: usize,
    prefix_len: usize,
    committed: bool,
}

impl WritableChunk {
    /// Size of the reservation
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; zero-length chunks cannot be acquired
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Writable view of the reservation
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: this handle exclusively owns the record until commit, and
        // the returned borrow is tied to `&mut self`.
        unsafe { self.buffer.inner.arena.slice_mut(self.offset, self.len) }
    }

    /// Mark the first `len` bytes as a prefix in front of the payload
    pub fn set_prefix_len(&mut self, len: usize) {
        self.prefix_len = len.min(self.len);
    }

    /// Publish the chunk to receivers. No further writes are possible.
    pub fn commit(mut self) {
        self.committed = true;
        let inner = &self.buffer.inner;
        {
            let mut ring = inner.ring.lock();
            let record = ring.record_mut(self.seq);
            record.state = RecordState::Committed;
            record.prefix_len = self.prefix_len;
            ring.ready.push_back(self.seq);
        }
        inner.committed.notify_one();
    }
}

impl Drop for WritableChunk {
    fn drop(&mut self) {
        if !self.committed {
            self.buffer.inner.release(self.seq);
        }
    }
}

impl std::fmt::Debug for WritableChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WritableChunk")
            .field("seq", &self.seq)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

/// A received chunk. Its space returns to the buffer when dropped.
pub struct FramedChunk {
    buffer: FramedBuffer,
    seq: u64,
    offset: usize,
    len: usize,
    prefix_len: usize,
}

impl FramedChunk {
    /// Full contents, prefix included
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: the record was committed (no writer remains) and is owned by
        // this handle until it is dropped.
        unsafe { self.buffer.inner.arena.slice(self.offset, self.len) }
    }

    /// Total length, prefix included
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; zero-length chunks cannot be acquired
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The prefix written in front of the payload (empty if none)
    pub fn prefix(&self) -> &[u8] {
        &self.as_bytes()[..self.prefix_len]
    }

    /// The payload after the prefix
    pub fn payload(&self) -> &[u8] {
        &self.as_bytes()[self.prefix_len..]
    }

    /// Position of this chunk in the buffer's allocation order
    pub fn sequence(&self) -> u64 {
        self.seq
    }

    /// Give the space back. Same as dropping.
    pub fn release(self) {}
}

impl AsRef<[u8]> for FramedChunk {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl Drop for FramedChunk {
    fn drop(&mut self) {
        self.buffer.inner.release(self.seq);
    }
}

impl std::fmt::Debug for FramedChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedChunk")
            .field("seq", &self.seq)
            .field("len", &self.len)
            .field("prefix_len", &self.prefix_len)
            .field("bytes", &String::from_utf8_lossy(self.as_bytes()))
            .finish()
    }
}
