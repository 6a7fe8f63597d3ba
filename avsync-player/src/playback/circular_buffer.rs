//! Blocking circular buffer with look-ahead peeking
//!
//! Fixed-capacity ring shared by one producer thread and one primary consumer
//! thread. A second reader (typically the presentation poller) may peek
//! concurrently with the consumer's `next()`.
//!
//! ## Design
//!
//! ```text
//!            last   current  next
//!              ↓       ↓       ↓
//!   [ free ][ L ][ C ][ N ][ ... ][ free ][ free ]
//!                 ↑ i_read              ↑ i_write
//! ```
//!
//! - `next()` consumes the item at `i_read`; that item stays readable through
//!   `peek_last()` until the following `next()`.
//! - Writes wait for two free slots, so a write can never land on the slot
//!   `peek_last()` or `peek_current()` is looking at.
//! - Every blocking entry point observes a [`Gate`] under the same lock as
//!   its wait condition. `unblock()` moves the gate to `Draining` (all waits
//!   return `None` until `block()`), `close()` moves it to `Closed` for good,
//!   and `flush()` bumps an epoch so callers already waiting return `None`
//!   exactly once while the buffer stays open for new writes.

use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Cooperative cancellation state guarding all blocking calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Blocking calls wait normally
    Open,
    /// Blocking calls return "no item" until `block()` re-arms
    Draining,
    /// Blocking calls return "no item" permanently
    Closed,
}

struct Ring<T> {
    slots: Vec<Option<T>>,
    /// Read cursor (current item)
    i_read: usize,
    /// Write cursor (next slot to fill)
    i_write: usize,
    /// Committed, unread items
    n_write: usize,
    /// 1 once an item has been consumed since the last reset, else 0
    n_read: usize,
    gate: Gate,
    /// Incremented by every flush
    epoch: u64,
}

impl<T> Ring<T> {
    fn n_free(&self) -> usize {
        self.slots.len() - self.n_write
    }

    fn reset(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.i_read = 0;
        self.i_write = 0;
        self.n_write = 0;
        self.n_read = 0;
    }
}

/// Fixed-capacity blocking ring buffer
pub struct CircularBuffer<T> {
    ring: Mutex<Ring<T>>,
    cond: Condvar,
    capacity: usize,
}

impl<T> fmt::Debug for CircularBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ring = self.lock();
        f.debug_struct("CircularBuffer")
            .field("capacity", &self.capacity)
            .field("i_read", &ring.i_read)
            .field("i_write", &ring.i_write)
            .field("n_write", &ring.n_write)
            .field("gate", &ring.gate)
            .field("epoch", &ring.epoch)
            .finish()
    }
}

/// A reserved slot returned by [`CircularBuffer::write_request`]
///
/// The slot is not visible to readers until [`WriteSlot::complete`] commits it.
#[must_use = "a requested slot is not committed until complete() is called"]
pub struct WriteSlot<'a, T> {
    buffer: &'a CircularBuffer<T>,
    index: usize,
    epoch: u64,
}

impl<'a, T> WriteSlot<'a, T> {
    /// Store `item` and make it visible to readers
    ///
    /// Returns the item back if the buffer was unblocked, closed or flushed
    /// since the slot was requested.
    pub fn complete(self, item: T) -> Result<(), T> {
        let mut ring = self.buffer.lock();
        if ring.gate != Gate::Open || ring.epoch != self.epoch {
            return Err(item);
        }
        let capacity = self.buffer.capacity;
        ring.slots[self.index] = Some(item);
        ring.i_write = (self.index + 1) % capacity;
        ring.n_write += 1;
        drop(ring);
        self.buffer.cond.notify_all();
        Ok(())
    }
}

impl<T> CircularBuffer<T> {
    /// Create an empty buffer holding at most `capacity` items (minimum 2)
    ///
    /// Because two slots are always kept free ahead of the write cursor, at
    /// most `capacity - 1` items can be committed before the first read.
    /// Smaller requests are raised to 2 so at least one write can succeed.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            ring: Mutex::new(Ring {
                slots,
                i_read: 0,
                i_write: 0,
                n_write: 0,
                n_read: 0,
                gate: Gate::Open,
                epoch: 0,
            }),
            cond: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ring<T>> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until `ready` holds; `None` if the gate closes or a flush happens meanwhile
    fn wait_for<'a>(
        &'a self,
        mut ring: MutexGuard<'a, Ring<T>>,
        ready: impl Fn(&Ring<T>) -> bool,
    ) -> Option<MutexGuard<'a, Ring<T>>> {
        let epoch = ring.epoch;
        loop {
            if ring.gate != Gate::Open || ring.epoch != epoch {
                return None;
            }
            if ready(&ring) {
                return Some(ring);
            }
            ring = self.cond.wait(ring).unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots not holding committed, unread items
    pub fn n_free(&self) -> usize {
        self.lock().n_free()
    }

    /// Committed, unread items
    pub fn n_remaining(&self) -> usize {
        self.lock().n_write
    }

    pub fn is_empty(&self) -> bool {
        self.lock().n_write == 0
    }

    pub fn gate(&self) -> Gate {
        self.lock().gate
    }

    /// Block until two slots are free, then reserve the slot at the write cursor
    ///
    /// Returns `None` when unblocked, closed or flushed while waiting.
    pub fn write_request(&self) -> Option<WriteSlot<'_, T>> {
        let ring = self.wait_for(self.lock(), |r| r.n_free() > 1)?;
        Some(WriteSlot {
            buffer: self,
            index: ring.i_write,
            epoch: ring.epoch,
        })
    }

    /// `write_request` followed by `complete`; hands the item back on cancellation
    pub fn push(&self, item: T) -> Result<(), T> {
        match self.write_request() {
            Some(slot) => slot.complete(item),
            None => Err(item),
        }
    }

    /// Unblock every waiter; all blocking calls return `None` until `block()`
    pub fn unblock(&self) {
        let mut ring = self.lock();
        if ring.gate == Gate::Open {
            ring.gate = Gate::Draining;
        }
        drop(ring);
        self.cond.notify_all();
    }

    /// Re-arm waiting after `unblock()` (no effect once closed)
    pub fn block(&self) {
        let mut ring = self.lock();
        if ring.gate == Gate::Draining {
            ring.gate = Gate::Open;
        }
    }

    /// Permanently unblock (teardown)
    pub fn close(&self) {
        self.lock().gate = Gate::Closed;
        self.cond.notify_all();
    }

    /// Drop all items and reset cursors
    ///
    /// Callers blocked at the time of the flush return `None` once; the
    /// buffer is immediately open for new writes afterwards.
    pub fn flush(&self) {
        let mut ring = self.lock();
        ring.epoch = ring.epoch.wrapping_add(1);
        ring.reset();
        if ring.gate == Gate::Draining {
            ring.gate = Gate::Open;
        }
        drop(ring);
        self.cond.notify_all();
    }
}

impl<T: Clone> CircularBuffer<T> {
    /// Block until an item is committed, consume it and return it
    ///
    /// The consumed item remains available to `peek_last()`.
    pub fn next(&self) -> Option<T> {
        let mut ring = self.wait_for(self.lock(), |r| r.n_write > 0)?;
        let capacity = self.capacity;
        let current = ring.i_read;
        let item = ring.slots[current].clone();
        if ring.n_read == 1 {
            let previous = (current + capacity - 1) % capacity;
            if previous != current {
                ring.slots[previous] = None;
            }
        }
        ring.i_read = (current + 1) % capacity;
        ring.n_read = 1;
        ring.n_write -= 1;
        drop(ring);
        self.cond.notify_all();
        item
    }

    /// Block until an item is committed and return the item at the read cursor
    pub fn peek_current(&self) -> Option<T> {
        let ring = self.wait_for(self.lock(), |r| r.n_write > 0)?;
        ring.slots[ring.i_read].clone()
    }

    /// Block until two items are committed and return the one after the read cursor
    pub fn peek_next(&self) -> Option<T> {
        let ring = self.wait_for(self.lock(), |r| r.n_write > 1)?;
        ring.slots[(ring.i_read + 1) % self.capacity].clone()
    }

    /// Block until an item is committed and return the most recently consumed one
    ///
    /// Before anything has been consumed this is the current item.
    pub fn peek_last(&self) -> Option<T> {
        let ring = self.wait_for(self.lock(), |r| r.n_write > 0)?;
        ring.slots[(ring.i_read + self.capacity - ring.n_read) % self.capacity].clone()
    }
}
