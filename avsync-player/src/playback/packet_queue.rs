//! Compressed packet queue with discontinuity serials
//!
//! Wraps a [`CircularBuffer`] of [`QueuedPacket`]s and keeps running totals
//! (packet count, bytes, duration) for the reader's backpressure decisions.
//!
//! The queue owns the stream's serial. `put_flush()` increments it and queues
//! a [`PacketKind::Flush`] marker, so the decoder sees the generation
//! boundary in order with the data around it. Everything queued after the
//! marker carries the new serial; anything older is discarded by the decoder.

use super::circular_buffer::{CircularBuffer, Gate};
use crate::error::{Error, Result};
use crate::media::Packet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::trace;

/// Slots per packet queue
///
/// Memory is bounded by the reader's byte/duration backpressure long before
/// this many packets accumulate; the ring size only caps bookkeeping.
pub const PACKET_QUEUE_CAPACITY: usize = 4096;

/// What a queue entry carries
#[derive(Debug, Clone)]
pub enum PacketKind {
    /// Compressed data
    Data(Packet),
    /// Generation boundary: the decoder must flush its codec state
    Flush,
    /// End of input for this stream: the decoder must drain its codec
    EndOfStream,
}

/// A queue entry stamped with the serial in effect when it was queued
#[derive(Debug, Clone)]
pub struct QueuedPacket {
    pub kind: PacketKind,
    pub serial: u64,
    /// Totals generation the entry was counted in
    generation: u64,
}

#[derive(Debug, Default)]
struct Totals {
    nb_packets: usize,
    size: usize,
    duration: f64,
    /// Bumped by every flush; entries from older generations are no longer counted
    generation: u64,
}

impl Totals {
    fn remove(&mut self, size: usize, duration: f64) {
        self.nb_packets = self.nb_packets.saturating_sub(1);
        self.size = self.size.saturating_sub(size);
        self.duration = (self.duration - duration).max(0.0);
    }
}

/// Per-stream queue of compressed packets
pub struct PacketQueue {
    buffer: CircularBuffer<QueuedPacket>,
    /// Shared with the clocks bound to this queue
    serial: Arc<AtomicU64>,
    totals: Mutex<Totals>,
    aborted: AtomicBool,
}

impl std::fmt::Debug for PacketQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketQueue")
            .field("serial", &self.serial())
            .field("nb_packets", &self.nb_packets())
            .field("size", &self.size())
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

impl PacketQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: CircularBuffer::new(capacity),
            serial: Arc::new(AtomicU64::new(0)),
            totals: Mutex::new(Totals::default()),
            aborted: AtomicBool::new(false),
        }
    }

    fn totals(&self) -> std::sync::MutexGuard<'_, Totals> {
        self.totals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the queue for a session: serial moves from 0 to 1
    pub fn start(&self) -> Result<()> {
        self.put_flush()
    }

    /// Queue one compressed packet
    ///
    /// Blocks while the ring is full. Fails with [`Error::Aborted`] once the
    /// queue is aborted or a flush cancels the write.
    pub fn put(&self, packet: Packet) -> Result<()> {
        if self.is_aborted() {
            return Err(Error::Aborted);
        }
        let size = packet.size();
        let duration = packet.duration;
        let generation = {
            // Count before publishing so a fast consumer never underflows
            let mut totals = self.totals();
            totals.nb_packets += 1;
            totals.size += size;
            totals.duration += duration;
            totals.generation
        };
        let entry = QueuedPacket {
            kind: PacketKind::Data(packet),
            serial: self.serial(),
            generation,
        };
        if let Err(entry) = self.buffer.push(entry) {
            self.uncount(&entry);
            return Err(Error::Aborted);
        }
        Ok(())
    }

    /// Start a new generation and queue its boundary marker
    pub fn put_flush(&self) -> Result<()> {
        let serial = self.serial.fetch_add(1, Ordering::AcqRel) + 1;
        trace!("Packet queue serial -> {}", serial);
        self.buffer
            .push(QueuedPacket {
                kind: PacketKind::Flush,
                serial,
                generation: 0,
            })
            .map_err(|_| Error::Aborted)
    }

    /// Queue the end-of-stream marker for `stream_index`
    pub fn put_end_of_stream(&self, stream_index: usize) -> Result<()> {
        trace!("End of stream queued for stream {}", stream_index);
        self.buffer
            .push(QueuedPacket {
                kind: PacketKind::EndOfStream,
                serial: self.serial(),
                generation: 0,
            })
            .map_err(|_| Error::Aborted)
    }

    /// Block until an entry is available
    ///
    /// Returns `None` once the queue is aborted. A flush that happens while
    /// waiting is absorbed: the call keeps waiting for post-flush entries.
    pub fn get(&self) -> Option<QueuedPacket> {
        loop {
            if self.is_aborted() {
                return None;
            }
            match self.buffer.next() {
                Some(entry) => {
                    self.uncount(&entry);
                    return Some(entry);
                }
                None if self.buffer.gate() != Gate::Open => return None,
                None => continue,
            }
        }
    }

    /// Take a data entry out of the totals unless a flush already dropped it
    fn uncount(&self, entry: &QueuedPacket) {
        if let PacketKind::Data(ref packet) = entry.kind {
            let mut totals = self.totals();
            if totals.generation == entry.generation {
                totals.remove(packet.size(), packet.duration);
            }
        }
    }

    /// Drop every queued entry (the serial is left alone; see `put_flush`)
    pub fn flush(&self) {
        self.buffer.flush();
        let mut totals = self.totals();
        let generation = totals.generation.wrapping_add(1);
        *totals = Totals {
            generation,
            ..Totals::default()
        };
    }

    /// Permanently release every waiter on this queue
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
        self.buffer.close();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Current generation
    pub fn serial(&self) -> u64 {
        self.serial.load(Ordering::Acquire)
    }

    /// Handle through which clocks observe the current generation
    pub fn serial_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.serial)
    }

    /// Queued data packets (markers excluded)
    pub fn nb_packets(&self) -> usize {
        self.totals().nb_packets
    }

    /// Queued payload bytes
    pub fn size(&self) -> usize {
        self.totals().size
    }

    /// Sum of queued packet durations in seconds (0 when durations are unknown)
    pub fn duration(&self) -> f64 {
        self.totals().duration
    }
}
