//! Decoded frame queue
//!
//! Bounded queue between a decoder thread and its consumer (audio pull or
//! video refresh). Frames are shared as `Arc<Frame>` so the consumer can keep
//! the last shown frame (`peek_last`) while the decoder keeps writing.
//!
//! The queue is paired with the stream's [`PacketQueue`] so consumers can
//! compare a frame's serial against the current generation.

use super::circular_buffer::{CircularBuffer, WriteSlot};
use super::packet_queue::PacketQueue;
use crate::error::{Error, Result};
use crate::media::{DecodedFrame, FrameContent};
use std::sync::Arc;

/// A decoded unit on the playback timeline
#[derive(Debug)]
pub struct Frame {
    /// Presentation time in seconds (NaN when unknown)
    pub pts: f64,
    /// Nominal duration in seconds
    pub duration: f64,
    /// Byte offset of the source packet
    pub pos: Option<u64>,
    /// Generation of the packet it was decoded from
    pub serial: u64,
    pub content: FrameContent,
}

impl Frame {
    pub fn new(decoded: DecodedFrame, duration: f64, serial: u64) -> Self {
        Self {
            pts: decoded.pts.unwrap_or(f64::NAN),
            duration,
            pos: decoded.pos,
            serial,
            content: decoded.content,
        }
    }
}

/// Reserved write position, see [`FrameQueue::peek_writable`]
pub struct FrameSlot<'a> {
    slot: WriteSlot<'a, Arc<Frame>>,
}

impl FrameSlot<'_> {
    /// Commit `frame`; fails once the queue has been aborted
    pub fn push(self, frame: Frame) -> Result<()> {
        self.slot.complete(Arc::new(frame)).map_err(|_| Error::Aborted)
    }
}

/// Per-stream decoded frame queue
pub struct FrameQueue {
    buffer: CircularBuffer<Arc<Frame>>,
    packets: Arc<PacketQueue>,
}

impl std::fmt::Debug for FrameQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameQueue")
            .field("capacity", &self.buffer.capacity())
            .field("nb_remaining", &self.nb_remaining())
            .finish()
    }
}

impl FrameQueue {
    pub fn new(packets: Arc<PacketQueue>, capacity: usize) -> Self {
        Self {
            buffer: CircularBuffer::new(capacity),
            packets,
        }
    }

    /// Block until a slot is free (producer side)
    pub fn peek_writable(&self) -> Option<FrameSlot<'_>> {
        self.buffer.write_request().map(|slot| FrameSlot { slot })
    }

    /// `peek_writable` + `push` in one call
    pub fn push(&self, frame: Frame) -> Result<()> {
        match self.peek_writable() {
            Some(slot) => slot.push(frame),
            None => Err(Error::Aborted),
        }
    }

    /// Block until a frame is ready and return it without consuming it
    pub fn peek_readable(&self) -> Option<Arc<Frame>> {
        self.buffer.peek_current()
    }

    /// Frame after the current one
    pub fn peek_next(&self) -> Option<Arc<Frame>> {
        self.buffer.peek_next()
    }

    /// Most recently consumed frame (the current one before any consumption)
    pub fn peek_last(&self) -> Option<Arc<Frame>> {
        self.buffer.peek_last()
    }

    /// Consume the current frame
    pub fn next(&self) -> Option<Arc<Frame>> {
        self.buffer.next()
    }

    /// Frames decoded but not yet consumed
    pub fn nb_remaining(&self) -> usize {
        self.buffer.n_remaining()
    }

    /// Generation of the paired packet queue
    pub fn packet_serial(&self) -> u64 {
        self.packets.serial()
    }

    /// Release producer and consumers permanently
    pub fn abort(&self) {
        self.buffer.close();
    }
}
