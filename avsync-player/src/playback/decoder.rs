//! Per-stream decoder
//!
//! [`Decoder`] pulls packets from its [`PacketQueue`], skipping entries from
//! an outdated generation, and drives a [`StreamDecoder`] through the
//! send/receive protocol. [`DecoderThread`] runs a work function on a
//! dedicated OS thread and tears it down through the queues' abort protocol.
//!
//! Status shared with the reader thread lives in [`DecoderStatus`]:
//! - `pkt_serial`: generation of the last packet taken from the queue
//! - `finished`: generation at which the codec drained to end of stream

use super::frame_queue::FrameQueue;
use super::packet_queue::{PacketKind, PacketQueue};
use crate::error::{Error, Result};
use crate::media::{DecodedFrame, FrameContent, Packet, ReceiveOutcome, SendOutcome, StreamDecoder};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, trace};

/// Serial value meaning "none"; live serials start at 1
const NO_SERIAL: u64 = 0;

/// Decoder progress visible to other threads
#[derive(Debug, Default)]
pub struct DecoderStatus {
    pkt_serial: AtomicU64,
    finished: AtomicU64,
}

impl DecoderStatus {
    /// Generation of the last packet taken from the queue
    pub fn pkt_serial(&self) -> Option<u64> {
        match self.pkt_serial.load(Ordering::Acquire) {
            NO_SERIAL => None,
            serial => Some(serial),
        }
    }

    /// Generation at which end of stream was fully decoded
    pub fn finished(&self) -> Option<u64> {
        match self.finished.load(Ordering::Acquire) {
            NO_SERIAL => None,
            serial => Some(serial),
        }
    }

    fn set_pkt_serial(&self, serial: u64) {
        self.pkt_serial.store(serial, Ordering::Release);
    }

    fn set_finished(&self, serial: Option<u64>) {
        self.finished.store(serial.unwrap_or(NO_SERIAL), Ordering::Release);
    }
}

/// Packet-to-frame driver for one stream
pub struct Decoder {
    codec: Box<dyn StreamDecoder>,
    packets: Arc<PacketQueue>,
    status: Arc<DecoderStatus>,
    /// Packet the codec refused (`SendOutcome::Full`), resent next round
    pending: Option<(Option<Packet>, u64)>,
    /// Timestamp assumed after a flush when the container cannot seek natively
    start_pts: Option<f64>,
    /// Extrapolated pts for audio frames the codec left unstamped
    next_pts: Option<f64>,
}

impl Decoder {
    pub fn new(codec: Box<dyn StreamDecoder>, packets: Arc<PacketQueue>) -> Self {
        Self {
            codec,
            packets,
            status: Arc::new(DecoderStatus::default()),
            pending: None,
            start_pts: None,
            next_pts: None,
        }
    }

    /// Restart timestamps from `pts` after every flush
    pub fn set_start_pts(&mut self, pts: Option<f64>) {
        self.start_pts = pts;
    }

    pub fn status(&self) -> Arc<DecoderStatus> {
        Arc::clone(&self.status)
    }

    pub fn packets(&self) -> &Arc<PacketQueue> {
        &self.packets
    }

    /// Generation of the last packet fed to the codec
    pub fn pkt_serial(&self) -> Option<u64> {
        self.status.pkt_serial()
    }

    /// Decode until one frame is available
    ///
    /// - `Ok(Some(frame))`: a decoded frame from the current generation
    /// - `Ok(None)`: the codec drained to end of stream (finished is set)
    /// - `Err(Error::Aborted)`: the packet queue was aborted
    /// - `Err(Error::Decode(_))`: unrecoverable codec failure
    pub fn decode_frame(&mut self) -> Result<Option<DecodedFrame>> {
        loop {
            if self.status.pkt_serial() == Some(self.packets.serial()) {
                loop {
                    if self.packets.is_aborted() {
                        return Err(Error::Aborted);
                    }
                    match self.codec.receive_frame()? {
                        ReceiveOutcome::Frame(mut frame) => {
                            self.stamp_audio(&mut frame);
                            return Ok(Some(frame));
                        }
                        ReceiveOutcome::Drained => {
                            let serial = self.status.pkt_serial();
                            debug!("Decoder drained at serial {:?}", serial);
                            self.status.set_finished(serial);
                            self.codec.flush();
                            return Ok(None);
                        }
                        ReceiveOutcome::NeedInput => break,
                    }
                }
            }

            let (packet, serial) = self.next_packet()?;
            self.status.set_pkt_serial(serial);

            match packet {
                NextPacket::Flush => {
                    trace!("Decoder flush at serial {}", serial);
                    self.codec.flush();
                    self.status.set_finished(None);
                    self.next_pts = self.start_pts;
                }
                NextPacket::Data(packet) => self.send(Some(packet), serial)?,
                NextPacket::EndOfStream => self.send(None, serial)?,
            }
        }
    }

    fn send(&mut self, packet: Option<Packet>, serial: u64) -> Result<()> {
        if self.codec.send_packet(packet.as_ref())? == SendOutcome::Full {
            error!("Codec refused input while frames were pending; holding packet");
            self.pending = Some((packet, serial));
        }
        Ok(())
    }

    /// Next entry of the current generation (held-back packet first)
    fn next_packet(&mut self) -> Result<(NextPacket, u64)> {
        loop {
            let (entry, serial) = match self.pending.take() {
                Some((Some(packet), serial)) => (NextPacket::Data(packet), serial),
                Some((None, serial)) => (NextPacket::EndOfStream, serial),
                None => {
                    let queued = self.packets.get().ok_or(Error::Aborted)?;
                    let entry = match queued.kind {
                        PacketKind::Data(packet) => NextPacket::Data(packet),
                        PacketKind::Flush => NextPacket::Flush,
                        PacketKind::EndOfStream => NextPacket::EndOfStream,
                    };
                    (entry, queued.serial)
                }
            };
            if serial == self.packets.serial() {
                return Ok((entry, serial));
            }
        }
    }

    /// Fill in missing audio timestamps from the running sample count
    fn stamp_audio(&mut self, frame: &mut DecodedFrame) {
        if let FrameContent::Audio(ref samples) = frame.content {
            if frame.pts.is_none() {
                frame.pts = self.next_pts;
            }
            if let Some(pts) = frame.pts {
                self.next_pts = Some(pts + samples.duration());
            }
        }
    }
}

enum NextPacket {
    Data(Packet),
    Flush,
    EndOfStream,
}

/// A decoder's work function running on its own thread
pub struct DecoderThread {
    name: String,
    packets: Arc<PacketQueue>,
    frames: Arc<FrameQueue>,
    handle: Option<JoinHandle<()>>,
}

impl DecoderThread {
    /// Spawn `work` on a named OS thread
    ///
    /// `work` should loop until `decode_frame` or a frame push reports
    /// [`Error::Aborted`].
    pub fn spawn<F>(name: &str, decoder: Decoder, frames: Arc<FrameQueue>, work: F) -> Result<Self>
    where
        F: FnOnce(Decoder) + Send + 'static,
    {
        let packets = Arc::clone(decoder.packets());
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || work(decoder))?;
        debug!("Started decoder thread {}", name);
        Ok(Self {
            name: name.to_string(),
            packets,
            frames,
            handle: Some(handle),
        })
    }

    /// Abort both queues so the work loop and any blocked consumer return,
    /// then join the thread
    pub fn abort(&mut self) {
        self.packets.abort();
        self.frames.abort();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Decoder thread {} panicked", self.name);
            } else {
                debug!("Decoder thread {} stopped", self.name);
            }
        }
    }
}

impl Drop for DecoderThread {
    fn drop(&mut self) {
        self.abort();
    }
}
