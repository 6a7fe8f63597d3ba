//! Scripted in-memory media source
//!
//! Builds a container from synthetic packets so engine tests control every
//! timestamp, byte offset and failure point. Codecs emit one frame per packet
//! with the packet's timestamp.

use avsync_player::error::{Error, Result};
use avsync_player::media::{
    AudioSamples, DecodedFrame, FrameContent, MediaKind, MediaSource, Packet, Picture, PixelFormat,
    ReceiveOutcome, SendOutcome, SeekUnit, SeekWindow, StreamDecoder, StreamInfo,
};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Bytes per synthetic packet
pub const PACKET_BYTES: usize = 16;

/// Audio packet length in seconds
pub const AUDIO_PACKET_SECONDS: f64 = 0.1;

/// Sample value every decoded audio frame carries
pub const AUDIO_LEVEL: f32 = 0.25;

/// What the engine did to the source, shared with the test
#[derive(Debug, Default)]
pub struct SourceLog {
    pub seeks: Mutex<Vec<SeekWindow>>,
    pub packets_read: AtomicUsize,
    pub pause_calls: AtomicUsize,
    pub resume_calls: AtomicUsize,
    pub codecs_opened: AtomicUsize,
    pub codecs_dropped: AtomicUsize,
    /// The engine released the source
    pub dropped: AtomicBool,
}

impl SourceLog {
    pub fn seeks(&self) -> Vec<SeekWindow> {
        self.seeks.lock().unwrap().clone()
    }
}

pub struct ScriptedSource {
    streams: Vec<StreamInfo>,
    packets: Vec<Packet>,
    cursor: usize,
    duration: f64,
    start_time: Option<f64>,
    seek_fails: bool,
    read_error_at: Option<usize>,
    codec_failures: Vec<(usize, usize)>,
    log: Arc<SourceLog>,
}

impl ScriptedSource {
    fn new(streams: Vec<StreamInfo>, mut packets: Vec<Packet>, duration: f64) -> Self {
        packets.sort_by(|a, b| {
            a.pts
                .unwrap_or(0.0)
                .partial_cmp(&b.pts.unwrap_or(0.0))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let packets = packets
            .into_iter()
            .enumerate()
            .map(|(i, p)| p.with_pos((i * PACKET_BYTES) as u64))
            .collect();
        Self {
            streams,
            packets,
            cursor: 0,
            duration,
            start_time: None,
            seek_fails: false,
            read_error_at: None,
            codec_failures: Vec::new(),
            log: Arc::new(SourceLog::default()),
        }
    }

    /// `frames` pictures at `fps` on stream 0
    pub fn video(frames: usize, fps: f64) -> Self {
        let packets = video_packets(0, frames, fps);
        Self::new(vec![video_stream(0, fps)], packets, frames as f64 / fps)
    }

    /// `seconds` of audio on stream 0
    pub fn audio(seconds: f64, sample_rate: u32, channels: u16) -> Self {
        let packets = audio_packets(0, seconds);
        Self::new(vec![audio_stream(0, sample_rate, channels)], packets, seconds)
    }

    /// Video on stream 0 and audio on stream 1, interleaved by timestamp
    pub fn audio_video(seconds: f64, fps: f64, sample_rate: u32) -> Self {
        let frames = (seconds * fps).round() as usize;
        let mut packets = video_packets(0, frames, fps);
        packets.extend(audio_packets(1, seconds));
        Self::new(
            vec![video_stream(0, fps), audio_stream(1, sample_rate, 2)],
            packets,
            seconds,
        )
    }

    /// Audio on stream 0 plus a cover-art picture on stream 1
    pub fn audio_with_cover(seconds: f64, sample_rate: u32) -> Self {
        let mut cover = StreamInfo::new(1, MediaKind::Video, "scripted-image");
        cover.attached_picture = Some(Packet::new(1, Some(0.0), vec![0u8; PACKET_BYTES]));
        Self::new(
            vec![audio_stream(0, sample_rate, 2), cover],
            audio_packets(0, seconds),
            seconds,
        )
    }

    /// A container with nothing playable
    pub fn data_only() -> Self {
        let packets = (0..10)
            .map(|i| Packet::new(0, Some(i as f64), vec![0u8; PACKET_BYTES]))
            .collect();
        Self::new(vec![StreamInfo::new(0, MediaKind::Other, "bin_data")], packets, 10.0)
    }

    /// Report `secs` as the container start time
    pub fn with_start_time(mut self, secs: f64) -> Self {
        self.start_time = Some(secs);
        self
    }

    /// Every seek fails
    pub fn with_failing_seek(mut self) -> Self {
        self.seek_fails = true;
        self
    }

    /// Reading packet number `index` (0-based) fails with an I/O error
    pub fn with_read_error_at(mut self, index: usize) -> Self {
        self.read_error_at = Some(index);
        self
    }

    /// The codec for `stream` fails on the packet after the first `after`
    pub fn with_codec_failure(mut self, stream: usize, after: usize) -> Self {
        self.codec_failures.push((stream, after));
        self
    }

    pub fn log(&self) -> Arc<SourceLog> {
        Arc::clone(&self.log)
    }
}

/// Average bit rate of `packets` scripted packets spread over `duration`
pub fn scripted_bit_rate(packets: usize, duration: f64) -> u64 {
    ((packets * PACKET_BYTES * 8) as f64 / duration) as u64
}

pub fn video_stream(index: usize, fps: f64) -> StreamInfo {
    let mut info = StreamInfo::new(index, MediaKind::Video, "scripted-video");
    info.frame_rate = Some(fps);
    info.start_time = Some(0.0);
    info
}

pub fn audio_stream(index: usize, sample_rate: u32, channels: u16) -> StreamInfo {
    let mut info = StreamInfo::new(index, MediaKind::Audio, "scripted-pcm");
    info.sample_rate = Some(sample_rate);
    info.channels = Some(channels);
    info.start_time = Some(0.0);
    info
}

fn video_packets(stream: usize, frames: usize, fps: f64) -> Vec<Packet> {
    (0..frames)
        .map(|i| Packet::new(stream, Some(i as f64 / fps), vec![0u8; PACKET_BYTES]).with_duration(1.0 / fps))
        .collect()
}

fn audio_packets(stream: usize, seconds: f64) -> Vec<Packet> {
    let count = (seconds / AUDIO_PACKET_SECONDS).round() as usize;
    (0..count)
        .map(|i| {
            Packet::new(stream, Some(i as f64 * AUDIO_PACKET_SECONDS), vec![0u8; PACKET_BYTES])
                .with_duration(AUDIO_PACKET_SECONDS)
        })
        .collect()
}

impl MediaSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn duration(&self) -> Option<f64> {
        Some(self.duration)
    }

    fn start_time(&self) -> Option<f64> {
        self.start_time
    }

    fn bit_rate(&self) -> Option<u64> {
        Some(scripted_bit_rate(self.packets.len(), self.duration))
    }

    fn seek(&mut self, window: &SeekWindow) -> Result<()> {
        self.log.seeks.lock().unwrap().push(*window);
        if self.seek_fails {
            return Err(Error::Seek("scripted seek failure".to_string()));
        }
        self.cursor = match window.unit {
            SeekUnit::Micros => {
                let target = window.target as f64 / 1_000_000.0;
                self.packets
                    .iter()
                    .position(|p| p.pts.unwrap_or(0.0) >= target - 1e-6)
                    .unwrap_or(self.packets.len())
            }
            SeekUnit::Bytes => self
                .packets
                .iter()
                .position(|p| p.pos.unwrap_or(0) as i64 >= window.target)
                .unwrap_or(self.packets.len()),
        };
        Ok(())
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        if self.read_error_at == Some(self.cursor) {
            return Err(Error::Io(io::Error::new(io::ErrorKind::Other, "scripted read failure")));
        }
        let Some(packet) = self.packets.get(self.cursor).cloned() else {
            return Ok(None);
        };
        self.cursor += 1;
        self.log.packets_read.fetch_add(1, Ordering::Relaxed);
        Ok(Some(packet))
    }

    fn open_decoder(&mut self, stream_index: usize) -> Result<Box<dyn StreamDecoder>> {
        let info = self
            .streams
            .get(stream_index)
            .ok_or_else(|| Error::StreamNotFound(format!("stream {}", stream_index)))?;
        if info.kind == MediaKind::Other {
            return Err(Error::Decode("no codec for data streams".to_string()));
        }
        let fail_after = self
            .codec_failures
            .iter()
            .find(|(stream, _)| *stream == stream_index)
            .map(|(_, after)| *after);
        self.log.codecs_opened.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(ScriptedCodec {
            kind: info.kind,
            sample_rate: info.sample_rate.unwrap_or(48000),
            channels: info.channels.unwrap_or(2),
            fail_after,
            sent: 0,
            ready: VecDeque::new(),
            draining: false,
            log: Arc::clone(&self.log),
        }))
    }

    fn pause_reading(&mut self) {
        self.log.pause_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn resume_reading(&mut self) {
        self.log.resume_calls.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.log.dropped.store(true, Ordering::Release);
    }
}

/// One frame per packet, stamped with the packet's timestamp
struct ScriptedCodec {
    kind: MediaKind,
    sample_rate: u32,
    channels: u16,
    fail_after: Option<usize>,
    sent: usize,
    ready: VecDeque<DecodedFrame>,
    draining: bool,
    log: Arc<SourceLog>,
}

impl Drop for ScriptedCodec {
    fn drop(&mut self) {
        self.log.codecs_dropped.fetch_add(1, Ordering::Relaxed);
    }
}

impl ScriptedCodec {
    fn frame_for(&self, packet: &Packet) -> DecodedFrame {
        let content = match self.kind {
            MediaKind::Audio => {
                let frames = (packet.duration * self.sample_rate as f64).round() as usize;
                FrameContent::Audio(AudioSamples {
                    sample_rate: self.sample_rate,
                    channels: self.channels,
                    samples: vec![AUDIO_LEVEL; frames * self.channels as usize],
                })
            }
            _ => FrameContent::Picture(Picture {
                width: 4,
                height: 4,
                aspect_ratio: (1, 1),
                format: PixelFormat::Rgb24,
                data: vec![0u8; 4 * 4 * 3],
            }),
        };
        DecodedFrame {
            pts: packet.pts,
            pos: packet.pos,
            content,
        }
    }
}

impl StreamDecoder for ScriptedCodec {
    fn send_packet(&mut self, packet: Option<&Packet>) -> Result<SendOutcome> {
        let Some(packet) = packet else {
            self.draining = true;
            return Ok(SendOutcome::Accepted);
        };
        if !self.ready.is_empty() {
            return Ok(SendOutcome::Full);
        }
        self.sent += 1;
        if matches!(self.fail_after, Some(after) if self.sent > after) {
            return Err(Error::Decode(format!("scripted codec failure on packet {}", self.sent)));
        }
        let frame = self.frame_for(packet);
        self.ready.push_back(frame);
        Ok(SendOutcome::Accepted)
    }

    fn receive_frame(&mut self) -> Result<ReceiveOutcome> {
        if let Some(frame) = self.ready.pop_front() {
            return Ok(ReceiveOutcome::Frame(frame));
        }
        if self.draining {
            return Ok(ReceiveOutcome::Drained);
        }
        Ok(ReceiveOutcome::NeedInput)
    }

    fn flush(&mut self) {
        self.ready.clear();
        self.draining = false;
    }
}
