//! Collaborator contracts
//!
//! The engine never demuxes, decodes, converts or plays audio itself. It
//! orchestrates implementations of the traits below:
//!
//! - [`MediaSource`]: container access (stream table, packet reading,
//!   seeking) and a factory for per-stream codecs
//! - [`StreamDecoder`]: send/receive codec for one stream
//! - [`AudioConverter`]: channel/rate conversion with per-chunk sample
//!   count compensation
//! - [`AudioDevice`]: output negotiation
//!
//! Decoded output is handed over as move-only [`DecodedFrame`] values; the
//! engine moves them into its frame queues.

pub mod symphonia_source;

use crate::error::Result;
use std::sync::Arc;

/// Stream media type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
    Other,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
            MediaKind::Other => write!(f, "other"),
        }
    }
}

/// One compressed unit read from the container
///
/// Timestamps are in seconds. The payload is reference counted so queue
/// entries can be cloned without copying data.
#[derive(Debug, Clone)]
pub struct Packet {
    pub stream_index: usize,
    pub pts: Option<f64>,
    pub dts: Option<f64>,
    /// Seconds (0 when unknown)
    pub duration: f64,
    /// Byte offset in the input
    pub pos: Option<u64>,
    pub data: Arc<[u8]>,
}

impl Packet {
    pub fn new(stream_index: usize, pts: Option<f64>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            stream_index,
            pts,
            dts: pts,
            duration: 0.0,
            pos: None,
            data: data.into(),
        }
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_pos(mut self, pos: u64) -> Self {
        self.pos = Some(pos);
        self
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Presentation timestamp, falling back to the decode timestamp
    pub fn timestamp(&self) -> Option<f64> {
        self.pts.or(self.dts)
    }
}

/// Static description of one container stream
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub index: usize,
    pub kind: MediaKind,
    pub codec_name: String,
    /// First timestamp of the stream in seconds
    pub start_time: Option<f64>,
    /// Nominal frames per second (video)
    pub frame_rate: Option<f64>,
    /// Audio sample rate
    pub sample_rate: Option<u32>,
    /// Audio channel count
    pub channels: Option<u16>,
    /// Embedded cover art carried as a single packet
    pub attached_picture: Option<Packet>,
}

impl StreamInfo {
    pub fn new(index: usize, kind: MediaKind, codec_name: impl Into<String>) -> Self {
        Self {
            index,
            kind,
            codec_name: codec_name.into(),
            start_time: None,
            frame_rate: None,
            sample_rate: None,
            channels: None,
            attached_picture: None,
        }
    }

    /// Nominal picture duration derived from the frame rate (0 when unknown)
    pub fn frame_duration(&self) -> f64 {
        match self.frame_rate {
            Some(rate) if rate > 0.0 && rate.is_finite() => 1.0 / rate,
            _ => 0.0,
        }
    }
}

/// Unit of a seek window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekUnit {
    /// Microseconds on the container timeline
    Micros,
    /// Byte offset in the input
    Bytes,
}

/// Acceptable landing range for a seek, inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekWindow {
    pub min: i64,
    pub target: i64,
    pub max: i64,
    pub unit: SeekUnit,
}

/// Pixel layout of a decoded picture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Rgba32,
    Yuv420p,
    Gray8,
}

/// Decoded picture
#[derive(Debug)]
pub struct Picture {
    pub width: u32,
    pub height: u32,
    /// Sample (pixel) aspect ratio as numerator/denominator; 0/1 when unknown
    pub aspect_ratio: (u32, u32),
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

/// Decoded interleaved f32 audio
#[derive(Debug)]
pub struct AudioSamples {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioSamples {
    /// Samples per channel
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    /// Playback length in seconds at the native rate
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 / self.sample_rate as f64
        }
    }
}

/// Decoded payload
#[derive(Debug)]
pub enum FrameContent {
    Audio(AudioSamples),
    Picture(Picture),
}

/// Output of a [`StreamDecoder`]
///
/// Not `Clone`: exactly one owner at a time, moved into the frame queue.
#[derive(Debug)]
pub struct DecodedFrame {
    /// Seconds; `None` when the codec could not attach one
    pub pts: Option<f64>,
    pub pos: Option<u64>,
    pub content: FrameContent,
}

/// Result of feeding a packet to a codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Accepted,
    /// Codec must emit frames before it accepts more input
    Full,
}

/// Result of asking a codec for output
#[derive(Debug)]
pub enum ReceiveOutcome {
    Frame(DecodedFrame),
    NeedInput,
    /// Fully drained after an end-of-stream send
    Drained,
}

/// Send/receive codec for one stream
///
/// Any `Err` is an unrecoverable codec failure for that stream.
pub trait StreamDecoder: Send {
    /// Feed a packet; `None` enters drain mode
    fn send_packet(&mut self, packet: Option<&Packet>) -> Result<SendOutcome>;

    fn receive_frame(&mut self) -> Result<ReceiveOutcome>;

    /// Drop internal state (generation boundary)
    fn flush(&mut self);
}

/// Container access plus codec factory
pub trait MediaSource: Send {
    /// Human-readable input name for logs
    fn name(&self) -> &str;

    fn streams(&self) -> &[StreamInfo];

    /// Best stream of `kind`, optionally related to another stream
    fn best_stream(&self, kind: MediaKind, related: Option<usize>) -> Option<usize> {
        let _ = related;
        self.streams().iter().find(|s| s.kind == kind).map(|s| s.index)
    }

    /// Total duration in seconds
    fn duration(&self) -> Option<f64>;

    /// Container start time in seconds
    fn start_time(&self) -> Option<f64> {
        None
    }

    /// Overall bit rate in bits per second, when known
    fn bit_rate(&self) -> Option<u64> {
        None
    }

    /// Timestamps may jump (transport-stream style containers)
    fn has_discontinuous_timestamps(&self) -> bool {
        false
    }

    /// Whether the container can seek on its own; when it cannot, decoders
    /// restart their timestamps from the stream start after a flush
    fn supports_native_seek(&self) -> bool {
        true
    }

    fn seek(&mut self, window: &SeekWindow) -> Result<()>;

    /// Next packet; `Ok(None)` at end of input, `Err` for unrecoverable I/O
    fn read_packet(&mut self) -> Result<Option<Packet>>;

    fn open_decoder(&mut self, stream_index: usize) -> Result<Box<dyn StreamDecoder>>;

    /// Network inputs: stop fetching while paused
    fn pause_reading(&mut self) {}

    fn resume_reading(&mut self) {}
}

/// Sample rate and channel count of a PCM stream (samples are always f32)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioSpec {
    /// Interleaved samples per second
    pub fn samples_per_second(&self) -> f64 {
        self.sample_rate as f64 * self.channels as f64
    }
}

/// What the output device agreed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSpec {
    pub spec: AudioSpec,
    /// Device buffer size in frames (samples per channel)
    pub hw_buffer_frames: usize,
}

/// Output device negotiation
pub trait AudioDevice {
    fn open(&mut self, wanted: &AudioSpec) -> Result<OutputSpec>;
}

/// Channel/rate conversion into the device format
pub trait AudioConverter: Send {
    /// Convert one decoded chunk
    ///
    /// `source_rate` is the speed-scaled input rate and `wanted_frames` the
    /// drift-compensated length the input should be stretched or squeezed
    /// to before rate conversion. Returns interleaved samples in `target`
    /// layout.
    fn convert(
        &mut self,
        input: &AudioSamples,
        source_rate: u32,
        wanted_frames: usize,
        target: &AudioSpec,
    ) -> Result<Vec<f32>>;
}
