//! Media source backed by symphonia
//!
//! Demuxes a local file with symphonia's probe and format readers and decodes
//! its audio tracks to interleaved f32. symphonia has no picture codecs, so
//! only audio streams are reported; non-audio tracks are listed as
//! [`MediaKind::Other`] and their packets are skipped.

use super::{
    AudioSamples, DecodedFrame, FrameContent, MediaKind, MediaSource, Packet, ReceiveOutcome, SeekUnit, SeekWindow,
    SendOutcome, StreamDecoder, StreamInfo,
};
use crate::error::{Error, Result};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};
use tracing::{debug, warn};

struct Track {
    id: u32,
    params: CodecParameters,
    time_base: Option<TimeBase>,
}

/// File input demuxed by symphonia
pub struct SymphoniaSource {
    name: String,
    format: Box<dyn FormatReader>,
    tracks: Vec<Track>,
    streams: Vec<StreamInfo>,
    duration: Option<f64>,
    file_len: Option<u64>,
}

fn seconds(time_base: Option<TimeBase>, ts: u64) -> Option<f64> {
    time_base.map(|tb| {
        let time = tb.calc_time(ts);
        time.seconds as f64 + time.frac
    })
}

fn read_error(e: SymphoniaError) -> Error {
    match e {
        SymphoniaError::IoError(io) => Error::Io(io),
        other => Error::Io(std::io::Error::new(std::io::ErrorKind::Other, other.to_string())),
    }
}

impl SymphoniaSource {
    /// Probe `path` and list its tracks
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::Open(format!("{}: {}", path.display(), e)))?;
        let file_len = file.metadata().ok().map(|m| m.len());
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| Error::Open(format!("{}: failed to probe format: {}", path.display(), e)))?;
        let format = probed.format;

        let mut tracks = Vec::new();
        let mut streams = Vec::new();
        let mut duration: Option<f64> = None;
        for (index, track) in format.tracks().iter().enumerate() {
            let params = track.codec_params.clone();
            let is_audio = params.codec != CODEC_TYPE_NULL && params.sample_rate.is_some();
            let kind = if is_audio { MediaKind::Audio } else { MediaKind::Other };
            let codec_name = symphonia::default::get_codecs()
                .get_codec(params.codec)
                .map(|d| d.short_name.to_string())
                .unwrap_or_else(|| "unknown".to_string());

            let mut info = StreamInfo::new(index, kind, codec_name);
            info.start_time = seconds(params.time_base, params.start_ts);
            info.sample_rate = params.sample_rate;
            info.channels = params.channels.map(|c| c.count() as u16);

            if let Some(track_duration) = params.n_frames.and_then(|n| seconds(params.time_base, n)) {
                duration = Some(duration.map_or(track_duration, |d| d.max(track_duration)));
            }

            debug!(
                "Track {} (id {}): {} {} rate={:?} channels={:?}",
                index, track.id, kind, info.codec_name, info.sample_rate, info.channels
            );
            tracks.push(Track {
                id: track.id,
                time_base: params.time_base,
                params,
            });
            streams.push(info);
        }

        Ok(Self {
            name: path.display().to_string(),
            format,
            tracks,
            streams,
            duration,
            file_len,
        })
    }

    fn index_of(&self, track_id: u32) -> Option<usize> {
        self.tracks.iter().position(|t| t.id == track_id)
    }
}

impl MediaSource for SymphoniaSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }

    fn start_time(&self) -> Option<f64> {
        self.streams.iter().filter_map(|s| s.start_time).reduce(f64::min)
    }

    /// Average over the whole file
    fn bit_rate(&self) -> Option<u64> {
        match (self.file_len, self.duration) {
            (Some(len), Some(duration)) if duration > 0.0 => Some((len as f64 * 8.0 / duration) as u64),
            _ => None,
        }
    }

    fn seek(&mut self, window: &SeekWindow) -> Result<()> {
        if window.unit == SeekUnit::Bytes {
            return Err(Error::Seek("byte seeking is not supported by this input".to_string()));
        }
        let track_id = self
            .streams
            .iter()
            .find(|s| s.kind == MediaKind::Audio)
            .map(|s| self.tracks[s.index].id);
        let target = (window.target.max(0) as f64 / 1_000_000.0).max(0.0);
        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: Time::new(target.trunc() as u64, target.fract()),
                    track_id,
                },
            )
            .map_err(|e| Error::Seek(format!("{}: {}", self.name, e)))?;
        debug!("Seeked to ts {} (requested {})", seeked.actual_ts, seeked.required_ts);
        Ok(())
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    warn!("{}: track list changed mid-stream; treating as end of input", self.name);
                    return Ok(None);
                }
                Err(e) => return Err(read_error(e)),
            };
            let Some(index) = self.index_of(packet.track_id()) else {
                continue;
            };
            let time_base = self.tracks[index].time_base;
            let pts = seconds(time_base, packet.ts());
            let duration = seconds(time_base, packet.dur()).unwrap_or(0.0);
            return Ok(Some(Packet::new(index, pts, packet.buf()).with_duration(duration)));
        }
    }

    fn open_decoder(&mut self, stream_index: usize) -> Result<Box<dyn StreamDecoder>> {
        let track = self
            .tracks
            .get(stream_index)
            .ok_or_else(|| Error::StreamNotFound(format!("{}: no stream {}", self.name, stream_index)))?;
        let decoder = symphonia::default::get_codecs()
            .make(&track.params, &DecoderOptions::default())
            .map_err(|e| Error::Decode(format!("failed to create decoder: {}", e)))?;
        Ok(Box::new(SymphoniaDecoder {
            track_id: track.id,
            decoder,
            ready: None,
            draining: false,
        }))
    }
}

/// One symphonia codec behind the send/receive protocol
///
/// symphonia decodes a whole packet at a time, so at most one frame is
/// ever pending.
struct SymphoniaDecoder {
    track_id: u32,
    decoder: Box<dyn Decoder>,
    ready: Option<DecodedFrame>,
    draining: bool,
}

impl StreamDecoder for SymphoniaDecoder {
    fn send_packet(&mut self, packet: Option<&Packet>) -> Result<SendOutcome> {
        if self.ready.is_some() {
            return Ok(SendOutcome::Full);
        }
        let Some(packet) = packet else {
            self.draining = true;
            return Ok(SendOutcome::Accepted);
        };

        let encoded = symphonia::core::formats::Packet::new_from_slice(self.track_id, 0, 0, &packet.data);
        let decoded = match self.decoder.decode(&encoded) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                // Corrupt packet: skip it and keep going
                warn!("Skipping undecodable packet: {}", e);
                return Ok(SendOutcome::Accepted);
            }
            Err(e) => return Err(Error::Decode(e.to_string())),
        };

        let spec = *decoded.spec();
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        self.ready = Some(DecodedFrame {
            pts: packet.pts,
            pos: packet.pos,
            content: FrameContent::Audio(AudioSamples {
                sample_rate: spec.rate,
                channels: spec.channels.count() as u16,
                samples: buffer.samples().to_vec(),
            }),
        });
        Ok(SendOutcome::Accepted)
    }

    fn receive_frame(&mut self) -> Result<ReceiveOutcome> {
        if let Some(frame) = self.ready.take() {
            return Ok(ReceiveOutcome::Frame(frame));
        }
        if self.draining {
            return Ok(ReceiveOutcome::Drained);
        }
        Ok(ReceiveOutcome::NeedInput)
    }

    fn flush(&mut self) {
        self.decoder.reset();
        self.ready = None;
        self.draining = false;
    }
}
