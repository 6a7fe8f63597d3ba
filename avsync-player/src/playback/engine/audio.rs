//! Audio pull
//!
//! The output device calls [`AudioPuller::fill`] whenever it needs samples.
//! Each call drains converted chunks, decoding a new one whenever the last
//! is used up. When nothing is decodable (paused, starved, at EOF) a chunk
//! of silence is written instead; the call never blocks on the decoder.
//!
//! After every fill the audio clock is set to the position of the last
//! sample handed to the device, minus what is still buffered ahead of the
//! speaker.

use super::Shared;
use crate::media::{AudioConverter, FrameContent, MediaKind, OutputSpec};
use crate::playback::sync::{audio_clock_time, AudioDriftFilter};
use avsync_common::params::SyncMode;
use avsync_common::time::monotonic_secs;
use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};
use tracing::{trace, warn};

/// Device-side audio state, touched only from the pull callback
pub(crate) struct AudioOutputState {
    converter: Box<dyn AudioConverter>,
    output: OutputSpec,
    drift: AudioDriftFilter,
    chunk: Vec<f32>,
    index: usize,
    silent: bool,
    /// Timeline position just after the last decoded chunk (NaN unknown)
    audio_pts: f64,
    audio_serial: Option<u64>,
}

impl AudioOutputState {
    pub fn new(converter: Box<dyn AudioConverter>, output: OutputSpec, drift: AudioDriftFilter) -> Self {
        Self {
            converter,
            output,
            drift,
            chunk: Vec::new(),
            index: 0,
            silent: true,
            audio_pts: f64::NAN,
            audio_serial: None,
        }
    }

    fn unread(&self) -> usize {
        self.chunk.len().saturating_sub(self.index)
    }

    fn fill_silence(&mut self, samples_per_channel: usize) {
        let len = samples_per_channel * self.output.spec.channels as usize;
        self.chunk.clear();
        self.chunk.resize(len, 0.0);
        self.silent = true;
    }
}

/// Handle for the audio device callback
///
/// Cheap to clone; all clones feed the same output state.
#[derive(Clone)]
pub struct AudioPuller {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for AudioPuller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioPuller")
            .field("output", &self.output_spec())
            .finish()
    }
}

impl AudioPuller {
    pub(super) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Format the device agreed to
    pub fn output_spec(&self) -> Option<OutputSpec> {
        self.shared
            .audio_out
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|state| state.output)
    }

    /// Fill `out` with interleaved samples in the device format
    pub fn fill(&self, out: &mut [f32]) {
        self.fill_at(out, monotonic_secs());
    }

    /// Fill for a device callback that started at monotonic time `now`
    ///
    /// The audio clock is anchored at `now`, not at the time the copy ends.
    pub fn fill_at(&self, out: &mut [f32], now: f64) {
        let shared = &*self.shared;
        let mut guard = shared.audio_out.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(state) = guard.as_mut() else {
            out.fill(0.0);
            return;
        };

        let muted = shared.control.muted.load(Ordering::Acquire);
        let mut written = 0;
        while written < out.len() {
            if state.index >= state.chunk.len() {
                match decode_audio_frame(shared, state) {
                    Some(chunk) if !chunk.is_empty() => {
                        state.chunk = chunk;
                        state.silent = false;
                    }
                    _ => state.fill_silence(shared.params.audio_silence_samples),
                }
                state.index = 0;
            }
            let n = (state.chunk.len() - state.index).min(out.len() - written);
            let target = &mut out[written..written + n];
            if muted || state.silent {
                target.fill(0.0);
            } else {
                target.copy_from_slice(&state.chunk[state.index..state.index + n]);
            }
            written += n;
            state.index += n;
        }

        if !state.audio_pts.is_nan() && !muted {
            let spec = state.output.spec;
            let hw_samples = state.output.hw_buffer_frames * spec.channels as usize;
            let clock = audio_clock_time(state.audio_pts, hw_samples, state.unread(), spec.samples_per_second());
            shared.audclk.set_at(clock, state.audio_serial, now);
            shared.extclk.sync_to_slave(&shared.audclk, shared.params.no_sync_threshold);
        }
    }
}

/// Take the next current-generation frame and convert it for the device
///
/// `None` means "play silence": paused, nothing decoded yet, or the
/// conversion failed.
fn decode_audio_frame(shared: &Shared, state: &mut AudioOutputState) -> Option<Vec<f32>> {
    if shared.is_paused() {
        return None;
    }
    let component = shared.active(MediaKind::Audio)?;

    let frame = loop {
        if component.frames.nb_remaining() == 0 {
            return None;
        }
        let frame = component.frames.peek_readable()?;
        component.frames.next();
        if frame.serial == component.frames.packet_serial() {
            break frame;
        }
    };

    let FrameContent::Audio(samples) = &frame.content else {
        return None;
    };
    let nb_samples = samples.frames();
    let source_rate = (samples.sample_rate as f64 * shared.control.speed()) as i64;
    if source_rate <= 0 {
        return None;
    }

    let wanted = if shared.master_type() != SyncMode::Audio {
        let diff = shared.audclk.get() - shared.master_clock().get();
        state.drift.wanted_samples(nb_samples, diff, source_rate)
    } else {
        nb_samples
    };

    let converted = match state.converter.convert(samples, source_rate as u32, wanted, &state.output.spec) {
        Ok(converted) => converted,
        Err(e) => {
            warn!("Audio conversion failed: {}", e);
            return None;
        }
    };

    state.audio_pts = if frame.pts.is_nan() || samples.sample_rate == 0 {
        f64::NAN
    } else {
        frame.pts + nb_samples as f64 / samples.sample_rate as f64
    };
    state.audio_serial = Some(frame.serial);
    if let Some(pos) = frame.pos {
        shared.control.last_pos.store(pos as i64, Ordering::Release);
    }
    trace!(
        "audio: pts={:.3} nb={} wanted={} out={}",
        frame.pts,
        nb_samples,
        wanted,
        converted.len()
    );
    Some(converted)
}
