//! Audio conversion using rubato
//!
//! [`RubatoConverter`] maps decoded chunks onto the device layout: channel
//! remap, speed-scaled rate conversion, and drift compensation (stretching
//! or squeezing the chunk to the sample count the sync filter asked for).

use crate::error::{Error, Result};
use crate::media::{AudioConverter, AudioSamples, AudioSpec};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::debug;

/// Largest per-chunk stretch the resampler is built to accept
const MAX_RELATIVE_RATIO: f64 = 1.2;

/// Compensation factors are clamped to this band
const COMPENSATION_RANGE: (f64, f64) = (0.85, 1.15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ResamplerKey {
    source_rate: u32,
    target_rate: u32,
    channels: usize,
    chunk_frames: usize,
}

/// Channel remap + rate conversion into the output format
///
/// The rubato resampler is kept across chunks while rates, channel count and
/// chunk size stay the same, so consecutive chunks are filtered continuously.
#[derive(Default)]
pub struct RubatoConverter {
    resampler: Option<(ResamplerKey, FastFixedIn<f32>)>,
}

impl RubatoConverter {
    pub fn new() -> Self {
        Self::default()
    }

    fn resampler_for(&mut self, key: ResamplerKey) -> Result<&mut FastFixedIn<f32>> {
        let stale = !matches!(&self.resampler, Some((current, _)) if *current == key);
        if stale {
            debug!(
                "Creating resampler {}Hz -> {}Hz ({} channels, {} frames per chunk)",
                key.source_rate, key.target_rate, key.channels, key.chunk_frames
            );
            let resampler = FastFixedIn::<f32>::new(
                key.target_rate as f64 / key.source_rate as f64,
                MAX_RELATIVE_RATIO,
                PolynomialDegree::Cubic,
                key.chunk_frames,
                key.channels,
            )
            .map_err(|e| Error::Decode(format!("Failed to create resampler: {}", e)))?;
            self.resampler = Some((key, resampler));
        }
        match self.resampler.as_mut() {
            Some((_, resampler)) => Ok(resampler),
            None => Err(Error::InvalidState("resampler missing".to_string())),
        }
    }
}

impl AudioConverter for RubatoConverter {
    fn convert(
        &mut self,
        input: &AudioSamples,
        source_rate: u32,
        wanted_frames: usize,
        target: &AudioSpec,
    ) -> Result<Vec<f32>> {
        let frames = input.frames();
        if frames == 0 || source_rate == 0 || target.channels == 0 {
            return Ok(Vec::new());
        }
        let planar = remap_channels(input, target.channels as usize);

        if source_rate == target.sample_rate && wanted_frames == frames {
            return Ok(interleave(&planar));
        }

        let key = ResamplerKey {
            source_rate,
            target_rate: target.sample_rate,
            channels: target.channels as usize,
            chunk_frames: frames,
        };
        let compensation = (wanted_frames as f64 / frames as f64).clamp(COMPENSATION_RANGE.0, COMPENSATION_RANGE.1);
        let resampler = self.resampler_for(key)?;
        resampler
            .set_resample_ratio_relative(compensation, false)
            .map_err(|e| Error::Decode(format!("Compensation rejected: {}", e)))?;
        let output = resampler
            .process(&planar, None)
            .map_err(|e| Error::Decode(format!("Resampling failed: {}", e)))?;
        Ok(interleave(&output))
    }
}

/// Split interleaved input into `channels` planar buffers
///
/// Mono is duplicated, extra input channels are folded down by averaging
/// into the last output channel, missing ones are filled from channel 0.
fn remap_channels(input: &AudioSamples, channels: usize) -> Vec<Vec<f32>> {
    let in_channels = input.channels as usize;
    let frames = input.frames();
    let mut planar = vec![Vec::with_capacity(frames); channels];

    for frame in input.samples.chunks_exact(in_channels).take(frames) {
        for (ch, out) in planar.iter_mut().enumerate() {
            let sample = if in_channels == 1 {
                frame[0]
            } else if ch + 1 == channels && in_channels > channels {
                let rest = &frame[ch..];
                rest.iter().sum::<f32>() / rest.len() as f32
            } else if ch < in_channels {
                frame[ch]
            } else {
                frame[0]
            };
            out.push(sample);
        }
    }
    planar
}

fn interleave(planar: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = planar.first() else {
        return Vec::new();
    };
    let frames = first.len();
    let mut interleaved = Vec::with_capacity(frames * planar.len());
    for i in 0..frames {
        for channel in planar {
            interleaved.push(channel[i]);
        }
    }
    interleaved
}
