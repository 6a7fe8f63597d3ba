//! Fake audio output for engine tests
//!
//! `FakeDevice` accepts whatever format is asked for; `PassthroughConverter`
//! copies samples without resampling, truncating or repeating the last frame
//! to honour the requested length.

use avsync_player::error::{Error, Result};
use avsync_player::media::{AudioConverter, AudioDevice, AudioSamples, AudioSpec, OutputSpec};
use std::sync::{Arc, Mutex};

/// Device buffer reported by [`FakeDevice`] (frames)
pub const FAKE_HW_BUFFER_FRAMES: usize = 256;

#[derive(Debug, Default)]
pub struct FakeDevice {
    pub opened: Option<AudioSpec>,
    pub refuse: bool,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// A device whose open always fails
    pub fn refusing() -> Self {
        Self {
            opened: None,
            refuse: true,
        }
    }
}

impl AudioDevice for FakeDevice {
    fn open(&mut self, wanted: &AudioSpec) -> Result<OutputSpec> {
        if self.refuse {
            return Err(Error::AudioOutput("fake device unavailable".to_string()));
        }
        self.opened = Some(*wanted);
        Ok(OutputSpec {
            spec: *wanted,
            hw_buffer_frames: FAKE_HW_BUFFER_FRAMES,
        })
    }
}

/// Records the `(source_rate, wanted_frames)` of every call
#[derive(Debug, Default, Clone)]
pub struct PassthroughConverter {
    pub calls: Arc<Mutex<Vec<(u32, usize)>>>,
}

impl AudioConverter for PassthroughConverter {
    fn convert(
        &mut self,
        input: &AudioSamples,
        source_rate: u32,
        wanted_frames: usize,
        target: &AudioSpec,
    ) -> Result<Vec<f32>> {
        self.calls.lock().unwrap().push((source_rate, wanted_frames));
        let in_channels = input.channels.max(1) as usize;
        let frames = input.frames();
        let mut out = Vec::with_capacity(wanted_frames * target.channels as usize);
        for i in 0..wanted_frames {
            let frame = i.min(frames.saturating_sub(1));
            for ch in 0..target.channels as usize {
                let sample = input
                    .samples
                    .get(frame * in_channels + ch.min(in_channels - 1))
                    .copied()
                    .unwrap_or(0.0);
                out.push(sample);
            }
        }
        Ok(out)
    }
}
