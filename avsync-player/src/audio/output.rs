//! Audio output using cpal
//!
//! [`CpalOutput`] negotiates the device format as an [`AudioDevice`] and,
//! once the player has started, runs a cpal output stream whose data
//! callback pulls samples through an [`AudioPuller`].

use crate::error::{Error, Result};
use crate::media::{AudioDevice, AudioSpec, OutputSpec};
use crate::playback::engine::AudioPuller;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleFormat, Stream, StreamConfig, SupportedBufferSize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Device buffer size requested when the device reports a range
pub const DEFAULT_BUFFER_FRAMES: u32 = 1024;

/// Output device handle
pub struct CpalOutput {
    device: Device,
    config: Option<StreamConfig>,
    sample_format: SampleFormat,
    stream: Option<Stream>,
    error_count: Arc<AtomicU32>,
}

impl CpalOutput {
    /// Default output device of the default host
    pub fn default_device() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Using audio device: {}", name);
        Ok(Self {
            device,
            config: None,
            sample_format: SampleFormat::F32,
            stream: None,
            error_count: Arc::new(AtomicU32::new(0)),
        })
    }

    /// Stream errors reported by the backend so far
    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Start the output stream, pulling samples from `puller`
    pub fn start(&mut self, puller: AudioPuller) -> Result<()> {
        let config = self
            .config
            .clone()
            .ok_or_else(|| Error::InvalidState("audio device not opened".to_string()))?;
        let stream = match self.sample_format {
            SampleFormat::F32 => self.build_stream_f32(&config, puller)?,
            SampleFormat::I16 => self.build_stream_converted::<i16>(&config, puller, |s| (s * i16::MAX as f32) as i16)?,
            SampleFormat::U16 => self.build_stream_converted::<u16>(&config, puller, |s| ((s + 1.0) * 32767.5) as u16)?,
            other => {
                return Err(Error::AudioOutput(format!("Unsupported sample format: {:?}", other)));
            }
        };
        stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;
        self.stream = Some(stream);
        info!("Audio stream started");
        Ok(())
    }

    /// Stop and drop the output stream
    pub fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            stream
                .pause()
                .map_err(|e| Error::AudioOutput(format!("Failed to pause stream: {}", e)))?;
            debug!("Audio stream stopped");
        }
        Ok(())
    }

    fn error_callback(&self) -> impl FnMut(cpal::StreamError) + Send + 'static {
        let error_count = Arc::clone(&self.error_count);
        move |err| {
            error!("Audio stream error: {}", err);
            error_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn build_stream_f32(&self, config: &StreamConfig, puller: AudioPuller) -> Result<Stream> {
        self.device
            .build_output_stream(
                config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    puller.fill(data);
                    for sample in data.iter_mut() {
                        *sample = sample.clamp(-1.0, 1.0);
                    }
                },
                self.error_callback(),
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
    }

    fn build_stream_converted<T>(
        &self,
        config: &StreamConfig,
        puller: AudioPuller,
        convert: fn(f32) -> T,
    ) -> Result<Stream>
    where
        T: cpal::SizedSample + Send + 'static,
    {
        let mut scratch: Vec<f32> = Vec::new();
        self.device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0.0);
                    puller.fill(&mut scratch);
                    for (out, sample) in data.iter_mut().zip(&scratch) {
                        *out = convert(sample.clamp(-1.0, 1.0));
                    }
                },
                self.error_callback(),
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
    }
}

impl AudioDevice for CpalOutput {
    /// Use the wanted rate and channel count when the device supports them,
    /// the device default otherwise
    fn open(&mut self, wanted: &AudioSpec) -> Result<OutputSpec> {
        let supported = self
            .device
            .supported_output_configs()
            .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?
            .find(|c| {
                c.channels() == wanted.channels
                    && c.min_sample_rate().0 <= wanted.sample_rate
                    && c.max_sample_rate().0 >= wanted.sample_rate
                    && matches!(c.sample_format(), SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16)
            })
            .map(|c| c.with_sample_rate(cpal::SampleRate(wanted.sample_rate)));

        let supported = match supported {
            Some(config) => config,
            None => {
                warn!(
                    "Device does not support {} Hz x{}, using its default format",
                    wanted.sample_rate, wanted.channels
                );
                self.device
                    .default_output_config()
                    .map_err(|e| Error::AudioOutput(format!("Failed to get default config: {}", e)))?
            }
        };

        let buffer_frames = match supported.buffer_size() {
            SupportedBufferSize::Range { min, max } => DEFAULT_BUFFER_FRAMES.clamp(*min, *max),
            SupportedBufferSize::Unknown => DEFAULT_BUFFER_FRAMES,
        };
        self.sample_format = supported.sample_format();
        let mut config = supported.config();
        if matches!(supported.buffer_size(), SupportedBufferSize::Range { .. }) {
            config.buffer_size = BufferSize::Fixed(buffer_frames);
        }

        let spec = OutputSpec {
            spec: AudioSpec {
                sample_rate: config.sample_rate.0,
                channels: config.channels,
            },
            hw_buffer_frames: buffer_frames as usize,
        };
        debug!(
            "Audio config: sample_rate={}, channels={}, format={:?}, buffer_size={:?}",
            config.sample_rate.0, config.channels, self.sample_format, config.buffer_size
        );
        self.config = Some(config);
        Ok(spec)
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Error stopping audio stream: {}", e);
        }
    }
}
