//! Playback tuning parameters
//!
//! All thresholds the synchronization engine consults live in a single
//! [`PlaybackParams`] record. A record is built once (defaults, TOML file,
//! or programmatically), validated, and then handed to the engine by value;
//! nothing reads these values from shared mutable state afterwards.
//!
//! # Usage
//!
//! ```rust
//! use avsync_common::params::{PlaybackParams, SyncMode};
//!
//! let params = PlaybackParams {
//!     sync_mode: SyncMode::External,
//!     loop_count: 0,
//!     ..PlaybackParams::default()
//! };
//! assert!(params.validate().is_ok());
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Which timeline the other streams follow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Follow the audio clock (falls back to external when there is no audio)
    Audio,
    /// Follow the video clock (falls back to audio when there is no video)
    Video,
    /// Follow the external wall clock
    External,
}

impl Default for SyncMode {
    fn default() -> Self {
        SyncMode::Audio
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Audio => write!(f, "audio"),
            SyncMode::Video => write!(f, "video"),
            SyncMode::External => write!(f, "external"),
        }
    }
}

/// Tunable playback parameters
///
/// Field defaults match the values the engine was tuned with. Every field
/// may be omitted from a TOML `[playback]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackParams {
    /// Preferred master clock
    pub sync_mode: SyncMode,

    /// Combined byte ceiling of both packet queues before the reader backs off
    ///
    /// Default: 15 MiB
    pub max_queue_bytes: usize,

    /// Packets a stream must hold (with at least one second buffered)
    /// before it counts as "enough"
    pub min_frames: usize,

    /// No A/V correction below this drift (seconds)
    pub sync_threshold_min: f64,

    /// Correction always applies above this drift (seconds)
    pub sync_threshold_max: f64,

    /// Frames longer than this are stretched instead of duplicated (seconds)
    pub frame_dup_threshold: f64,

    /// Drift beyond this is treated as a discontinuity, not drift (seconds)
    pub no_sync_threshold: f64,

    /// Maximum audio sample-count correction, percent of nominal
    pub sample_correction_max_percent: u32,

    /// Number of A-V differences folded into the running average
    pub audio_diff_avg_num: u32,

    /// Decoded picture queue capacity
    pub picture_queue_size: usize,

    /// Decoded audio frame queue capacity
    pub sample_queue_size: usize,

    /// Reader back-off while queues are full or input is at EOF (milliseconds)
    pub retry_wait_ms: u64,

    /// Length of the silence chunk written when no audio is available (samples per channel)
    pub audio_silence_samples: usize,

    /// Number of times to play the input; 0 loops forever
    pub loop_count: u32,

    /// Start position in seconds (None = container start)
    pub start_time: Option<f64>,

    /// Play only this many seconds after the start position (None = to the end)
    pub max_duration: Option<f64>,

    /// Seek by byte offset instead of timestamp
    pub seek_by_bytes: bool,

    /// Drop pictures that are already late when the next one is due
    pub frame_drop_late: bool,

    /// Do not open the audio stream
    pub audio_disabled: bool,

    /// Do not open the video stream
    pub video_disabled: bool,

    /// Capacity of the host event channel
    pub event_channel_capacity: usize,
}

impl Default for PlaybackParams {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::Audio,
            max_queue_bytes: 15 * 1024 * 1024,
            min_frames: 25,
            sync_threshold_min: 0.04,
            sync_threshold_max: 0.1,
            frame_dup_threshold: 0.1,
            no_sync_threshold: 10.0,
            sample_correction_max_percent: 10,
            audio_diff_avg_num: 20,
            picture_queue_size: 3,
            sample_queue_size: 9,
            retry_wait_ms: 10,
            audio_silence_samples: 1024,
            loop_count: 1,
            start_time: None,
            max_duration: None,
            seek_by_bytes: false,
            frame_drop_late: true,
            audio_disabled: false,
            video_disabled: false,
            event_channel_capacity: 64,
        }
    }
}

impl PlaybackParams {
    /// Check ranges and cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.picture_queue_size < 3 {
            return Err(Error::Config(format!(
                "picture_queue_size must be at least 3 (got {})",
                self.picture_queue_size
            )));
        }
        if self.sample_queue_size < 3 {
            return Err(Error::Config(format!(
                "sample_queue_size must be at least 3 (got {})",
                self.sample_queue_size
            )));
        }
        if !(self.sync_threshold_min > 0.0 && self.sync_threshold_min <= self.sync_threshold_max) {
            return Err(Error::Config(format!(
                "sync thresholds must satisfy 0 < min <= max (got {} / {})",
                self.sync_threshold_min, self.sync_threshold_max
            )));
        }
        if self.frame_dup_threshold < 0.0 {
            return Err(Error::Config("frame_dup_threshold must not be negative".to_string()));
        }
        if self.no_sync_threshold <= self.sync_threshold_max {
            return Err(Error::Config(format!(
                "no_sync_threshold ({}) must exceed sync_threshold_max ({})",
                self.no_sync_threshold, self.sync_threshold_max
            )));
        }
        if self.sample_correction_max_percent > 100 {
            return Err(Error::Config(format!(
                "sample_correction_max_percent must be within 0..=100 (got {})",
                self.sample_correction_max_percent
            )));
        }
        if self.audio_diff_avg_num == 0 {
            return Err(Error::Config("audio_diff_avg_num must be positive".to_string()));
        }
        if self.audio_silence_samples == 0 {
            return Err(Error::Config("audio_silence_samples must be positive".to_string()));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::Config("event_channel_capacity must be positive".to_string()));
        }
        if let Some(start) = self.start_time {
            if !start.is_finite() || start < 0.0 {
                return Err(Error::Config(format!("start_time must be a non-negative number (got {})", start)));
            }
        }
        if let Some(duration) = self.max_duration {
            if !duration.is_finite() || duration <= 0.0 {
                return Err(Error::Config(format!("max_duration must be positive (got {})", duration)));
            }
        }
        if self.audio_disabled && self.video_disabled {
            return Err(Error::Config("audio and video cannot both be disabled".to_string()));
        }
        Ok(())
    }

    /// Coefficient of the exponentially-decayed A-V difference average
    ///
    /// Chosen so that a difference weighs 1% after `audio_diff_avg_num` updates.
    pub fn audio_diff_avg_coef(&self) -> f64 {
        (0.01f64.ln() / self.audio_diff_avg_num as f64).exp()
    }
}
