//! Synchronization algorithms
//!
//! Pure decision functions plus the audio drift filter. The engine feeds
//! them clock readings; nothing here touches queues or threads, so every
//! rule can be exercised directly in tests.

use avsync_common::params::{PlaybackParams, SyncMode};
use tracing::trace;

/// Maximum tolerated frame duration for containers whose timestamps may jump
pub const MAX_FRAME_DURATION_DISCONTINUOUS: f64 = 10.0;

/// Maximum tolerated frame duration otherwise
pub const MAX_FRAME_DURATION: f64 = 3600.0;

pub fn max_frame_duration(discontinuous_timestamps: bool) -> f64 {
    if discontinuous_timestamps {
        MAX_FRAME_DURATION_DISCONTINUOUS
    } else {
        MAX_FRAME_DURATION
    }
}

/// Resolve the configured sync mode against the streams actually open
///
/// Video falls back to audio, audio falls back to external.
pub fn select_master(preferred: SyncMode, has_audio: bool, has_video: bool) -> SyncMode {
    match preferred {
        SyncMode::Video if has_video => SyncMode::Video,
        SyncMode::Video => SyncMode::Audio,
        SyncMode::Audio if has_audio => SyncMode::Audio,
        SyncMode::Audio => SyncMode::External,
        SyncMode::External => SyncMode::External,
    }
}

/// Exponentially-decayed A-V difference filter driving sample compensation
#[derive(Debug, Clone)]
pub struct AudioDriftFilter {
    coef: f64,
    cum: f64,
    count: u32,
    avg_num: u32,
    /// Averaged drift below this is ignored (seconds)
    threshold: f64,
    max_percent: i64,
    no_sync_threshold: f64,
}

impl AudioDriftFilter {
    /// `threshold` is the device buffer length in seconds: drift smaller
    /// than what the device buffers cannot be measured reliably
    pub fn new(params: &PlaybackParams, threshold: f64) -> Self {
        Self {
            coef: params.audio_diff_avg_coef(),
            cum: 0.0,
            count: 0,
            avg_num: params.audio_diff_avg_num,
            threshold,
            max_percent: params.sample_correction_max_percent as i64,
            no_sync_threshold: params.no_sync_threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Number of samples the next chunk of `nb_samples` should become
    ///
    /// `diff` is audio clock minus master clock; `source_rate` is the
    /// speed-scaled source rate, truncated to an integer. Returns
    /// `nb_samples` unchanged until enough measurements were averaged or
    /// while the averaged drift is under the threshold; the result never
    /// leaves `nb_samples * (100 ± max_percent) / 100`.
    pub fn wanted_samples(&mut self, nb_samples: usize, diff: f64, source_rate: i64) -> usize {
        let nb = nb_samples as i64;
        let mut wanted = nb;

        if !diff.is_nan() && diff.abs() < self.no_sync_threshold {
            self.cum = diff + self.coef * self.cum;
            if self.count < self.avg_num {
                self.count += 1;
            } else {
                let avg_diff = self.cum * (1.0 - self.coef);
                if avg_diff.abs() >= self.threshold {
                    wanted = nb + (diff * source_rate as f64) as i64;
                    let min = nb * (100 - self.max_percent) / 100;
                    let max = nb * (100 + self.max_percent) / 100;
                    wanted = wanted.clamp(min, max);
                }
                trace!(
                    "diff={:.6} adiff={:.6} sample_diff={} threshold={:.6}",
                    diff,
                    avg_diff,
                    wanted - nb,
                    self.threshold
                );
            }
        } else {
            // Too large: probably initial PTS jitter, restart averaging
            self.count = 0;
            self.cum = 0.0;
        }
        wanted.max(0) as usize
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.cum = 0.0;
    }
}

/// Adjust the nominal inter-frame `delay` so video follows the master
///
/// `diff` is video clock minus master clock, `None` when video is master.
/// Never negative. Returns `2 * delay` (repeat the frame) when video is
/// ahead by at least the sync threshold and the frame is short.
pub fn compute_target_delay(
    delay: f64,
    diff: Option<f64>,
    params: &PlaybackParams,
    max_frame_duration: f64,
) -> f64 {
    let mut delay = delay;
    if let Some(diff) = diff {
        let sync_threshold = params
            .sync_threshold_min
            .max(params.sync_threshold_max.min(delay));
        if !diff.is_nan() && diff.abs() < max_frame_duration {
            if diff <= -sync_threshold {
                delay = (delay + diff).max(0.0);
            } else if diff >= sync_threshold && delay > params.frame_dup_threshold {
                delay += diff;
            } else if diff >= sync_threshold {
                delay *= 2.0;
            }
        }
        trace!("video: delay={:.3} A-V={:.6}", delay, -diff);
    }
    delay
}

/// Display duration of `current` given the frame after it
pub fn frame_duration(
    current_pts: f64,
    current_duration: f64,
    current_serial: u64,
    next_pts: f64,
    next_serial: u64,
    speed: f64,
    max_frame_duration: f64,
) -> f64 {
    if current_serial != next_serial {
        return 0.0;
    }
    let duration = (next_pts - current_pts) / speed;
    if duration.is_nan() || duration <= 0.0 || duration > max_frame_duration {
        current_duration
    } else {
        duration
    }
}

/// Whether a freshly decoded picture is already hopelessly late
///
/// `diff` is picture pts minus master clock. Only same-generation pictures
/// with more packets queued behind them are dropped.
pub fn should_drop_early(
    diff: f64,
    no_sync_threshold: f64,
    same_serial_as_clock: bool,
    queued_packets: usize,
) -> bool {
    !diff.is_nan()
        && diff.abs() < no_sync_threshold
        && diff < 0.0
        && same_serial_as_clock
        && queued_packets > 0
}

/// Whether a stream has buffered enough to stop the reader
///
/// Absent or aborted streams and cover-art streams always count as full.
pub fn stream_has_enough_packets(
    present: bool,
    aborted: bool,
    attached_picture: bool,
    nb_packets: usize,
    queued_duration: f64,
    min_frames: usize,
) -> bool {
    !present
        || aborted
        || attached_picture
        || (nb_packets > min_frames && (queued_duration == 0.0 || queued_duration > 1.0))
}

/// Seek window around `target` for a relative jump of `rel`
///
/// The ±2 slack covers rounding in how targets are derived from clock
/// readings.
pub fn seek_window(target: i64, rel: i64) -> (i64, i64) {
    let min = if rel > 0 {
        target.saturating_sub(rel).saturating_add(2)
    } else {
        i64::MIN
    };
    let max = if rel < 0 {
        target.saturating_sub(rel).saturating_sub(2)
    } else {
        i64::MAX
    };
    (min, max)
}

/// Whether a packet falls inside the configured play range
///
/// All values in seconds; unknown packet timestamps are always in range.
pub fn packet_in_play_range(
    packet_ts: Option<f64>,
    stream_start: Option<f64>,
    start_time: Option<f64>,
    max_duration: Option<f64>,
) -> bool {
    match (max_duration, packet_ts) {
        (None, _) | (_, None) => true,
        (Some(max), Some(ts)) => {
            ts - stream_start.unwrap_or(0.0) - start_time.unwrap_or(0.0) <= max
        }
    }
}

/// Audio clock position for a pull that just finished
///
/// `audio_pts` is the end of the last converted chunk; the device still has
/// two hardware buffers queued plus whatever of the chunk was not copied.
pub fn audio_clock_time(
    audio_pts: f64,
    hw_buffer_samples: usize,
    unread_samples: usize,
    samples_per_second: f64,
) -> f64 {
    audio_pts - (2 * hw_buffer_samples + unread_samples) as f64 / samples_per_second
}
