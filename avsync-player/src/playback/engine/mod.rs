//! Playback engine
//!
//! [`Player`] owns one packet queue, frame queue and decoder thread per open
//! stream, the three clocks, and the reader thread. Hosts drive it through
//! three surfaces:
//!
//! - controls (`play`, `pause`, `seek`, `set_speed`, ...) from any thread
//! - [`AudioPuller::fill`] from the audio device callback
//! - [`Player::refresh_video`] from a presentation poller
//!
//! ## Lifecycle
//!
//! ```text
//! open()   validate params, seek to start_time, probe timing
//! start()  select streams, open components, publish Ready, spawn reader
//! close()  stop reader → abort + join decoders → drop queues and clocks
//! ```

mod audio;
mod reader;
mod streams;
mod video;

pub use audio::AudioPuller;

use self::audio::AudioOutputState;
use self::streams::StreamComponent;
use self::video::VideoTimer;
use super::clock::Clock;
use super::events::StateNotifier;
use super::frame_queue::{Frame, FrameQueue};
use super::packet_queue::{PacketQueue, PACKET_QUEUE_CAPACITY};
use super::sync::{self, max_frame_duration};
use crate::error::{Error, Result};
use crate::media::{AudioConverter, AudioDevice, MediaKind, MediaSource, SeekUnit, SeekWindow};
use crate::playback::decoder::Decoder;
use avsync_common::events::{EventSender, PlayerState};
use avsync_common::params::{PlaybackParams, SyncMode};
use avsync_common::time::{micros_to_secs, monotonic_secs, secs_to_micros};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default poll interval suggested to the presentation loop (seconds)
pub const REFRESH_RATE: f64 = 0.01;

/// Byte rate assumed for relative byte seeks when the input reports no bit rate
pub const FALLBACK_BYTE_RATE: f64 = 180_000.0;

/// Audio output handed to [`Player::start`]
pub struct AudioSink<'a> {
    pub device: &'a mut dyn AudioDevice,
    pub converter: Box<dyn AudioConverter>,
}

/// Counters exposed to the host
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PlayerStats {
    /// Pictures discarded right after decoding because they were already late
    pub early_frame_drops: u64,
    /// Pictures skipped at presentation because the next one was already due
    pub late_frame_drops: u64,
    /// Notifications the host channel did not accept
    pub notification_failures: u64,
    pub audio_packets: usize,
    pub video_packets: usize,
    /// Bytes buffered across both packet queues
    pub queued_bytes: usize,
}

/// Result of one presentation poll
#[derive(Debug, Clone)]
pub struct VideoRefresh {
    /// Picture that just became current, if any
    pub frame: Option<Arc<Frame>>,
    /// Seconds until the next poll is useful
    pub remaining: f64,
}

/// Pending seek
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SeekRequest {
    /// Microseconds, or bytes when `by_bytes`
    pub target: i64,
    pub rel: i64,
    pub by_bytes: bool,
}

/// Flags and requests shared between controls and the reader
#[derive(Debug)]
pub(crate) struct Control {
    pub abort: AtomicBool,
    pub paused: AtomicBool,
    pub stopped: AtomicBool,
    pub stepping: AtomicBool,
    pub muted: AtomicBool,
    pub attachments_request: AtomicBool,
    pub seek: Mutex<Option<SeekRequest>>,
    pub speed_request: Mutex<Option<f64>>,
    /// f64 bits of the speed currently applied
    speed: AtomicU64,
    /// Byte offset of the last presented unit (-1 unknown)
    pub last_pos: AtomicI64,
}

impl Control {
    fn new() -> Self {
        Self {
            abort: AtomicBool::new(false),
            // Sessions start paused; play() starts them
            paused: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            stepping: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            attachments_request: AtomicBool::new(false),
            seek: Mutex::new(None),
            speed_request: Mutex::new(None),
            speed: AtomicU64::new(1.0f64.to_bits()),
            last_pos: AtomicI64::new(-1),
        }
    }

    pub fn speed(&self) -> f64 {
        f64::from_bits(self.speed.load(Ordering::Acquire))
    }

    pub fn set_speed(&self, speed: f64) {
        self.speed.store(speed.to_bits(), Ordering::Release);
    }
}

/// Wakes the reader out of its backoff sleep
#[derive(Debug, Default)]
pub(crate) struct Wakeup {
    signalled: Mutex<bool>,
    cond: Condvar,
}

impl Wakeup {
    pub fn notify(&self) {
        *self.signalled.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cond.notify_one();
    }

    /// Sleep up to `timeout` or until notified
    pub fn wait(&self, timeout: Duration) {
        let mut signalled = self.signalled.lock().unwrap_or_else(PoisonError::into_inner);
        if !*signalled {
            signalled = self
                .cond
                .wait_timeout(signalled, timeout)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        *signalled = false;
    }
}

#[derive(Debug, Default)]
pub(crate) struct Stats {
    pub early_drops: AtomicU64,
    pub late_drops: AtomicU64,
}

/// State shared by the reader, decoder threads, audio pull and controls
pub(crate) struct Shared {
    pub params: PlaybackParams,
    pub notifier: Arc<StateNotifier>,
    pub audio: Option<StreamComponent>,
    pub video: Option<StreamComponent>,
    pub audclk: Clock,
    pub vidclk: Clock,
    pub extclk: Clock,
    pub control: Control,
    pub wake: Wakeup,
    pub timer: Mutex<VideoTimer>,
    pub audio_out: Mutex<Option<AudioOutputState>>,
    pub stats: Stats,
    pub max_frame_duration: f64,
}

impl Shared {
    pub fn component(&self, kind: MediaKind) -> Option<&StreamComponent> {
        match kind {
            MediaKind::Audio => self.audio.as_ref(),
            MediaKind::Video => self.video.as_ref(),
            MediaKind::Other => None,
        }
    }

    /// Open and not failed
    pub fn active(&self, kind: MediaKind) -> Option<&StreamComponent> {
        self.component(kind).filter(|c| c.is_active())
    }

    pub fn master_type(&self) -> SyncMode {
        sync::select_master(
            self.params.sync_mode,
            self.active(MediaKind::Audio).is_some(),
            self.active(MediaKind::Video).is_some(),
        )
    }

    pub fn master_clock(&self) -> &Clock {
        match self.master_type() {
            SyncMode::Video => &self.vidclk,
            SyncMode::Audio => &self.audclk,
            SyncMode::External => &self.extclk,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.control.paused.load(Ordering::Acquire)
    }

    /// Paused as the host sees it: a pending single-frame step counts as paused
    pub fn is_effectively_paused(&self) -> bool {
        self.is_paused() || self.control.stepping.load(Ordering::Acquire)
    }

    pub fn lock_timer(&self) -> MutexGuard<'_, VideoTimer> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a seek unless one is already pending
    pub fn stream_seek(&self, target: i64, rel: i64, by_bytes: bool) {
        let mut seek = self.control.seek.lock().unwrap_or_else(PoisonError::into_inner);
        if seek.is_none() {
            debug!("Seek requested: target={} rel={} bytes={}", target, rel, by_bytes);
            *seek = Some(SeekRequest { target, rel, by_bytes });
            drop(seek);
            self.wake.notify();
        }
    }

    /// Flip the paused flag, re-anchoring clocks and the frame timer
    pub fn toggle_pause_locked(&self, timer: &mut VideoTimer) {
        let now = monotonic_secs();
        let paused = self.is_paused();
        if paused {
            timer.frame_timer += now - timer.vidclk_last_set;
            self.vidclk.set_at(self.vidclk.time_at(now), self.vidclk.serial(), now);
        }
        self.extclk.set_at(self.extclk.time_at(now), self.extclk.serial(), now);
        let paused = !paused;
        self.control.paused.store(paused, Ordering::Release);
        for clock in [&self.audclk, &self.vidclk, &self.extclk] {
            clock.set_paused(paused);
        }
        self.wake.notify();
    }

    pub fn toggle_pause(&self) {
        let mut timer = self.lock_timer();
        self.toggle_pause_locked(&mut timer);
    }

    /// Toggle pause and cancel any pending step
    pub fn toggle_pause_and_stop_step(&self) {
        self.toggle_pause();
        self.control.stepping.store(false, Ordering::Release);
    }

    /// Unpause for exactly one presented picture
    pub fn step_to_next_frame(&self) {
        let mut timer = self.lock_timer();
        if self.is_paused() {
            self.toggle_pause_locked(&mut timer);
        }
        self.control.stepping.store(true, Ordering::Release);
    }

    pub fn apply_speed(&self, speed: f64) {
        self.control.set_speed(speed);
        for clock in [&self.audclk, &self.vidclk, &self.extclk] {
            clock.set_speed(speed);
        }
    }

    /// Every open stream decoded to its end and presented everything
    pub fn playback_drained(&self) -> bool {
        let mut any = false;
        for kind in [MediaKind::Audio, MediaKind::Video] {
            if let Some(c) = self.active(kind) {
                any = true;
                if c.status.finished() != Some(c.packets.serial()) || c.frames.nb_remaining() > 0 {
                    return false;
                }
            }
        }
        any
    }

    /// Raise the abort flag and release every thread blocked on a packet queue
    fn begin_shutdown(&self) {
        self.control.abort.store(true, Ordering::Release);
        for kind in [MediaKind::Audio, MediaKind::Video] {
            if let Some(component) = self.component(kind) {
                component.packets.abort();
            }
        }
        self.wake.notify();
    }

    /// Stop and join the decoder threads
    fn close_components(&self) {
        for kind in [MediaKind::Audio, MediaKind::Video] {
            if let Some(component) = self.component(kind) {
                component.close();
            }
        }
    }

    fn stats(&self) -> PlayerStats {
        let packets = |kind| self.component(kind).map(|c| c.packets.nb_packets()).unwrap_or(0);
        let bytes = |kind| self.component(kind).map(|c| c.packets.size()).unwrap_or(0);
        PlayerStats {
            early_frame_drops: self.stats.early_drops.load(Ordering::Relaxed),
            late_frame_drops: self.stats.late_drops.load(Ordering::Relaxed),
            notification_failures: self.notifier.failures(),
            audio_packets: packets(MediaKind::Audio),
            video_packets: packets(MediaKind::Video),
            queued_bytes: bytes(MediaKind::Audio) + bytes(MediaKind::Video),
        }
    }
}

/// Everything `open()` learned, waiting for `start()`
struct Opened {
    source: Box<dyn MediaSource>,
    params: PlaybackParams,
}

/// One playback session
pub struct Player {
    notifier: Arc<StateNotifier>,
    opened: Mutex<Option<Opened>>,
    shared: OnceLock<Arc<Shared>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    duration: Option<f64>,
    start_time: Option<f64>,
    bit_rate: Option<u64>,
    max_frame_duration: f64,
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("session_id", &self.notifier.session_id())
            .field("state", &self.notifier.state())
            .field("duration", &self.duration)
            .finish()
    }
}

impl Player {
    /// Prepare a session on `source`
    ///
    /// Validates `params` and, when a start time is configured, seeks there
    /// (a failed initial seek is only a warning).
    pub fn open(mut source: Box<dyn MediaSource>, params: PlaybackParams, events: EventSender) -> Result<Self> {
        params.validate()?;
        let duration = source.duration();
        let container_start = source.start_time();
        let bit_rate = source.bit_rate().filter(|&rate| rate > 0);
        let max_frame_duration = max_frame_duration(source.has_discontinuous_timestamps());

        if let Some(start) = params.start_time {
            let target = secs_to_micros(start + container_start.unwrap_or(0.0));
            let window = SeekWindow {
                min: i64::MIN,
                target,
                max: i64::MAX,
                unit: SeekUnit::Micros,
            };
            if let Err(e) = source.seek(&window) {
                warn!("{}: could not seek to position {:.3}: {}", source.name(), micros_to_secs(target), e);
            }
        }

        info!(
            "Opened {} (duration={:?}, streams={}, max_frame_duration={})",
            source.name(),
            duration,
            source.streams().len(),
            max_frame_duration
        );

        Ok(Self {
            notifier: Arc::new(StateNotifier::new(events)),
            opened: Mutex::new(Some(Opened { source, params })),
            shared: OnceLock::new(),
            reader: Mutex::new(None),
            duration,
            start_time: container_start,
            bit_rate,
            max_frame_duration,
        })
    }

    /// Open the stream components and start the reader thread
    ///
    /// Audio is only opened when `audio` is given. Fails with
    /// [`Error::StreamNotFound`] when no component could be opened.
    pub fn start(&self, audio: Option<AudioSink<'_>>) -> Result<()> {
        let Opened { mut source, params } = self
            .opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| Error::InvalidState("player already started".to_string()))?;

        let video_index = if params.video_disabled {
            None
        } else {
            source.best_stream(MediaKind::Video, None)
        };
        let audio_index = if params.audio_disabled {
            None
        } else {
            source.best_stream(MediaKind::Audio, video_index)
        };

        let audio_packets = Arc::new(PacketQueue::new(PACKET_QUEUE_CAPACITY));
        let video_packets = Arc::new(PacketQueue::new(PACKET_QUEUE_CAPACITY));
        let audio_frames = Arc::new(FrameQueue::new(Arc::clone(&audio_packets), params.sample_queue_size));
        let video_frames = Arc::new(FrameQueue::new(Arc::clone(&video_packets), params.picture_queue_size));

        let mut audio_parts = None;
        if let (Some(index), Some(sink)) = (audio_index, audio) {
            match streams::open_audio(source.as_mut(), index, &params, sink, &audio_packets, &audio_frames) {
                Ok(parts) => audio_parts = Some(parts),
                Err(e) => {
                    warn!("Audio stream {} not opened: {}", index, e);
                    // Undelivered notifications are counted and logged by the notifier
                    let _ = self.notifier.report_error(&e);
                }
            }
        }

        let mut video_parts = None;
        if let Some(index) = video_index {
            match streams::open_video(source.as_mut(), index, &video_packets, &video_frames) {
                Ok(parts) => video_parts = Some(parts),
                Err(e) => {
                    warn!("Video stream {} not opened: {}", index, e);
                    let _ = self.notifier.report_error(&e);
                }
            }
        }

        if audio_parts.is_none() && video_parts.is_none() {
            error!("{}: no audio or video stream could be opened", source.name());
            return Err(Error::StreamNotFound(source.name().to_string()));
        }

        let _ = self.notifier.publish(PlayerState::Ready);

        let (audio, audio_decoder, audio_out) = match audio_parts {
            Some((component, decoder, out)) => (Some(component), Some(decoder), Some(out)),
            None => (None, None, None),
        };
        let (video, video_decoder) = match video_parts {
            Some((component, decoder)) => (Some(component), Some(decoder)),
            None => (None, None),
        };

        let control = Control::new();
        if video.is_some() {
            control.attachments_request.store(true, Ordering::Release);
        }

        let shared = Arc::new(Shared {
            audclk: Clock::bound_to(audio_packets.serial_handle()),
            vidclk: Clock::bound_to(video_packets.serial_handle()),
            extclk: Clock::free_running(),
            params,
            notifier: Arc::clone(&self.notifier),
            audio,
            video,
            control,
            wake: Wakeup::default(),
            timer: Mutex::new(VideoTimer::default()),
            audio_out: Mutex::new(audio_out),
            stats: Stats::default(),
            max_frame_duration: self.max_frame_duration,
        });
        for clock in [&shared.audclk, &shared.vidclk, &shared.extclk] {
            clock.set_paused(true);
        }

        let handle = match spawn_threads(&shared, audio_decoder, video_decoder, source) {
            Ok(handle) => handle,
            Err(e) => {
                error!("Session {} could not start its threads: {}", self.notifier.session_id(), e);
                shared.begin_shutdown();
                shared.close_components();
                return Err(e);
            }
        };
        *self.reader.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        if self.shared.set(shared).is_err() {
            return Err(Error::InvalidState("player already started".to_string()));
        }
        info!("Session {} started", self.notifier.session_id());
        Ok(())
    }

    fn shared(&self) -> Result<&Arc<Shared>> {
        self.shared
            .get()
            .ok_or_else(|| Error::InvalidState("player not started".to_string()))
    }

    pub fn session_id(&self) -> Uuid {
        self.notifier.session_id()
    }

    pub fn state(&self) -> PlayerState {
        self.notifier.state()
    }

    /// Total duration in seconds
    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    /// Current master clock position in seconds (NaN while undefined)
    pub fn master_clock_time(&self) -> f64 {
        self.shared().map(|s| s.master_clock().get()).unwrap_or(f64::NAN)
    }

    /// Clock the other streams currently follow
    pub fn master_sync_type(&self) -> Option<SyncMode> {
        self.shared().ok().map(|s| s.master_type())
    }

    pub fn stats(&self) -> PlayerStats {
        match self.shared() {
            Ok(shared) => shared.stats(),
            Err(_) => PlayerStats {
                notification_failures: self.notifier.failures(),
                ..PlayerStats::default()
            },
        }
    }

    /// Input fully decoded and presented at the current generation
    pub fn is_drained(&self) -> bool {
        self.shared().map(|s| s.playback_drained()).unwrap_or(false)
    }

    pub fn is_paused(&self) -> bool {
        self.shared().map(|s| s.is_paused()).unwrap_or(true)
    }

    pub fn play(&self) -> Result<()> {
        let shared = self.shared()?;
        if shared.is_paused() {
            shared.toggle_pause_and_stop_step();
            shared.control.stopped.store(false, Ordering::Release);
        }
        Ok(())
    }

    /// Pause and report the player as stopped
    pub fn stop(&self) -> Result<()> {
        let shared = self.shared()?;
        if !shared.is_paused() {
            // Set before pausing so the reader never reports a plain pause
            shared.control.stopped.store(true, Ordering::Release);
            shared.toggle_pause_and_stop_step();
        }
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        let shared = self.shared()?;
        if !shared.is_paused() {
            shared.toggle_pause_and_stop_step();
        }
        Ok(())
    }

    pub fn toggle_pause(&self) -> Result<()> {
        self.shared()?.toggle_pause_and_stop_step();
        Ok(())
    }

    /// Present exactly one more picture, then pause
    pub fn step_to_next_frame(&self) -> Result<()> {
        self.shared()?.step_to_next_frame();
        Ok(())
    }

    /// Seek to an absolute position in seconds
    pub fn seek(&self, position: f64) -> Result<()> {
        if !position.is_finite() {
            return Err(Error::Seek(format!("invalid position {}", position)));
        }
        self.shared()?.stream_seek(secs_to_micros(position), 0, false);
        Ok(())
    }

    /// Seek `delta` seconds from the current master clock position
    ///
    /// With `seek_by_bytes` set the offset is converted to bytes using the
    /// input's bit rate (or [`FALLBACK_BYTE_RATE`]) and applied from the last
    /// presented unit instead.
    pub fn seek_relative(&self, delta: f64) -> Result<()> {
        if !delta.is_finite() {
            return Err(Error::Seek(format!("invalid offset {}", delta)));
        }
        let shared = self.shared()?;
        if shared.params.seek_by_bytes {
            let byte_rate = self.bit_rate.map(|rate| rate as f64 / 8.0).unwrap_or(FALLBACK_BYTE_RATE);
            return self.seek_bytes_relative((delta * byte_rate) as i64);
        }
        let mut position = shared.master_clock().get();
        if position.is_nan() {
            let pending = shared.control.seek.lock().unwrap_or_else(PoisonError::into_inner);
            position = pending.map(|s| micros_to_secs(s.target)).unwrap_or(0.0);
        }
        position += delta;
        if let Some(start) = self.start_time {
            if position < start {
                position = start;
            }
        }
        shared.stream_seek(secs_to_micros(position), secs_to_micros(delta), false);
        Ok(())
    }

    /// Seek to an absolute byte offset
    pub fn seek_bytes(&self, position: u64) -> Result<()> {
        let target = i64::try_from(position).map_err(|_| Error::Seek(format!("offset {} out of range", position)))?;
        self.shared()?.stream_seek(target, 0, true);
        Ok(())
    }

    /// Seek `delta` bytes from the last presented unit
    pub fn seek_bytes_relative(&self, delta: i64) -> Result<()> {
        let shared = self.shared()?;
        let current = shared.control.last_pos.load(Ordering::Acquire).max(0);
        let target = current.saturating_add(delta).max(0);
        shared.stream_seek(target, delta, true);
        Ok(())
    }

    /// Request a playback speed; applied by the reader thread
    pub fn set_speed(&self, speed: f64) -> Result<()> {
        if !(speed.is_finite() && speed > 0.0) {
            return Err(Error::InvalidState(format!("invalid speed {}", speed)));
        }
        let shared = self.shared()?;
        if shared.control.speed() != speed {
            *shared.control.speed_request.lock().unwrap_or_else(PoisonError::into_inner) = Some(speed);
            shared.wake.notify();
        }
        Ok(())
    }

    /// Speed currently applied
    pub fn speed(&self) -> f64 {
        self.shared().map(|s| s.control.speed()).unwrap_or(1.0)
    }

    pub fn set_muted(&self, muted: bool) -> Result<()> {
        self.shared()?.control.muted.store(muted, Ordering::Release);
        Ok(())
    }

    pub fn is_muted(&self) -> bool {
        self.shared()
            .map(|s| s.control.muted.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Handle for the audio device callback
    pub fn audio_puller(&self) -> Result<AudioPuller> {
        let shared = self.shared()?;
        if shared.audio.is_none() {
            return Err(Error::InvalidState("no audio stream open".to_string()));
        }
        Ok(AudioPuller::new(Arc::clone(shared)))
    }

    /// Presentation poll at the current monotonic time
    pub fn refresh_video(&self) -> VideoRefresh {
        self.refresh_video_at(monotonic_secs())
    }

    /// Presentation poll at monotonic time `now` (see [`avsync_common::time::monotonic_secs`])
    pub fn refresh_video_at(&self, now: f64) -> VideoRefresh {
        match self.shared() {
            Ok(shared) => video::refresh(shared, now),
            Err(_) => VideoRefresh {
                frame: None,
                remaining: REFRESH_RATE,
            },
        }
    }

    /// Tear the session down; safe to call more than once
    pub fn close(&self) {
        let Some(shared) = self.shared.get() else {
            return;
        };
        shared.begin_shutdown();

        let reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = reader {
            if handle.join().is_err() {
                error!("Reader thread panicked");
            }
        }
        shared.close_components();
        debug!("Session {} closed", self.notifier.session_id());
    }
}

/// Decoder threads first, then the reader that feeds them
fn spawn_threads(
    shared: &Arc<Shared>,
    audio_decoder: Option<Decoder>,
    video_decoder: Option<Decoder>,
    source: Box<dyn MediaSource>,
) -> Result<JoinHandle<()>> {
    if let Some(decoder) = audio_decoder {
        streams::spawn_decoder(shared, MediaKind::Audio, decoder)?;
    }
    if let Some(decoder) = video_decoder {
        streams::spawn_decoder(shared, MediaKind::Video, decoder)?;
    }
    let reader_shared = Arc::clone(shared);
    let handle = std::thread::Builder::new()
        .name("avsync-reader".to_string())
        .spawn(move || reader::run(reader_shared, source))?;
    Ok(handle)
}

impl Drop for Player {
    fn drop(&mut self) {
        self.close();
    }
}
