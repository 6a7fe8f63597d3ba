//! Playback clocks
//!
//! A [`Clock`] extrapolates a timeline position from the last
//! `(pts, wall time)` pair it was given, scaled by a speed factor. Each
//! clock is bound to a serial source: the packet queue it follows (audio,
//! video) or its own serial (external). Once the bound serial moves past
//! the serial the clock was last set with, the clock reads NaN until the
//! next `set`, so nothing downstream mistakes a pre-seek position for a
//! current one.
//!
//! Each clock has one designated writer at a time (reader thread on seek,
//! audio pull, video refresh); the state sits behind a short-held mutex so
//! concurrent readers never observe a torn update.

use avsync_common::time::monotonic_secs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy)]
struct ClockState {
    pts: f64,
    pts_drift: f64,
    last_updated: f64,
    speed: f64,
    serial: Option<u64>,
    paused: bool,
}

/// Timeline clock
#[derive(Debug)]
pub struct Clock {
    state: Mutex<ClockState>,
    /// Packet queue serial this clock is validated against; `None` = own serial
    queue_serial: Option<Arc<AtomicU64>>,
}

impl Clock {
    /// Clock validated against a packet queue's serial
    pub fn bound_to(queue_serial: Arc<AtomicU64>) -> Self {
        Self::with_source(Some(queue_serial))
    }

    /// Clock validated against its own serial (external clock)
    pub fn free_running() -> Self {
        Self::with_source(None)
    }

    fn with_source(queue_serial: Option<Arc<AtomicU64>>) -> Self {
        Self {
            state: Mutex::new(ClockState {
                pts: f64::NAN,
                pts_drift: f64::NAN,
                last_updated: monotonic_secs(),
                speed: 1.0,
                serial: None,
                paused: false,
            }),
            queue_serial,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stale(&self, state: &ClockState) -> bool {
        match (&self.queue_serial, state.serial) {
            (_, None) => true,
            (Some(queue), Some(serial)) => queue.load(Ordering::Acquire) != serial,
            (None, Some(_)) => false,
        }
    }

    /// Current position in seconds, NaN when undefined
    pub fn get(&self) -> f64 {
        self.time_at(monotonic_secs())
    }

    /// Position at monotonic time `now`
    pub fn time_at(&self, now: f64) -> f64 {
        let state = self.lock();
        if self.is_stale(&state) {
            return f64::NAN;
        }
        if state.paused {
            state.pts
        } else {
            state.pts_drift + now - (now - state.last_updated) * (1.0 - state.speed)
        }
    }

    pub fn set(&self, pts: f64, serial: Option<u64>) {
        self.set_at(pts, serial, monotonic_secs());
    }

    /// Anchor the clock: `pts` is the position at monotonic time `time`
    pub fn set_at(&self, pts: f64, serial: Option<u64>, time: f64) {
        let mut state = self.lock();
        state.pts = pts;
        state.last_updated = time;
        state.pts_drift = pts - time;
        state.serial = serial;
    }

    /// Change the extrapolation rate without a position jump
    pub fn set_speed(&self, speed: f64) {
        let now = monotonic_secs();
        let current = self.time_at(now);
        let serial = self.serial();
        self.set_at(current, serial, now);
        self.lock().speed = speed;
    }

    pub fn speed(&self) -> f64 {
        self.lock().speed
    }

    pub fn set_paused(&self, paused: bool) {
        self.lock().paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Serial the clock was last set with
    pub fn serial(&self) -> Option<u64> {
        self.lock().serial
    }

    /// Monotonic time of the last `set`
    pub fn last_updated(&self) -> f64 {
        self.lock().last_updated
    }

    /// Pull this clock onto `slave` when it is undefined or has drifted
    /// more than `no_sync_threshold` seconds away
    pub fn sync_to_slave(&self, slave: &Clock, no_sync_threshold: f64) {
        let now = monotonic_secs();
        let clock = self.time_at(now);
        let slave_clock = slave.time_at(now);
        if !slave_clock.is_nan()
            && (clock.is_nan() || (clock - slave_clock).abs() > no_sync_threshold)
        {
            self.set_at(slave_clock, slave.serial(), now);
        }
    }
}
