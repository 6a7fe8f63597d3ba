//! Picture presentation timing
//!
//! The host polls [`refresh`] from its display loop. Each poll decides
//! whether the current picture's display time has come, advances the frame
//! timer by the sync-adjusted delay, updates the video clock and, when
//! allowed, skips pictures whose successor is already due.

use super::{Shared, VideoRefresh, REFRESH_RATE};
use crate::media::MediaKind;
use crate::playback::sync::{compute_target_delay, frame_duration};
use avsync_common::params::SyncMode;
use std::sync::atomic::Ordering;
use tracing::trace;

/// Presentation timing, guarded by the video timer lock
#[derive(Debug, Default)]
pub(crate) struct VideoTimer {
    /// Monotonic time at which the current picture was (or is due to be) shown
    pub frame_timer: f64,
    /// Monotonic time of the last video clock update
    pub vidclk_last_set: f64,
}

pub(super) fn refresh(shared: &Shared, now: f64) -> VideoRefresh {
    let mut remaining = REFRESH_RATE;
    let Some(video) = shared.active(MediaKind::Video) else {
        return VideoRefresh { frame: None, remaining };
    };
    let frames = &video.frames;
    let params = &shared.params;
    let max_fd = shared.max_frame_duration;

    let mut timer = shared.lock_timer();
    let mut shown = None;

    loop {
        if frames.nb_remaining() == 0 {
            break;
        }
        let (Some(last), Some(current)) = (frames.peek_last(), frames.peek_readable()) else {
            break;
        };

        if current.serial != frames.packet_serial() {
            frames.next();
            continue;
        }
        if last.serial != current.serial {
            timer.frame_timer = now;
        }
        if shared.is_paused() {
            break;
        }

        let speed = shared.control.speed();
        let master = shared.master_type();
        let last_duration = frame_duration(
            last.pts,
            last.duration,
            last.serial,
            current.pts,
            current.serial,
            speed,
            max_fd,
        );
        let diff = (master != SyncMode::Video)
            .then(|| shared.vidclk.time_at(now) - shared.master_clock().time_at(now));
        let delay = compute_target_delay(last_duration, diff, params, max_fd);

        if now < timer.frame_timer + delay {
            remaining = (timer.frame_timer + delay - now).min(remaining);
            break;
        }

        timer.frame_timer += delay;
        if delay > 0.0 && now - timer.frame_timer > params.sync_threshold_max {
            timer.frame_timer = now;
        }

        if !current.pts.is_nan() {
            shared.vidclk.set_at(current.pts, Some(current.serial), now);
            timer.vidclk_last_set = now;
            shared.extclk.sync_to_slave(&shared.vidclk, params.no_sync_threshold);
        }

        let stepping = shared.control.stepping.load(Ordering::Acquire);
        if frames.nb_remaining() > 1 && !stepping && params.frame_drop_late && master != SyncMode::Video {
            if let Some(next) = frames.peek_next() {
                let duration = frame_duration(
                    current.pts,
                    current.duration,
                    current.serial,
                    next.pts,
                    next.serial,
                    speed,
                    max_fd,
                );
                if now > timer.frame_timer + duration {
                    let drops = shared.stats.late_drops.fetch_add(1, Ordering::Relaxed) + 1;
                    trace!("Late drop pts={:.3} (total {})", current.pts, drops);
                    frames.next();
                    continue;
                }
            }
        }

        frames.next();
        if let Some(pos) = current.pos {
            shared.control.last_pos.store(pos as i64, Ordering::Release);
        }
        shown = Some(current);

        if stepping && !shared.is_paused() {
            shared.toggle_pause_locked(&mut timer);
            shared.control.stepping.store(false, Ordering::Release);
        }
        break;
    }

    VideoRefresh { frame: shown, remaining }
}
