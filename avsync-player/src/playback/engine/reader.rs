//! Reader thread
//!
//! Pulls packets from the source and routes them to the stream components'
//! packet queues. Between reads it applies pending control requests (speed,
//! seek, attachment re-queue), publishes pause / stall transitions, backs off
//! while the queues are full, and restarts playback when looping.
//!
//! The loop ends on abort or on an unrecoverable read error; the latter is
//! reported to the host as `SessionTerminated`.

use super::{SeekRequest, Shared};
use crate::error::{Error, Result};
use crate::media::{MediaKind, MediaSource, Packet, SeekUnit, SeekWindow};
use crate::playback::sync::{packet_in_play_range, seek_window, stream_has_enough_packets};
use avsync_common::events::{ErrorCode, PlayerState};
use avsync_common::time::{micros_to_secs, secs_to_micros};
use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const COMPONENTS: [MediaKind; 2] = [MediaKind::Audio, MediaKind::Video];

/// Reader thread entry point
pub(super) fn run(shared: Arc<Shared>, mut source: Box<dyn MediaSource>) {
    let mut reader = Reader {
        shared: &shared,
        source: source.as_mut(),
        last_paused: false,
        was_stalled: false,
        eof: false,
        loops_left: shared.params.loop_count,
    };
    match reader.run() {
        Ok(()) => debug!("Reader stopped"),
        Err(e) => {
            error!("Reader terminated: {}", e);
            // Undelivered notifications are counted and logged by the notifier
            let _ = shared.notifier.fail(ErrorCode::ReadFailed, &e.to_string());
            let _ = shared.notifier.session_terminated(&e.to_string());
        }
    }
    debug!("Releasing input {}", source.name());
}

struct Reader<'a> {
    shared: &'a Shared,
    source: &'a mut dyn MediaSource,
    last_paused: bool,
    was_stalled: bool,
    eof: bool,
    loops_left: u32,
}

impl Reader<'_> {
    fn run(&mut self) -> Result<()> {
        let wait = Duration::from_millis(self.shared.params.retry_wait_ms);
        loop {
            if self.shared.control.abort.load(Ordering::Acquire) {
                return Ok(());
            }

            self.publish_pause_state();
            self.apply_speed();

            let pending = *self.shared.control.seek.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(request) = pending {
                self.seek(request);
            }

            if self.shared.control.attachments_request.swap(false, Ordering::AcqRel) {
                self.queue_attachment();
            }

            if self.queues_full() {
                self.shared.wake.wait(wait);
                continue;
            }

            if !self.shared.is_paused() && self.shared.playback_drained() && self.next_loop() {
                debug!("Looping back to start ({} plays left)", self.loops_left);
                let start = self.shared.params.start_time.map(secs_to_micros).unwrap_or(0);
                self.shared.stream_seek(start, 0, false);
            }

            match self.source.read_packet()? {
                None => {
                    if !self.eof {
                        self.end_of_stream();
                    }
                    self.shared.wake.wait(wait);
                }
                Some(packet) => {
                    self.eof = false;
                    self.route(packet);
                }
            }
        }
    }

    /// Announce pause changes and the end of a stall
    fn publish_pause_state(&mut self) {
        let paused = self.shared.is_effectively_paused();
        let stepping = self.shared.control.stepping.load(Ordering::Acquire);
        let changed = paused != self.last_paused;
        if !changed && !(self.was_stalled && !stepping) {
            return;
        }
        self.last_paused = paused;
        self.was_stalled = false;

        if paused {
            let state = if self.shared.control.stopped.load(Ordering::Acquire) {
                PlayerState::Stopped
            } else {
                PlayerState::Paused
            };
            let _ = self.shared.notifier.publish(state);
            if changed {
                self.source.pause_reading();
            }
        } else {
            let _ = self.shared.notifier.publish(PlayerState::Playing);
            if changed {
                self.source.resume_reading();
            }
        }
    }

    fn apply_speed(&mut self) {
        let requested = self
            .shared
            .control
            .speed_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(speed) = requested {
            info!("Playback speed {}", speed);
            self.shared.apply_speed(speed);
            self.shared.control.attachments_request.store(true, Ordering::Release);
        }
    }

    fn seek(&mut self, request: SeekRequest) {
        let shared = self.shared;
        let _ = shared.notifier.publish(PlayerState::Stalled);
        self.was_stalled = true;

        let (min, max) = seek_window(request.target, request.rel);
        let window = SeekWindow {
            min,
            target: request.target,
            max,
            unit: if request.by_bytes { SeekUnit::Bytes } else { SeekUnit::Micros },
        };
        match self.source.seek(&window) {
            Ok(()) => {
                for kind in COMPONENTS {
                    if let Some(component) = shared.active(kind) {
                        component.packets.flush();
                        if let Err(e) = component.packets.put_flush() {
                            debug!("{} flush marker not queued: {}", kind, e);
                        }
                    }
                }
                let position = if request.by_bytes {
                    f64::NAN
                } else {
                    micros_to_secs(request.target)
                };
                shared.extclk.set(position, Some(0));
                debug!("Seeked to {:?}", window);
            }
            Err(e) => {
                warn!("{}: error while seeking: {}", self.source.name(), e);
                let e = match e {
                    Error::Seek(_) => e,
                    other => Error::Seek(other.to_string()),
                };
                let _ = shared.notifier.report_error(&e);
            }
        }

        *shared.control.seek.lock().unwrap_or_else(PoisonError::into_inner) = None;
        shared.control.attachments_request.store(true, Ordering::Release);
        self.eof = false;

        if shared.is_paused() {
            // Without pictures there is nothing to step on; the stall resolves
            // back to paused on the next pass
            if shared.active(MediaKind::Video).is_some() {
                shared.step_to_next_frame();
                let _ = shared.notifier.step_requested();
            }
        } else {
            let _ = shared.notifier.publish(PlayerState::Playing);
            self.was_stalled = false;
        }
    }

    /// Re-queue embedded cover art followed by an end-of-stream marker
    fn queue_attachment(&mut self) {
        let Some(video) = self.shared.active(MediaKind::Video) else {
            return;
        };
        let Some(picture) = video.info.attached_picture.clone() else {
            return;
        };
        let index = video.info.index;
        if video.packets.put(picture).is_ok() {
            // Only fails once the queue is aborted
            let _ = video.packets.put_end_of_stream(index);
            trace!("Queued attached picture for stream {}", index);
        }
    }

    fn queues_full(&self) -> bool {
        let shared = self.shared;
        let queued: usize = COMPONENTS
            .iter()
            .filter_map(|&kind| shared.active(kind))
            .map(|c| c.packets.size())
            .sum();
        if queued > shared.params.max_queue_bytes {
            return true;
        }
        COMPONENTS.iter().all(|&kind| match shared.component(kind) {
            None => true,
            Some(c) => stream_has_enough_packets(
                c.is_active(),
                c.packets.is_aborted(),
                c.is_attached_picture(),
                c.packets.nb_packets(),
                c.packets.duration(),
                shared.params.min_frames,
            ),
        })
    }

    /// Consume one play from the loop budget; 0 loops forever
    fn next_loop(&mut self) -> bool {
        match self.loops_left {
            1 => false,
            0 => true,
            _ => {
                self.loops_left -= 1;
                self.loops_left != 0
            }
        }
    }

    fn end_of_stream(&mut self) {
        for kind in COMPONENTS {
            if let Some(component) = self.shared.active(kind) {
                // Only fails once the queue is aborted
                let _ = component.packets.put_end_of_stream(component.info.index);
            }
        }
        self.eof = true;
        debug!("End of input {}", self.source.name());
        let _ = self.shared.notifier.publish(PlayerState::Finished);
    }

    fn route(&self, packet: Packet) {
        let shared = self.shared;
        let target = COMPONENTS
            .iter()
            .filter_map(|&kind| shared.active(kind))
            .find(|c| c.info.index == packet.stream_index);
        let Some(component) = target else {
            return;
        };
        if component.is_attached_picture() {
            return;
        }
        let in_range = packet_in_play_range(
            packet.timestamp(),
            component.info.start_time,
            shared.params.start_time,
            shared.params.max_duration,
        );
        if !in_range {
            return;
        }
        if let Err(e) = component.packets.put(packet) {
            trace!("{} packet dropped: {}", component.info.kind, e);
        }
    }
}
