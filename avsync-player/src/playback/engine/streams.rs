//! Stream components
//!
//! A component is one open stream: its queues, decoder status and decoder
//! thread. The decode loops here run on those threads and push frames into
//! the frame queue; the video loop also discards pictures that are already
//! late against the master clock.

use super::audio::AudioOutputState;
use super::{AudioSink, Shared};
use crate::error::{Error, Result};
use crate::media::{AudioSpec, FrameContent, MediaKind, MediaSource, StreamInfo};
use crate::playback::decoder::{Decoder, DecoderStatus, DecoderThread};
use crate::playback::frame_queue::{Frame, FrameQueue};
use crate::playback::packet_queue::PacketQueue;
use crate::playback::sync::{should_drop_early, AudioDriftFilter};
use avsync_common::params::{PlaybackParams, SyncMode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, trace};

/// One open stream
pub(crate) struct StreamComponent {
    pub info: StreamInfo,
    pub packets: Arc<PacketQueue>,
    pub frames: Arc<FrameQueue>,
    pub status: Arc<DecoderStatus>,
    active: AtomicBool,
    thread: Mutex<Option<DecoderThread>>,
}

impl StreamComponent {
    fn new(info: StreamInfo, packets: &Arc<PacketQueue>, frames: &Arc<FrameQueue>, status: Arc<DecoderStatus>) -> Self {
        Self {
            info,
            packets: Arc::clone(packets),
            frames: Arc::clone(frames),
            status,
            active: AtomicBool::new(true),
            thread: Mutex::new(None),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Cover art stream: one picture, never refilled
    pub fn is_attached_picture(&self) -> bool {
        self.info.attached_picture.is_some()
    }

    /// Stop using this stream after a codec failure
    ///
    /// Called from the component's own thread, so it does not join.
    fn fail(&self) {
        self.active.store(false, Ordering::Release);
        self.packets.abort();
        self.frames.abort();
    }

    /// Abort the queues and join the decoder thread
    pub fn close(&self) {
        self.active.store(false, Ordering::Release);
        let thread = self.thread.lock().unwrap_or_else(PoisonError::into_inner).take();
        match thread {
            Some(mut thread) => thread.abort(),
            None => {
                self.packets.abort();
                self.frames.abort();
            }
        }
    }
}

/// Decoder for `index`, restarting timestamps at the stream start when the
/// container cannot seek on its own
fn open_decoder(source: &mut dyn MediaSource, info: &StreamInfo, packets: &Arc<PacketQueue>) -> Result<Decoder> {
    let codec = source.open_decoder(info.index)?;
    let mut decoder = Decoder::new(codec, Arc::clone(packets));
    if !source.supports_native_seek() {
        decoder.set_start_pts(info.start_time);
    }
    Ok(decoder)
}

fn stream_info(source: &dyn MediaSource, index: usize) -> Result<StreamInfo> {
    source
        .streams()
        .iter()
        .find(|s| s.index == index)
        .cloned()
        .ok_or_else(|| Error::StreamNotFound(format!("{}: no stream {}", source.name(), index)))
}

/// Negotiate the output device and build the audio component
pub(super) fn open_audio(
    source: &mut dyn MediaSource,
    index: usize,
    params: &PlaybackParams,
    sink: AudioSink<'_>,
    packets: &Arc<PacketQueue>,
    frames: &Arc<FrameQueue>,
) -> Result<(StreamComponent, Decoder, AudioOutputState)> {
    let info = stream_info(source, index)?;
    let wanted = AudioSpec {
        sample_rate: info
            .sample_rate
            .ok_or_else(|| Error::AudioOutput(format!("stream {} has no sample rate", index)))?,
        channels: info.channels.unwrap_or(2),
    };
    let output = sink.device.open(&wanted)?;
    if output.spec.sample_rate == 0 || output.spec.channels == 0 || output.hw_buffer_frames == 0 {
        return Err(Error::AudioOutput(format!("device returned unusable format {:?}", output)));
    }

    let decoder = open_decoder(source, &info, packets)?;
    packets.start()?;

    // Drift below one device buffer is not worth correcting
    let threshold = output.hw_buffer_frames as f64 / output.spec.sample_rate as f64;
    let state = AudioOutputState::new(sink.converter, output, AudioDriftFilter::new(params, threshold));

    info!(
        "Audio stream {} ({}): {} Hz x{} -> device {} Hz x{}, buffer {} frames",
        index,
        info.codec_name,
        wanted.sample_rate,
        wanted.channels,
        output.spec.sample_rate,
        output.spec.channels,
        output.hw_buffer_frames
    );
    let component = StreamComponent::new(info, packets, frames, decoder.status());
    Ok((component, decoder, state))
}

pub(super) fn open_video(
    source: &mut dyn MediaSource,
    index: usize,
    packets: &Arc<PacketQueue>,
    frames: &Arc<FrameQueue>,
) -> Result<(StreamComponent, Decoder)> {
    let info = stream_info(source, index)?;
    let decoder = open_decoder(source, &info, packets)?;
    packets.start()?;
    info!(
        "Video stream {} ({}): {:?} fps{}",
        index,
        info.codec_name,
        info.frame_rate,
        if info.attached_picture.is_some() { ", attached picture" } else { "" }
    );
    let component = StreamComponent::new(info, packets, frames, decoder.status());
    Ok((component, decoder))
}

/// Start the decode loop for `kind` on its own thread
pub(super) fn spawn_decoder(shared: &Arc<Shared>, kind: MediaKind, decoder: Decoder) -> Result<()> {
    let component = shared
        .component(kind)
        .ok_or_else(|| Error::InvalidState(format!("no {} component", kind)))?;
    let work_shared = Arc::clone(shared);
    let thread = DecoderThread::spawn(
        &format!("avsync-{}-decoder", kind),
        decoder,
        Arc::clone(&component.frames),
        move |mut decoder| {
            let result = match kind {
                MediaKind::Video => video_loop(&work_shared, &mut decoder),
                _ => audio_loop(&work_shared, &mut decoder),
            };
            finish(&work_shared, kind, result);
        },
    )?;
    *component.thread.lock().unwrap_or_else(PoisonError::into_inner) = Some(thread);
    Ok(())
}

fn audio_loop(shared: &Shared, decoder: &mut Decoder) -> Result<()> {
    let component = shared
        .component(MediaKind::Audio)
        .ok_or_else(|| Error::InvalidState("no audio component".to_string()))?;
    loop {
        let Some(decoded) = decoder.decode_frame()? else {
            continue;
        };
        let duration = match &decoded.content {
            FrameContent::Audio(samples) => samples.duration(),
            FrameContent::Picture(_) => 0.0,
        };
        let serial = decoder.pkt_serial().unwrap_or_default();
        component.frames.push(Frame::new(decoded, duration, serial))?;
    }
}

fn video_loop(shared: &Shared, decoder: &mut Decoder) -> Result<()> {
    let component = shared
        .component(MediaKind::Video)
        .ok_or_else(|| Error::InvalidState("no video component".to_string()))?;
    let duration = component.info.frame_duration();
    loop {
        let Some(decoded) = decoder.decode_frame()? else {
            continue;
        };
        if let Some(pts) = decoded.pts {
            if shared.master_type() != SyncMode::Video {
                let diff = pts - shared.master_clock().get();
                let same_serial = decoder.pkt_serial().is_some() && decoder.pkt_serial() == shared.vidclk.serial();
                if should_drop_early(
                    diff,
                    shared.params.no_sync_threshold,
                    same_serial,
                    component.packets.nb_packets(),
                ) {
                    let drops = shared.stats.early_drops.fetch_add(1, Ordering::Relaxed) + 1;
                    trace!("Early drop pts={:.3} diff={:.3} (total {})", pts, diff, drops);
                    continue;
                }
            }
        }
        let serial = decoder.pkt_serial().unwrap_or_default();
        component.frames.push(Frame::new(decoded, duration, serial))?;
    }
}

/// Decode loop exit: abort is normal, anything else closes the stream
fn finish(shared: &Shared, kind: MediaKind, result: Result<()>) {
    match result {
        Ok(()) | Err(Error::Aborted) => debug!("{} decoder loop ended", kind),
        Err(e) => {
            error!("{} decoder failed, closing stream: {}", kind, e);
            if let Some(component) = shared.component(kind) {
                component.fail();
            }
            // Undelivered notifications are counted and logged by the notifier
            let _ = shared.notifier.report_error(&e);
            shared.wake.notify();
        }
    }
}
