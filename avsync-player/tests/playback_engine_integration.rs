//! Integration tests for the playback engine
//!
//! Drives full sessions (reader thread, decoder threads, audio pull and
//! presentation polling) over scripted in-memory sources.
//!
//! Tests that assert on presentation timing are marked #[serial] so they do
//! not compete for CPU with each other.

mod helpers;

use avsync_common::events::{ErrorCode, PlayerEventKind, PlayerState};
use avsync_common::params::{PlaybackParams, SyncMode};
use avsync_common::time::monotonic_secs;
use avsync_player::media::{SeekUnit, SeekWindow};
use avsync_player::{Error, Player};
use helpers::*;
use serial_test::serial;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn is_error(code: ErrorCode) -> impl Fn(&PlayerEventKind) -> bool {
    move |kind| matches!(kind, PlayerEventKind::Error { code: c, .. } if *c == code)
}

/// Wait for the source to receive its `count`-th seek and return it
fn nth_seek(log: &Arc<SourceLog>, count: usize) -> SeekWindow {
    assert!(wait_until(WAIT, || log.seeks().len() >= count), "seek {} never reached the source", count);
    log.seeks()[count - 1]
}

/// Show the first picture, stall presentation for a while, then poll slowly
/// so pictures fall behind the clock
fn present_with_stall(player: &Player) {
    player.play().unwrap();
    let first = present_until(player, WAIT, |frames| !frames.is_empty());
    assert_eq!(first.len(), 1);
    std::thread::sleep(Duration::from_millis(300));
    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        player.refresh_video();
        std::thread::sleep(Duration::from_millis(60));
    }
}

#[test]
fn test_start_publishes_ready_then_playing() {
    let (player, mut events) = start_without_audio(ScriptedSource::video(30, 25.0), test_params());

    assert_eq!(player.state(), PlayerState::Ready);
    assert!(player.is_paused(), "sessions start paused");

    player.play().unwrap();
    assert!(wait_for_state(&player, PlayerState::Playing));
    assert!(events.wait_for(|k| matches!(
        k,
        PlayerEventKind::StateChanged {
            old_state: PlayerState::Ready,
            new_state: PlayerState::Playing
        }
    )));

    let changes = events.state_changes();
    assert_eq!(changes[0], (PlayerState::Unknown, PlayerState::Ready));
    assert_eq!(player.master_sync_type(), Some(SyncMode::External));
    println!("✅ Ready → Playing announced");
}

#[tokio::test]
async fn test_events_carry_session_id() {
    let (player, mut events) = start_without_audio(ScriptedSource::video(30, 25.0), test_params());

    let event = events.next(WAIT).await.expect("Ready event");
    assert_eq!(event.session_id, player.session_id());
    assert_eq!(
        event.kind,
        PlayerEventKind::StateChanged {
            old_state: PlayerState::Unknown,
            new_state: PlayerState::Ready
        }
    );
}

#[test]
fn test_start_without_playable_streams_fails() {
    let (tx, _rx) = avsync_common::events::event_channel(8);
    let player = Player::open(Box::new(ScriptedSource::data_only()), test_params(), tx).unwrap();

    let result = player.start(None);
    assert!(matches!(result, Err(Error::StreamNotFound(_))));
    assert_eq!(player.state(), PlayerState::Unknown);
}

#[test]
fn test_controls_require_started_session() {
    let (tx, _rx) = avsync_common::events::event_channel(8);
    let player = Player::open(Box::new(ScriptedSource::video(10, 25.0)), test_params(), tx).unwrap();

    assert!(matches!(player.play(), Err(Error::InvalidState(_))));
    assert!(matches!(player.seek(1.0), Err(Error::InvalidState(_))));
    assert!(player.master_clock_time().is_nan());
    assert!(player.refresh_video().frame.is_none());

    player.start(None).unwrap();
    assert!(matches!(player.start(None), Err(Error::InvalidState(_))));
}

#[test]
fn test_open_rejects_invalid_params() {
    let (tx, _rx) = avsync_common::events::event_channel(8);
    let params = PlaybackParams {
        picture_queue_size: 1,
        ..test_params()
    };
    let result = Player::open(Box::new(ScriptedSource::video(10, 25.0)), params, tx);
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_open_seeks_to_start_time() {
    let source = ScriptedSource::video(100, 25.0);
    let log = source.log();
    let params = PlaybackParams {
        start_time: Some(1.0),
        ..test_params()
    };
    let (player, _events) = start_without_audio(source, params);

    let seeks = log.seeks();
    assert_eq!(seeks.len(), 1);
    assert_eq!(seeks[0].target, 1_000_000);
    assert_eq!(seeks[0].unit, SeekUnit::Micros);

    player.play().unwrap();
    let shown = present_until(&player, WAIT, |frames| !frames.is_empty());
    assert!((shown[0].pts - 1.0).abs() < 1e-9, "first picture at {}", shown[0].pts);
}

#[test]
#[serial]
fn test_presents_pictures_in_order_then_finishes() {
    let params = PlaybackParams {
        frame_drop_late: false,
        ..test_params()
    };
    // Long enough that end of input is reached while playing
    let (player, mut events) = start_without_audio(ScriptedSource::video(50, 25.0), params);
    player.play().unwrap();

    let mut shown = Vec::new();
    let drained = wait_until(WAIT, || {
        if let Some(frame) = player.refresh_video().frame {
            shown.push(frame.pts);
        }
        player.is_drained()
    });
    assert!(drained, "playback never drained");
    assert_eq!(shown.len(), 50);
    assert!(shown.windows(2).all(|w| w[0] < w[1]), "pictures out of order: {:?}", shown);

    assert_eq!(player.state(), PlayerState::Finished);
    assert!(events.contains(|k| matches!(
        k,
        PlayerEventKind::StateChanged {
            new_state: PlayerState::Finished,
            ..
        }
    )));
    println!("✅ {} pictures presented before Finished", shown.len());
}

#[test]
#[serial]
fn test_paused_seek_presents_exactly_one_picture() {
    let (player, mut events) = start_without_audio(ScriptedSource::video(100, 25.0), test_params());
    player.play().unwrap();
    assert!(wait_for_state(&player, PlayerState::Playing));
    player.pause().unwrap();
    assert!(wait_for_state(&player, PlayerState::Paused));

    player.seek(2.0).unwrap();
    assert!(events.wait_for(|k| matches!(k, PlayerEventKind::StepRequested)));

    let shown = present_for(&player, Duration::from_millis(400));
    assert_eq!(shown.len(), 1, "shown: {:?}", shown.iter().map(|f| f.pts).collect::<Vec<_>>());
    assert!((shown[0].pts - 2.0).abs() < 1e-9);
    assert!(player.is_paused());

    assert!(wait_for_state(&player, PlayerState::Paused));
    let changes = events.state_changes();
    assert!(changes.contains(&(PlayerState::Paused, PlayerState::Stalled)));
    assert_eq!(changes.last(), Some(&(PlayerState::Stalled, PlayerState::Paused)));
    println!("✅ Paused seek stepped to {:.2}", shown[0].pts);
}

#[test]
#[serial]
fn test_step_to_next_frame_shows_one_picture() {
    let (player, _events) = start_without_audio(ScriptedSource::video(100, 25.0), test_params());
    // Let the decoder fill the picture queue
    assert!(wait_until(WAIT, || player.stats().video_packets > 0));
    std::thread::sleep(Duration::from_millis(50));

    player.step_to_next_frame().unwrap();
    let shown = present_for(&player, Duration::from_millis(300));
    assert_eq!(shown.len(), 1);
    assert!(player.is_paused());

    player.step_to_next_frame().unwrap();
    let more = present_for(&player, Duration::from_millis(300));
    assert_eq!(more.len(), 1);
    assert!(more[0].pts > shown[0].pts);
}

#[test]
#[serial]
fn test_loop_replays_without_visible_transition() {
    let source = ScriptedSource::video(50, 25.0);
    let log = source.log();
    let params = PlaybackParams {
        loop_count: 2,
        frame_drop_late: false,
        ..test_params()
    };
    let (player, mut events) = start_without_audio(source, params);
    player.play().unwrap();

    let mut first_pictures = 0;
    let finished = wait_until(Duration::from_secs(10), || {
        if let Some(frame) = player.refresh_video().frame {
            if frame.pts == 0.0 {
                first_pictures += 1;
            }
        }
        first_pictures >= 2 && player.is_drained()
    });
    assert!(finished, "second pass never completed");

    let seeks = log.seeks();
    assert_eq!(seeks.len(), 1, "exactly one loop-back seek");
    assert_eq!(seeks[0].target, 0);

    let changes = events.state_changes();
    let finishes = changes.iter().filter(|(_, new)| *new == PlayerState::Finished).count();
    assert_eq!(finishes, 2);
    assert!(!changes.contains(&(PlayerState::Finished, PlayerState::Playing)));
    assert!(!changes.iter().any(|(_, new)| *new == PlayerState::Stalled));
    println!("✅ Looped twice, {} state changes", changes.len());
}

#[test]
fn test_seek_failure_is_reported_and_playback_continues() {
    let (player, mut events) =
        start_without_audio(ScriptedSource::video(100, 25.0).with_failing_seek(), test_params());
    player.play().unwrap();
    assert!(wait_for_state(&player, PlayerState::Playing));

    player.seek(1.0).unwrap();
    assert!(events.wait_for(is_error(ErrorCode::SeekFailed)));
    assert!(wait_for_state(&player, PlayerState::Playing));
    let changes = events.state_changes();
    assert!(changes.contains(&(PlayerState::Playing, PlayerState::Stalled)));
    assert!(changes.contains(&(PlayerState::Stalled, PlayerState::Playing)));
}

#[test]
#[serial]
fn test_byte_seek_uses_byte_window() {
    let source = ScriptedSource::video(100, 25.0);
    let log = source.log();
    let (player, _events) = start_without_audio(source, test_params());
    player.play().unwrap();

    player.seek_bytes(PACKET_BYTES as u64 * 50).unwrap();
    assert!(wait_until(WAIT, || !log.seeks().is_empty()));
    let seek = log.seeks()[0];
    assert_eq!(seek.unit, SeekUnit::Bytes);
    assert_eq!(seek.target, (PACKET_BYTES * 50) as i64);

    let shown = present_until(&player, WAIT, |frames| frames.iter().any(|f| f.pts >= 2.0));
    assert!(shown.iter().any(|f| (f.pts - 2.0).abs() < 1e-9));
}

#[test]
fn test_read_error_terminates_session() {
    let (player, mut events) =
        start_without_audio(ScriptedSource::video(100, 25.0).with_read_error_at(5), test_params());

    assert!(events.wait_for(|k| matches!(k, PlayerEventKind::SessionTerminated { .. })));
    assert!(events.contains(is_error(ErrorCode::ReadFailed)));
    assert_eq!(player.state(), PlayerState::Error);

    // Error is terminal
    player.play().unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(player.state(), PlayerState::Error);
}

#[test]
fn test_stop_publishes_stopped() {
    let source = ScriptedSource::video(100, 25.0);
    let log = source.log();
    let (player, mut events) = start_without_audio(source, test_params());
    player.play().unwrap();
    assert!(wait_for_state(&player, PlayerState::Playing));

    player.stop().unwrap();
    assert!(wait_for_state(&player, PlayerState::Stopped));
    assert!(player.is_paused());
    assert!(events.state_changes().contains(&(PlayerState::Playing, PlayerState::Stopped)));

    player.play().unwrap();
    assert!(wait_for_state(&player, PlayerState::Playing));
    assert!(log.pause_calls.load(Ordering::Relaxed) >= 2);
    assert!(log.resume_calls.load(Ordering::Relaxed) >= 2);
}

#[test]
fn test_speed_requests_are_validated_and_applied() {
    let (player, _events) = start_without_audio(ScriptedSource::video(100, 25.0), test_params());

    assert!(player.set_speed(0.0).is_err());
    assert!(player.set_speed(f64::NAN).is_err());
    assert_eq!(player.speed(), 1.0);

    player.set_speed(2.0).unwrap();
    assert!(wait_until(WAIT, || player.speed() == 2.0));
}

#[test]
fn test_audio_pull_drives_master_clock() {
    let (player, _events, device, converter) =
        start_with_audio(ScriptedSource::audio(2.0, 8000, 1), test_params());
    assert_eq!(device.opened.map(|s| (s.sample_rate, s.channels)), Some((8000, 1)));
    assert_eq!(player.master_sync_type(), Some(SyncMode::Audio));

    let puller = player.audio_puller().unwrap();
    let mut buf = vec![1.0f32; 512];
    puller.fill(&mut buf);
    assert!(buf.iter().all(|s| *s == 0.0), "paused output must be silent");

    player.play().unwrap();
    assert!(wait_until(WAIT, || player.stats().audio_packets > 0 || player.is_drained()));
    std::thread::sleep(Duration::from_millis(50));

    let mut buf = vec![0.0f32; 512];
    assert!(wait_until(WAIT, || {
        puller.fill(&mut buf);
        buf.iter().any(|s| *s == AUDIO_LEVEL)
    }));
    assert!(!player.master_clock_time().is_nan());
    assert!(converter.calls.lock().unwrap().iter().all(|(rate, _)| *rate == 8000));
}

#[test]
fn test_muted_and_paused_audio_is_silent() {
    let (player, _events, _device, _converter) =
        start_with_audio(ScriptedSource::audio(2.0, 8000, 2), test_params());
    let puller = player.audio_puller().unwrap();
    player.play().unwrap();

    let mut buf = vec![0.0f32; 256];
    assert!(wait_until(WAIT, || {
        puller.fill(&mut buf);
        buf.iter().any(|s| *s != 0.0)
    }));

    player.set_muted(true).unwrap();
    assert!(player.is_muted());
    puller.fill(&mut buf);
    assert!(buf.iter().all(|s| *s == 0.0));

    player.set_muted(false).unwrap();
    player.pause().unwrap();
    // Flush what was converted before the pause
    let mut drain = vec![0.0f32; 8192];
    puller.fill(&mut drain);
    puller.fill(&mut buf);
    assert!(buf.iter().all(|s| *s == 0.0));
}

#[test]
fn test_video_codec_failure_keeps_audio_running() {
    let source = ScriptedSource::audio_video(3.0, 25.0, 8000).with_codec_failure(0, 3);
    let (player, mut events, _device, _converter) = start_with_audio(source, test_params());
    let puller = player.audio_puller().unwrap();
    player.play().unwrap();

    assert!(events.wait_for(is_error(ErrorCode::DecodeFailed)));
    assert_ne!(player.state(), PlayerState::Error);
    assert_eq!(player.master_sync_type(), Some(SyncMode::Audio));
    assert!(player.refresh_video().frame.is_none());

    let mut buf = vec![0.0f32; 512];
    assert!(wait_until(WAIT, || {
        puller.fill(&mut buf);
        buf.iter().any(|s| *s == AUDIO_LEVEL)
    }));
    println!("✅ Audio continued after video codec failure");
}

#[test]
fn test_audio_codec_failure_falls_back_to_external_clock() {
    let source = ScriptedSource::audio_video(3.0, 25.0, 8000).with_codec_failure(1, 2);
    let (player, mut events, _device, _converter) = start_with_audio(source, test_params());
    player.play().unwrap();

    assert!(events.wait_for(is_error(ErrorCode::DecodeFailed)));
    assert_eq!(player.master_sync_type(), Some(SyncMode::External));

    let shown = present_until(&player, WAIT, |frames| frames.len() >= 3);
    assert!(shown.len() >= 3, "video stopped after audio failure");
}

#[test]
fn test_cover_art_is_presented_once() {
    let (player, _events, _device, _converter) =
        start_with_audio(ScriptedSource::audio_with_cover(2.0, 8000), test_params());
    player.play().unwrap();

    let shown = present_until(&player, WAIT, |frames| !frames.is_empty());
    assert_eq!(shown.len(), 1);
    let more = present_for(&player, Duration::from_millis(100));
    assert!(more.is_empty());
}

#[test]
fn test_refused_audio_device_leaves_video_session() {
    let (tx, mut rx) = avsync_common::events::event_channel(16);
    let player = Player::open(Box::new(ScriptedSource::audio_video(2.0, 25.0, 8000)), test_params(), tx).unwrap();
    let mut device = FakeDevice::refusing();
    player
        .start(Some(avsync_player::playback::engine::AudioSink {
            device: &mut device,
            converter: Box::new(PassthroughConverter::default()),
        }))
        .unwrap();

    let first = rx.try_recv().expect("error event");
    assert!(matches!(
        first.kind,
        PlayerEventKind::Error {
            code: ErrorCode::AudioDeviceFailed,
            ..
        }
    ));
    assert!(player.audio_puller().is_err());
    assert_eq!(player.master_sync_type(), Some(SyncMode::External));
}

#[test]
fn test_close_is_prompt_and_idempotent() {
    let (player, _events) = start_without_audio(ScriptedSource::video(1000, 25.0), test_params());
    // Reader is now blocked on full queues
    std::thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    player.close();
    assert!(started.elapsed() < Duration::from_secs(2));
    player.close();
    drop(player);
}

#[test]
fn test_stats_track_queued_packets() {
    let (player, _events) = start_without_audio(ScriptedSource::video(100, 25.0), test_params());
    assert!(wait_until(WAIT, || player.stats().video_packets > 20));

    let stats = player.stats();
    assert_eq!(stats.audio_packets, 0);
    assert!(stats.queued_bytes >= stats.video_packets * PACKET_BYTES);
    assert_eq!(stats.notification_failures, 0);
}

#[test]
#[serial]
fn test_stalled_presentation_counts_frame_drops() {
    let (player, _events) = start_without_audio(ScriptedSource::video(100, 25.0), test_params());
    assert_eq!(player.master_sync_type(), Some(SyncMode::External));

    present_with_stall(&player);

    let stats = player.stats();
    assert!(stats.early_frame_drops > 0, "no early drops: {:?}", stats);
    assert!(stats.late_frame_drops > 0, "no late drops: {:?}", stats);
    println!("✅ early={} late={}", stats.early_frame_drops, stats.late_frame_drops);
}

#[test]
#[serial]
fn test_late_drops_respect_frame_drop_late() {
    let params = PlaybackParams {
        frame_drop_late: false,
        ..test_params()
    };
    let (player, _events) = start_without_audio(ScriptedSource::video(100, 25.0), params);

    present_with_stall(&player);

    let stats = player.stats();
    assert_eq!(stats.late_frame_drops, 0);
    assert!(stats.early_frame_drops > 0, "decoder should still discard late pictures");
}

#[test]
#[serial]
fn test_video_master_never_drops_frames() {
    let params = PlaybackParams {
        sync_mode: SyncMode::Video,
        ..test_params()
    };
    let (player, _events) = start_without_audio(ScriptedSource::video(100, 25.0), params);
    assert_eq!(player.master_sync_type(), Some(SyncMode::Video));

    present_with_stall(&player);

    let stats = player.stats();
    assert_eq!(stats.early_frame_drops, 0);
    assert_eq!(stats.late_frame_drops, 0);
}

#[test]
fn test_relative_seek_without_clock_starts_from_zero() {
    let source = ScriptedSource::video(100, 25.0);
    let log = source.log();
    let (player, _events) = start_without_audio(source, test_params());
    assert!(player.master_clock_time().is_nan());

    player.seek_relative(1.5).unwrap();
    assert_eq!(
        nth_seek(&log, 1),
        SeekWindow {
            min: 2,
            target: 1_500_000,
            max: i64::MAX,
            unit: SeekUnit::Micros,
        }
    );

    // The clock now sits at the seek target
    player.seek_relative(-0.5).unwrap();
    let second = nth_seek(&log, 2);
    assert_eq!(second.unit, SeekUnit::Micros);
    assert!(
        (1_000_000..3_000_000).contains(&second.target),
        "target {} not relative to the clock",
        second.target
    );
    assert_eq!(second.min, i64::MIN);
    assert_eq!(second.max, second.target + 500_000 - 2);

    assert!(player.seek_relative(f64::INFINITY).is_err());
}

#[test]
fn test_relative_seek_clamps_to_container_start() {
    let source = ScriptedSource::video(100, 25.0).with_start_time(0.5);
    let log = source.log();
    let (player, _events) = start_without_audio(source, test_params());

    player.seek_relative(-1.0).unwrap();
    assert_eq!(
        nth_seek(&log, 1),
        SeekWindow {
            min: i64::MIN,
            target: 500_000,
            max: 1_499_998,
            unit: SeekUnit::Micros,
        }
    );
}

#[test]
fn test_relative_seek_in_bytes_when_configured() {
    let source = ScriptedSource::video(100, 25.0);
    let log = source.log();
    let params = PlaybackParams {
        seek_by_bytes: true,
        ..test_params()
    };
    let (player, _events) = start_without_audio(source, params);

    // 1600 bytes over 4 seconds
    let byte_rate = scripted_bit_rate(100, 4.0) / 8;
    assert_eq!(byte_rate, 400);

    player.seek_relative(1.0).unwrap();
    assert_eq!(
        nth_seek(&log, 1),
        SeekWindow {
            min: 2,
            target: 400,
            max: i64::MAX,
            unit: SeekUnit::Bytes,
        }
    );
}

#[test]
#[serial]
fn test_relative_byte_seeks_follow_presented_position() {
    let source = ScriptedSource::video(100, 25.0);
    let log = source.log();
    let (player, _events) = start_without_audio(source, test_params());
    player.play().unwrap();

    // Nothing presented yet: offsets count from 0 and never go negative
    player.seek_bytes_relative(-100).unwrap();
    assert_eq!(
        nth_seek(&log, 1),
        SeekWindow {
            min: i64::MIN,
            target: 0,
            max: 98,
            unit: SeekUnit::Bytes,
        }
    );

    let shown = present_until(&player, WAIT, |frames| frames.len() >= 3);
    player.pause().unwrap();
    let last_pos = shown.last().and_then(|f| f.pos).expect("presented position") as i64;
    assert!(last_pos > 0);

    player.seek_bytes_relative(PACKET_BYTES as i64 * 2).unwrap();
    let forward = nth_seek(&log, 2);
    assert_eq!(forward.unit, SeekUnit::Bytes);
    assert_eq!(forward.target, last_pos + 32);
    assert_eq!(forward.min, last_pos + 2);

    player.seek_bytes_relative(i64::MAX).unwrap();
    assert_eq!(
        nth_seek(&log, 3),
        SeekWindow {
            min: 2,
            target: i64::MAX,
            max: i64::MAX,
            unit: SeekUnit::Bytes,
        }
    );
}

#[test]
fn test_audio_clock_is_anchored_at_callback_start() {
    let (player, _events, _device, _converter) =
        start_with_audio(ScriptedSource::audio(3.0, 8000, 1), test_params());
    let puller = player.audio_puller().unwrap();
    player.play().unwrap();

    let mut buf = vec![0.0f32; 512];
    assert!(wait_until(WAIT, || {
        puller.fill(&mut buf);
        buf.iter().any(|s| *s == AUDIO_LEVEL)
    }));

    // A callback that began a second ago puts the clock a second further on
    puller.fill_at(&mut buf, monotonic_secs() - 1.0);
    let anchored_earlier = player.master_clock_time();
    puller.fill_at(&mut buf, monotonic_secs());
    let anchored_now = player.master_clock_time();

    let gap = anchored_earlier - anchored_now;
    assert!(gap > 0.8 && gap < 1.2, "clock gap {}", gap);
}

#[test]
fn test_close_releases_decoders_and_source() {
    let source = ScriptedSource::audio_video(2.0, 25.0, 8000);
    let log = source.log();
    let (player, _events, _device, _converter) = start_with_audio(source, test_params());
    player.play().unwrap();
    assert!(wait_until(WAIT, || player.stats().video_packets > 0));
    assert_eq!(log.codecs_opened.load(Ordering::Relaxed), 2);

    player.close();
    assert_eq!(log.codecs_dropped.load(Ordering::Relaxed), 2);
    assert!(log.dropped.load(Ordering::Acquire));
}

#[test]
#[serial]
fn test_dropped_event_receiver_does_not_stop_playback() {
    let (tx, rx) = avsync_common::events::event_channel(8);
    drop(rx);
    let params = PlaybackParams {
        frame_drop_late: false,
        ..test_params()
    };
    let player = Player::open(Box::new(ScriptedSource::video(50, 25.0)), params, tx).unwrap();
    player.start(None).unwrap();
    player.play().unwrap();

    assert!(wait_until(WAIT, || {
        player.refresh_video();
        player.is_drained()
    }));
    assert!(wait_for_state(&player, PlayerState::Finished));
    // Ready, Playing and Finished all went undelivered
    assert!(player.stats().notification_failures >= 3);
}
