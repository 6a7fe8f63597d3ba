//! Session plumbing shared by the engine tests: opening a player on a
//! scripted source, collecting host events, and polling until a condition
//! holds.

use super::fake_audio::{FakeDevice, PassthroughConverter};
use super::scripted_source::ScriptedSource;
use avsync_common::events::{event_channel, EventReceiver, PlayerEvent, PlayerEventKind, PlayerState};
use avsync_common::params::PlaybackParams;
use avsync_player::playback::engine::AudioSink;
use avsync_player::playback::frame_queue::Frame;
use avsync_player::Player;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default wait for asynchronous engine effects
pub const WAIT: Duration = Duration::from_secs(5);

/// Params tuned for short scripted inputs
pub fn test_params() -> PlaybackParams {
    PlaybackParams {
        retry_wait_ms: 2,
        ..PlaybackParams::default()
    }
}

/// Open and start a video-only (or otherwise audio-less) session
pub fn start_without_audio(source: ScriptedSource, params: PlaybackParams) -> (Player, EventLog) {
    let (events, rx) = event_channel(params.event_channel_capacity);
    let player = Player::open(Box::new(source), params, events).expect("open");
    player.start(None).expect("start");
    (player, EventLog::new(rx))
}

/// Open and start a session with a fake audio device
pub fn start_with_audio(
    source: ScriptedSource,
    params: PlaybackParams,
) -> (Player, EventLog, FakeDevice, PassthroughConverter) {
    let (events, rx) = event_channel(params.event_channel_capacity);
    let player = Player::open(Box::new(source), params, events).expect("open");
    let mut device = FakeDevice::new();
    let converter = PassthroughConverter::default();
    player
        .start(Some(AudioSink {
            device: &mut device,
            converter: Box::new(converter.clone()),
        }))
        .expect("start");
    (player, EventLog::new(rx), device, converter)
}

/// Everything the host received so far
pub struct EventLog {
    rx: EventReceiver,
    pub events: Vec<PlayerEvent>,
}

impl EventLog {
    pub fn new(rx: EventReceiver) -> Self {
        Self {
            rx,
            events: Vec::new(),
        }
    }

    /// Move pending events into `events`
    pub fn drain(&mut self) -> &[PlayerEvent] {
        while let Ok(event) = self.rx.try_recv() {
            self.events.push(event);
        }
        &self.events
    }

    /// Receive the next event, waiting up to `timeout`
    pub async fn next(&mut self, timeout: Duration) -> Option<PlayerEvent> {
        let event = tokio::time::timeout(timeout, self.rx.recv()).await.ok().flatten()?;
        self.events.push(event.clone());
        Some(event)
    }

    pub fn state_changes(&mut self) -> Vec<(PlayerState, PlayerState)> {
        self.drain()
            .iter()
            .filter_map(|e| match e.kind {
                PlayerEventKind::StateChanged { old_state, new_state } => Some((old_state, new_state)),
                _ => None,
            })
            .collect()
    }

    pub fn contains(&mut self, predicate: impl Fn(&PlayerEventKind) -> bool) -> bool {
        self.drain().iter().any(|e| predicate(&e.kind))
    }

    /// Poll until an event matching `predicate` arrives
    pub fn wait_for(&mut self, predicate: impl Fn(&PlayerEventKind) -> bool) -> bool {
        wait_until(WAIT, || self.contains(&predicate))
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

pub fn wait_for_state(player: &Player, state: PlayerState) -> bool {
    wait_until(WAIT, || player.state() == state)
}

/// Run the presentation loop for `duration`, returning every shown picture
pub fn present_for(player: &Player, duration: Duration) -> Vec<Arc<Frame>> {
    present_until(player, duration, |_| false)
}

/// Run the presentation loop until `done` holds for the pictures shown so far
pub fn present_until(
    player: &Player,
    timeout: Duration,
    mut done: impl FnMut(&[Arc<Frame>]) -> bool,
) -> Vec<Arc<Frame>> {
    let deadline = Instant::now() + timeout;
    let mut shown: Vec<Arc<Frame>> = Vec::new();
    while Instant::now() < deadline {
        let refresh = player.refresh_video();
        if let Some(frame) = refresh.frame {
            shown.push(frame);
            if done(&shown) {
                break;
            }
        }
        let pause = refresh.remaining.clamp(0.001, 0.01);
        std::thread::sleep(Duration::from_secs_f64(pause));
    }
    shown
}
