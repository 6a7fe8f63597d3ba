//! AVSync Player (avsync-player) - headless diagnostic player
//!
//! Plays one file through the synchronization engine with audio on the
//! default output device, logging every event the session emits. Exits when
//! playback has drained, the session terminates, or on Ctrl-C.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use avsync_common::config::load_config;
use avsync_common::events::{event_channel, PlayerEventKind, PlayerState};
use avsync_common::params::SyncMode;
use avsync_player::audio::{CpalOutput, RubatoConverter};
use avsync_player::media::symphonia_source::SymphoniaSource;
use avsync_player::playback::engine::AudioSink;
use avsync_player::Player;
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for avsync-player
#[derive(Parser, Debug)]
#[command(name = "avsync-player")]
#[command(about = "Headless A/V synchronization player")]
#[command(version)]
struct Args {
    /// Media file to play
    input: PathBuf,

    /// Config file (overrides AVSYNC_CONFIG and the platform default)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Master clock: audio, video or external
    #[arg(long, value_parser = parse_sync_mode)]
    sync: Option<SyncMode>,

    /// Number of plays (0 = loop forever)
    #[arg(long = "loop")]
    loop_count: Option<u32>,

    /// Start position in seconds
    #[arg(short, long)]
    start: Option<f64>,

    /// Playback speed
    #[arg(long)]
    speed: Option<f64>,

    /// Start muted
    #[arg(long)]
    mute: bool,
}

fn parse_sync_mode(value: &str) -> std::result::Result<SyncMode, String> {
    match value {
        "audio" => Ok(SyncMode::Audio),
        "video" => Ok(SyncMode::Video),
        "external" | "ext" => Ok(SyncMode::External),
        other => Err(format!("unknown sync mode '{}'", other)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config is resolved before logging starts so its level can seed the filter
    let (config, config_source) = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    let level = &config.logging.level;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("avsync_player={level},avsync_common={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration: {:?}", config_source);

    let mut params = config.playback;
    if let Some(sync) = args.sync {
        params.sync_mode = sync;
    }
    if let Some(loop_count) = args.loop_count {
        params.loop_count = loop_count;
    }
    if args.start.is_some() {
        params.start_time = args.start;
    }
    params.validate().context("Invalid playback parameters")?;
    let looping = params.loop_count != 1;

    let source = SymphoniaSource::open(&args.input)
        .with_context(|| format!("Failed to open {}", args.input.display()))?;
    let (events, mut event_rx) = event_channel(params.event_channel_capacity);
    let player = Player::open(Box::new(source), params, events).context("Failed to open session")?;
    info!("Session {} (duration {:?})", player.session_id(), player.duration());

    let mut output = match CpalOutput::default_device() {
        Ok(output) => Some(output),
        Err(e) => {
            warn!("No audio output: {}", e);
            None
        }
    };
    let sink = output.as_mut().map(|device| AudioSink {
        device,
        converter: Box::new(RubatoConverter::new()),
    });
    player.start(sink).context("Failed to start playback")?;

    if let Some(output) = output.as_mut() {
        if let Ok(puller) = player.audio_puller() {
            output.start(puller).context("Failed to start audio output")?;
        }
    }

    player.set_muted(args.mute)?;
    if let Some(speed) = args.speed {
        player.set_speed(speed)?;
    }
    player.play()?;

    let mut ticker = tokio::time::interval(Duration::from_millis(200));
    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else {
                    break;
                };
                info!("event: {}", serde_json::to_string(&event)?);
                if let PlayerEventKind::SessionTerminated { reason } = &event.kind {
                    warn!("Session terminated: {}", reason);
                    break;
                }
            }
            _ = ticker.tick() => {
                if !looping && player.state() == PlayerState::Finished && player.is_drained() {
                    info!("Playback complete");
                    break;
                }
            }
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    let stats = player.stats();
    info!("Stats: {}", serde_json::to_string(&stats)?);
    player.close();
    if let Some(mut output) = output {
        output.stop()?;
    }
    Ok(())
}
