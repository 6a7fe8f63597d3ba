//! Event types delivered from a playback session to its host
//!
//! The engine never calls into host code directly. Every externally visible
//! happening (state transition, error, step request, termination) becomes a
//! [`PlayerEvent`] pushed into a bounded channel with a non-blocking send, so
//! engine threads are never held up by how fast the host drains events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Externally observable player lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    Unknown,
    Ready,
    Playing,
    Paused,
    Stopped,
    Stalled,
    Finished,
    Error,
}

impl std::fmt::Display for PlayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerState::Unknown => write!(f, "unknown"),
            PlayerState::Ready => write!(f, "ready"),
            PlayerState::Playing => write!(f, "playing"),
            PlayerState::Paused => write!(f, "paused"),
            PlayerState::Stopped => write!(f, "stopped"),
            PlayerState::Stalled => write!(f, "stalled"),
            PlayerState::Finished => write!(f, "finished"),
            PlayerState::Error => write!(f, "error"),
        }
    }
}

/// Error codes reported to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Input could not be opened or probed
    OpenFailed,
    /// Neither an audio nor a video stream could be opened
    StreamNotFound,
    /// A seek request failed; playback continues from the old position
    SeekFailed,
    /// A stream's codec failed; that stream was closed
    DecodeFailed,
    /// Unrecoverable read error; the session terminated
    ReadFailed,
    /// The audio output device rejected the stream parameters
    AudioDeviceFailed,
    /// A state notification could not be delivered to the host
    NotificationFailed,
    /// Any other internal failure
    Internal,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCode::OpenFailed => "open_failed",
            ErrorCode::StreamNotFound => "stream_not_found",
            ErrorCode::SeekFailed => "seek_failed",
            ErrorCode::DecodeFailed => "decode_failed",
            ErrorCode::ReadFailed => "read_failed",
            ErrorCode::AudioDeviceFailed => "audio_device_failed",
            ErrorCode::NotificationFailed => "notification_failed",
            ErrorCode::Internal => "internal",
        };
        write!(f, "{}", name)
    }
}

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEventKind {
    /// Player state changed (silent transitions are never delivered)
    StateChanged {
        old_state: PlayerState,
        new_state: PlayerState,
    },

    /// Something failed
    Error { code: ErrorCode, message: String },

    /// The engine advanced exactly one picture while paused (after a seek)
    StepRequested,

    /// The reader loop ended abnormally; the host should close the session
    SessionTerminated { reason: String },
}

/// Event envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerEvent {
    /// Session that emitted the event
    pub session_id: Uuid,
    /// When the event was emitted
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: PlayerEventKind,
}

impl PlayerEvent {
    pub fn new(session_id: Uuid, kind: PlayerEventKind) -> Self {
        Self {
            session_id,
            timestamp: crate::time::now(),
            kind,
        }
    }
}

/// Why an event could not be delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitError {
    /// The host is not draining fast enough
    Full,
    /// The host dropped its receiver
    Closed,
}

/// Sending half of the host event channel
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<PlayerEvent>,
    session_id: Uuid,
}

/// Receiving half of the host event channel
pub type EventReceiver = mpsc::Receiver<PlayerEvent>;

/// Create a bounded event channel for one session
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        EventSender {
            tx,
            session_id: Uuid::new_v4(),
        },
        rx,
    )
}

impl EventSender {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Emit without blocking; never waits for the host
    pub fn try_emit(&self, kind: PlayerEventKind) -> Result<(), EmitError> {
        self.tx
            .try_send(PlayerEvent::new(self.session_id, kind))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => EmitError::Full,
                mpsc::error::TrySendError::Closed(_) => EmitError::Closed,
            })
    }
}
