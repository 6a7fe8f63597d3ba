//! # AVSync Common Library
//!
//! Shared code for the playback synchronization engine and its hosts:
//! - Error type
//! - Tunable playback parameters (one immutable record per session)
//! - Configuration file resolution and loading
//! - Player state and event types delivered to the host
//! - Monotonic time helpers

pub mod config;
pub mod error;
pub mod events;
pub mod params;
pub mod time;

pub use error::{Error, Result};
pub use events::{ErrorCode, PlayerEvent, PlayerState};
pub use params::{PlaybackParams, SyncMode};
