//! # AVSync Player Library (avsync-player)
//!
//! Media playback synchronization engine.
//!
//! **Purpose:** Demultiplex an input into audio and picture streams, decode
//! each on its own thread into bounded queues, and keep picture and sound
//! aligned through an audio clock, a video clock and an external wall clock
//! while the host seeks, pauses, steps and changes speed.
//!
//! **Architecture:** reader thread → packet queues → decoder threads → frame
//! queues → {audio pull callback, video refresh poller}. Collaborators
//! (demuxer/codec, converter, audio device) plug in through the traits in
//! [`media`]; concrete symphonia / rubato / cpal implementations live in
//! [`media::symphonia_source`] and [`audio`].

pub mod audio;
pub mod error;
pub mod media;
pub mod playback;

pub use error::{Error, Result};
pub use playback::engine::{Player, PlayerStats, VideoRefresh};
