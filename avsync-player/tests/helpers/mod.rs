//! Test helper modules for avsync-player integration tests
//!
//! Provides reusable test infrastructure components:
//! - ScriptedSource: in-memory container with scripted packets and failures
//! - FakeDevice / PassthroughConverter: audio output without hardware
//! - EventLog and polling helpers for driving a session

#![allow(dead_code)]

pub mod fake_audio;
pub mod scripted_source;
pub mod session;

// Re-export commonly used types
pub use fake_audio::{FakeDevice, PassthroughConverter, FAKE_HW_BUFFER_FRAMES};
pub use scripted_source::{scripted_bit_rate, ScriptedSource, SourceLog, AUDIO_LEVEL, PACKET_BYTES};
pub use session::{
    present_for, present_until, start_with_audio, start_without_audio, test_params, wait_for_state, wait_until,
    EventLog, WAIT,
};
