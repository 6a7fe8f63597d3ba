//! Playback pipeline
//!
//! Bottom-up:
//! - [`circular_buffer`]: blocking fixed-capacity ring shared by both queue kinds
//! - [`packet_queue`] / [`frame_queue`]: per-stream queues with serial bookkeeping
//! - [`decoder`]: send/receive codec driver and its thread
//! - [`clock`] / [`sync`]: clocks and the pure synchronization math
//! - [`state_machine`] / [`events`]: lifecycle state and host notification
//! - [`engine`]: the [`Player`](engine::Player) tying it together

pub mod circular_buffer;
pub mod clock;
pub mod decoder;
pub mod engine;
pub mod events;
pub mod frame_queue;
pub mod packet_queue;
pub mod state_machine;
pub mod sync;
