//! Concrete audio adapters
//!
//! - [`resampler`]: rubato-backed [`AudioConverter`](crate::media::AudioConverter)
//! - [`output`]: cpal-backed [`AudioDevice`](crate::media::AudioDevice) and output stream

pub mod output;
pub mod resampler;

pub use output::CpalOutput;
pub use resampler::RubatoConverter;
