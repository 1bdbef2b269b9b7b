//! Audio data types, decoding, and the real-time signal chain.
//!
//! # Data Types
//! - [`frame::TrackBuffer`] - A decoded track at a fixed rate and channel count
//!
//! # Sources
//! - [`file`] - Track decoding with symphonia
//!
//! # Signal chain
//! - [`render::Renderer`] - Runs inside the device callback
//! - [`effects::lowpass`] - Ramped lowpass filter
//! - [`effects::gain`] - Ramped gain stage
//! - [`effects::level_meter`] - Analysis tap and RMS metering
//! - [`ramp`] - Linear parameter ramps

pub mod effects;
pub mod file;
pub mod frame;
pub mod ramp;
pub mod render;

pub use file::{AudioFileInfo, AudioFileReader};
pub use render::{PlayerControls, Renderer};

/// Channel count of the processed graph.
pub const CHANNELS: usize = 2;

/// Sample rate of decoded tracks and of the processed graph.
pub const SAMPLE_RATE: u32 = 48000;

pub type Track = frame::TrackBuffer<CHANNELS, SAMPLE_RATE>;
