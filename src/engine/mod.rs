//! The adaptive playback engine.
//!
//! - [`driver`] - Turns Aura State changes into engine actions
//! - [`playback::PlaybackEngine`] - Owns the track, the graph and the output
//! - [`retry`] - Autoplay retry ladder
//! - [`boost`] / [`loudness`] - Quiet-output detection and compensation
//! - [`loader`] - Track fetching and decoding
//! - [`session`] - The event loop tying the channel and the engine together

pub mod boost;
pub mod config;
pub mod driver;
pub mod error;
pub mod loader;
pub mod loudness;
pub mod playback;
pub mod retry;
pub mod session;
pub mod status;

pub use config::PlayerConfig;
pub use error::PlayerError;
pub use session::{EngineCommand, Session};
pub use status::PlayerStatus;
