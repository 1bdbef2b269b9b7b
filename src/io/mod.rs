//! Hardware I/O.
//!
//! - [`AudioBackend`] / [`OutputStream`] - The seam between the engine and the output device
//! - [`CpalBackend`] - Speaker playback via cpal

pub mod audio;
pub mod backend;

pub use audio::CpalBackend;
pub use backend::{AudioBackend, OutputStream};
