//! Output backend seam.
//!
//! The engine only talks to the output device through these traits, so the
//! playback logic can be driven by a scripted backend in tests.

use std::sync::Arc;

use crate::audio::{PlayerControls, Renderer};
use crate::engine::error::PlayerError;

/// A running (or paused) output stream.
pub trait OutputStream {
    /// Fails with [`PlayerError::PlaybackBlocked`] when the output refuses to start.
    fn play(&mut self) -> Result<(), PlayerError>;

    fn pause(&mut self) -> Result<(), PlayerError>;
}

pub trait AudioBackend {
    /// Opens the processed graph at the native rate and channel count.
    ///
    /// Fails with [`PlayerError::GraphInit`] when the device cannot host it.
    fn open_graph(&mut self, renderer: Renderer) -> Result<Box<dyn OutputStream>, PlayerError>;

    /// Opens plain playback at whatever configuration the device prefers.
    fn open_raw(
        &mut self,
        controls: Arc<PlayerControls>,
    ) -> Result<Box<dyn OutputStream>, PlayerError>;

    /// Starts a throwaway stream playing an inaudible tone.
    ///
    /// The stream stops when the returned handle is dropped.
    fn unlock(&mut self) -> Result<Box<dyn OutputStream>, PlayerError>;

    /// Plays an audible one second reference tone, bypassing the graph.
    fn reference_tone(&mut self) -> Result<Box<dyn OutputStream>, PlayerError>;
}
