//! Error types for the playback engine and state channel.

use thiserror::Error;

/// Everything that can go wrong in a session.
///
/// None of these are fatal: each one downgrades functionality or leaves the
/// state as it was.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlayerError {
    /// An inbound frame could not be parsed. Only that frame is dropped.
    #[error("Malformed frame: {0}")]
    Parse(String),

    /// The state channel never opened or closed unexpectedly.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A track could not be fetched or decoded.
    #[error("Failed to load track: {0}")]
    MediaLoad(String),

    /// The output refused to start playing.
    #[error("Playback blocked: {0}")]
    PlaybackBlocked(String),

    /// The processed signal chain could not be built on the output device.
    #[error("Audio graph unavailable: {0}")]
    GraphInit(String),
}

impl From<serde_json::Error> for PlayerError {
    fn from(e: serde_json::Error) -> Self {
        PlayerError::Parse(e.to_string())
    }
}
