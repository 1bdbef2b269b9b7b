//! Read-only engine readout for the UI layer.

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlayerStatus {
    pub track_name: Option<String>,
    pub base_tempo: Option<f64>,
    pub target_tempo_bpm: Option<f64>,
    pub tempo_multiplier: f64,
    pub primary_emotion: Option<String>,
    /// Size of the latest camera thumbnail, if one has arrived.
    pub face_frame_bytes: Option<usize>,
    pub mod_gain: Option<f64>,
    pub mod_cutoff_hz: Option<f64>,
    pub effective_gain: f64,
    pub loudness_db: f32,
    pub boost: f32,
    pub ready: bool,
    pub bypassed: bool,
    pub connected: bool,
    pub playing: bool,
    pub degraded: bool,
    pub error: Option<String>,
}

impl PlayerStatus {
    /// One-line summary for the console.
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{} | x{:.2} | gain {:.2} | {:.1} dB | boost {:.2}",
            self.track_name.as_deref().unwrap_or("-"),
            self.tempo_multiplier,
            self.effective_gain,
            self.loudness_db,
            self.boost,
        );
        if let Some(emotion) = &self.primary_emotion {
            line.push_str(&format!(" | {emotion}"));
        }
        for (flag, label) in [
            (self.playing, "playing"),
            (self.bypassed, "bypass"),
            (self.degraded, "degraded"),
            (!self.connected, "offline"),
        ] {
            if flag {
                line.push_str(" | ");
                line.push_str(label);
            }
        }
        if let Some(error) = &self.error {
            line.push_str(&format!(" | error: {error}"));
        }
        line
    }
}
