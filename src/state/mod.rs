//! Aura State: the merged live record of emotion, source and audio data.
//!
//! This module contains the session state types received from the orchestrator:
//!
//! - [`AuraState`] - The single merged record owned by the state channel
//! - [`SourceData`] / [`AudioState`] / [`Modulation`] - Nested records
//!
//! Every field is optional because frames arrive partially. The same types are
//! used for the stored state and for the partial patches carried by inbound
//! frames: `None` in a patch means "leave the stored value alone". Unknown keys
//! are kept in `extra` so nothing the orchestrator sends is lost.
//!
//! Merge rules live in [`merge`].

pub mod merge;

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use merge::apply;

/// Mood name to intensity in `[0, 1]`.
pub type EmotionVector = BTreeMap<String, f64>;

/// Mood name to audience vote count.
pub type VoteTally = BTreeMap<String, u64>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuraState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_emotion_vector: Option<EmotionVector>,
    #[serde(default)]
    pub source_data: SourceData,
    #[serde(default)]
    pub audio: AudioState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dna_info: Option<Value>,
}

/// A single sensor's emotion readout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionReadout {
    pub emotion: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManualOverride {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub vector: EmotionVector,
}

/// Most recent camera thumbnail relayed by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceFrame {
    pub jpeg: Vec<u8>,
}

impl FaceFrame {
    pub fn from_base64(encoded: &str) -> Result<Self, base64::DecodeError> {
        Ok(Self {
            jpeg: BASE64.decode(encoded.trim())?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_emotion: Option<EmotionReadout>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speech_emotion: Option<EmotionReadout>,
    /// Only ever set by `face_frame` frames, never carried in `aura_update`.
    #[serde(skip)]
    pub face_frame: Option<FaceFrame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience_votes: Option<VoteTally>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<BTreeMap<String, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_override: Option<ManualOverride>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_track: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_tempo: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tempo_bpm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tempo_multiplier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_emotion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modulation: Option<Modulation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_track_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Modulation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gain: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_cutoff_hz: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AuraState {
    #[cfg(test)]
    pub fn audience_tally(&self, mood: &str) -> Option<u64> {
        self.source_data
            .audience_votes
            .as_ref()
            .and_then(|votes| votes.get(mood).copied())
    }
}
