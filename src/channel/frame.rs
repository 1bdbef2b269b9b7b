//! Wire frames exchanged with the orchestrator.
//!
//! Every message is a JSON object `{"type": <kind>, "payload": <data>}`.
//! Inbound text is parsed completely into an [`InboundFrame`] before anything
//! touches the Aura State.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::error::PlayerError;
use crate::state::{AudioState, EmotionVector, FaceFrame, SourceData};

/// Partial state carried by an `aura_update` frame.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AuraUpdate {
    #[serde(default)]
    pub final_emotion_vector: Option<EmotionVector>,
    #[serde(default)]
    pub source_data: Option<SourceData>,
    #[serde(default)]
    pub audio: Option<AudioState>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    AuraUpdate(AuraUpdate),
    DnaLoaded(Value),
    VoteAck { mood: String, tally: u64 },
    FaceFrame(FaceFrame),
    /// Any other kind, e.g. the orchestrator's `error` notices.
    Unrecognized(String),
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Deserialize)]
struct VoteAckPayload {
    mood: String,
    tally: u64,
}

#[derive(Deserialize)]
struct FaceFramePayload {
    frame: String,
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self, PlayerError> {
        let raw: RawFrame = serde_json::from_str(text)?;
        let frame = match raw.kind.as_str() {
            "aura_update" => InboundFrame::AuraUpdate(serde_json::from_value(raw.payload)?),
            "dna_loaded" => InboundFrame::DnaLoaded(raw.payload),
            "vote_ack" => {
                let ack: VoteAckPayload = serde_json::from_value(raw.payload)?;
                InboundFrame::VoteAck {
                    mood: ack.mood,
                    tally: ack.tally,
                }
            }
            "face_frame" => {
                let payload: FaceFramePayload = serde_json::from_value(raw.payload)?;
                let frame = FaceFrame::from_base64(&payload.frame)
                    .map_err(|e| PlayerError::Parse(format!("face frame: {e}")))?;
                InboundFrame::FaceFrame(frame)
            }
            _ => InboundFrame::Unrecognized(raw.kind),
        };
        Ok(frame)
    }

    pub fn kind(&self) -> &str {
        match self {
            InboundFrame::AuraUpdate(_) => "aura_update",
            InboundFrame::DnaLoaded(_) => "dna_loaded",
            InboundFrame::VoteAck { .. } => "vote_ack",
            InboundFrame::FaceFrame(_) => "face_frame",
            InboundFrame::Unrecognized(kind) => kind,
        }
    }
}

/// A frame sent by this player.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundFrame {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
}

impl OutboundFrame {
    pub fn control(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    pub fn audience_vote(mood: &str) -> Self {
        Self::control("audience_vote", serde_json::json!({ "mood": mood }))
    }

    /// Source weights, each clamped to `[0, 1]`.
    pub fn update_weights(weights: &BTreeMap<String, f64>) -> Self {
        let clamped: BTreeMap<&str, f64> = weights
            .iter()
            .map(|(source, weight)| (source.as_str(), clamp_unit(*weight)))
            .collect();
        Self::control("update_weights", serde_json::json!(clamped))
    }

    pub fn set_manual_override(active: bool, vector: &EmotionVector) -> Self {
        let clamped: BTreeMap<&str, f64> = vector
            .iter()
            .map(|(mood, value)| (mood.as_str(), clamp_unit(*value)))
            .collect();
        Self::control(
            "set_manual_override",
            serde_json::json!({ "active": active, "vector": clamped }),
        )
    }

    pub fn to_json(&self) -> Result<String, PlayerError> {
        Ok(serde_json::to_string(self)?)
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_each_kind() {
        let update = InboundFrame::parse(
            r#"{"type":"aura_update","payload":{"audio":{"tempo_multiplier":1.2}}}"#,
        )
        .unwrap();
        assert_eq!(update.kind(), "aura_update");

        let ack = InboundFrame::parse(r#"{"type":"vote_ack","payload":{"mood":"joy","tally":5}}"#)
            .unwrap();
        assert_eq!(
            ack,
            InboundFrame::VoteAck {
                mood: "joy".into(),
                tally: 5
            }
        );

        let dna = InboundFrame::parse(r#"{"type":"dna_loaded","payload":{"filename":"x.wav"}}"#)
            .unwrap();
        assert_eq!(dna.kind(), "dna_loaded");

        let other = InboundFrame::parse(r#"{"type":"ack","payload":{"received":true}}"#).unwrap();
        assert_eq!(other, InboundFrame::Unrecognized("ack".into()));
    }

    #[test]
    fn test_malformed_frames_are_errors() {
        let cases = [
            "not json",
            r#"{"payload":{}}"#,
            r#"{"type":"vote_ack","payload":{"mood":"joy"}}"#,
            r#"{"type":"vote_ack","payload":{"mood":"joy","tally":-3}}"#,
            r#"{"type":"aura_update","payload":{"audio":{"tempo_bpm":"fast"}}}"#,
            r#"{"type":"face_frame","payload":{"frame":"***"}}"#,
        ];
        for text in cases {
            let result = InboundFrame::parse(text);
            assert!(
                matches!(result, Err(PlayerError::Parse(_))),
                "expected parse error for {text}"
            );
        }
    }

    #[test]
    fn test_outbound_shapes() {
        let vote = OutboundFrame::audience_vote("calm").to_json().unwrap();
        assert_eq!(vote, r#"{"type":"audience_vote","payload":{"mood":"calm"}}"#);

        let mut weights = BTreeMap::new();
        weights.insert("face".to_string(), 1.7);
        weights.insert("speech".to_string(), -0.2);
        let frame = OutboundFrame::update_weights(&weights);
        assert_eq!(frame.kind, "update_weights");
        assert_eq!(frame.payload, serde_json::json!({"face": 1.0, "speech": 0.0}));
    }
}
