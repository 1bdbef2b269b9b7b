//! Partial-state merge.
//!
//! [`apply`] is the only place the Aura State changes. It is a pure step over
//! an already-parsed frame, so a frame that failed to parse can never leave
//! the state half-updated.

use tracing::debug;

use super::{AudioState, AuraState, Modulation, SourceData};
use crate::channel::frame::{AuraUpdate, InboundFrame};

/// Merges one inbound frame into `state`.
///
/// Returns `false` when the frame kind is not recognized and nothing changed.
pub fn apply(state: &mut AuraState, frame: InboundFrame) -> bool {
    match frame {
        InboundFrame::AuraUpdate(update) => {
            merge_update(state, update);
            true
        }
        InboundFrame::DnaLoaded(info) => {
            state.dna_info = Some(info);
            true
        }
        InboundFrame::VoteAck { mood, tally } => {
            state
                .source_data
                .audience_votes
                .get_or_insert_with(Default::default)
                .insert(mood, tally);
            true
        }
        InboundFrame::FaceFrame(frame) => {
            state.source_data.face_frame = Some(frame);
            true
        }
        InboundFrame::Unrecognized(kind) => {
            debug!("Ignoring frame of kind {kind:?}");
            false
        }
    }
}

fn merge_update(state: &mut AuraState, update: AuraUpdate) {
    if let Some(vector) = update.final_emotion_vector {
        state.final_emotion_vector = Some(vector);
    }
    if let Some(source) = update.source_data {
        state.source_data.merge(source);
    }
    if let Some(audio) = update.audio {
        state.audio.merge(audio);
    }
}

/// Overwrites `slot` only when the patch carries a value.
fn replace<T>(slot: &mut Option<T>, patch: Option<T>) {
    if patch.is_some() {
        *slot = patch;
    }
}

impl SourceData {
    fn merge(&mut self, patch: SourceData) {
        replace(&mut self.game_state, patch.game_state);
        replace(&mut self.face_emotion, patch.face_emotion);
        replace(&mut self.speech_emotion, patch.speech_emotion);
        replace(&mut self.face_frame, patch.face_frame);
        replace(&mut self.audience_votes, patch.audience_votes);
        replace(&mut self.weights, patch.weights);
        replace(&mut self.manual_override, patch.manual_override);
        self.extra.extend(patch.extra);
    }
}

impl AudioState {
    fn merge(&mut self, patch: AudioState) {
        replace(&mut self.current_track, patch.current_track);
        replace(&mut self.base_tempo, patch.base_tempo);
        replace(&mut self.tempo_bpm, patch.tempo_bpm);
        replace(&mut self.tempo_multiplier, patch.tempo_multiplier);
        replace(&mut self.primary_emotion, patch.primary_emotion);
        replace(&mut self.track_url, patch.track_url);
        replace(&mut self.full_track_url, patch.full_track_url);
        if let Some(modulation) = patch.modulation {
            self.modulation
                .get_or_insert_with(Default::default)
                .merge(modulation);
        }
        self.extra.extend(patch.extra);
    }
}

impl Modulation {
    fn merge(&mut self, patch: Modulation) {
        replace(&mut self.gain, patch.gain);
        replace(&mut self.filter_cutoff_hz, patch.filter_cutoff_hz);
        self.extra.extend(patch.extra);
    }
}
