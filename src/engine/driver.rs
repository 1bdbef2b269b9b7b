//! Turns Aura State changes into engine actions.
//!
//! [`diff`] compares the previous and the next state and reports only what
//! changed, so replaying the same state twice schedules nothing.

use url::Url;

use crate::state::{AudioState, AuraState};

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Load(String),
    Tempo(f64),
    /// `None` keeps the current target for that parameter.
    Modulation {
        gain: Option<f64>,
        cutoff_hz: Option<f64>,
    },
}

/// The track to play: `full_track_url` when set, otherwise `track_url`
/// resolved against the backend base URL. Relative paths need a base.
pub fn resolve_track_url(audio: &AudioState, base: Option<&Url>) -> Option<String> {
    if let Some(full) = audio.full_track_url.as_deref().filter(|u| !u.is_empty()) {
        return Some(full.to_string());
    }
    let relative = audio.track_url.as_deref().filter(|u| !u.is_empty())?;
    match Url::parse(relative) {
        Ok(absolute) => Some(absolute.to_string()),
        Err(_) => base?.join(relative).ok().map(String::from),
    }
}

/// Tempo multiplier to apply for `audio`. Missing or non-finite values mean 1.0.
pub fn tempo_multiplier(audio: &AudioState) -> f64 {
    audio
        .tempo_multiplier
        .filter(|m| m.is_finite())
        .unwrap_or(1.0)
}

pub fn diff(prev: &AuraState, next: &AuraState, base: Option<&Url>) -> Vec<Action> {
    let mut actions = Vec::new();

    let next_url = resolve_track_url(&next.audio, base);
    if let Some(url) = next_url
        && resolve_track_url(&prev.audio, base).as_deref() != Some(url.as_str())
    {
        actions.push(Action::Load(url));
    }

    if next.audio.tempo_multiplier.is_some()
        && next.audio.tempo_multiplier != prev.audio.tempo_multiplier
    {
        actions.push(Action::Tempo(tempo_multiplier(&next.audio)));
    }

    let prev_mod = prev.audio.modulation.as_ref();
    if let Some(modulation) = next.audio.modulation.as_ref() {
        let gain = modulation.gain;
        let cutoff_hz = modulation.filter_cutoff_hz;
        let changed = prev_mod.map(|m| (m.gain, m.filter_cutoff_hz)) != Some((gain, cutoff_hz));
        if changed && (gain.is_some() || cutoff_hz.is_some()) {
            actions.push(Action::Modulation { gain, cutoff_hz });
        }
    }

    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Modulation;

    fn base() -> Option<Url> {
        Url::parse("http://localhost:8000").ok()
    }

    fn with_audio(audio: AudioState) -> AuraState {
        AuraState {
            audio,
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_prefers_full_url() {
        let audio = AudioState {
            track_url: Some("/music_dna/a.wav".into()),
            full_track_url: Some("http://cdn.example/a.wav".into()),
            ..Default::default()
        };
        assert_eq!(
            resolve_track_url(&audio, base().as_ref()).as_deref(),
            Some("http://cdn.example/a.wav")
        );
    }

    #[test]
    fn test_resolve_relative_against_base() {
        let audio = AudioState {
            track_url: Some("/music_dna/a.wav".into()),
            full_track_url: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(
            resolve_track_url(&audio, base().as_ref()).as_deref(),
            Some("http://localhost:8000/music_dna/a.wav")
        );
        assert_eq!(resolve_track_url(&AudioState::default(), base().as_ref()), None);
    }

    #[test]
    fn test_resolve_without_base() {
        let relative = AudioState {
            track_url: Some("/music_dna/a.wav".into()),
            ..Default::default()
        };
        assert_eq!(resolve_track_url(&relative, None), None);

        let absolute = AudioState {
            track_url: Some("http://cdn.example/a.wav".into()),
            ..Default::default()
        };
        assert_eq!(
            resolve_track_url(&absolute, None).as_deref(),
            Some("http://cdn.example/a.wav")
        );
    }

    #[test]
    fn test_tempo_defaults() {
        let mut audio = AudioState::default();
        assert_eq!(tempo_multiplier(&audio), 1.0);
        audio.tempo_multiplier = Some(f64::NAN);
        assert_eq!(tempo_multiplier(&audio), 1.0);
        audio.tempo_multiplier = Some(1.3);
        assert_eq!(tempo_multiplier(&audio), 1.3);
    }

    #[test]
    fn test_diff_reports_only_changes() {
        let prev = with_audio(AudioState {
            tempo_multiplier: Some(1.1),
            track_url: Some("/a.wav".into()),
            modulation: Some(Modulation {
                gain: Some(0.8),
                ..Default::default()
            }),
            ..Default::default()
        });

        assert!(diff(&prev, &prev, base().as_ref()).is_empty());

        let mut next = prev.clone();
        next.audio.tempo_multiplier = Some(1.4);
        next.audio.modulation.as_mut().unwrap().filter_cutoff_hz = Some(900.0);
        assert_eq!(
            diff(&prev, &next, base().as_ref()),
            vec![
                Action::Tempo(1.4),
                Action::Modulation {
                    gain: Some(0.8),
                    cutoff_hz: Some(900.0)
                }
            ]
        );
    }

    #[test]
    fn test_diff_from_empty_state() {
        let next = with_audio(AudioState {
            track_url: Some("/music_dna/b.mp3".into()),
            tempo_multiplier: Some(0.9),
            ..Default::default()
        });

        assert_eq!(
            diff(&AuraState::default(), &next, base().as_ref()),
            vec![
                Action::Load("http://localhost:8000/music_dna/b.mp3".into()),
                Action::Tempo(0.9)
            ]
        );
    }

    #[test]
    fn test_cleared_state_schedules_nothing() {
        let prev = with_audio(AudioState {
            track_url: Some("/a.wav".into()),
            tempo_multiplier: Some(1.5),
            ..Default::default()
        });
        assert!(diff(&prev, &AuraState::default(), base().as_ref()).is_empty());
    }
}
