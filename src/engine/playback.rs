//! The playback engine.
//!
//! [`PlaybackEngine`] owns everything on the control side of the signal chain:
//! the output stream, the shared [`PlayerControls`], the loudness monitor, the
//! auto-boost loop and the retry ladder. All of its methods run on the session
//! event loop and take the current time explicitly, so timer-driven behaviour
//! is deterministic under test.
//!
//! The processed graph is built on the first user start. Until then, and for
//! the rest of the session if the device cannot host the graph, only the
//! element volume (and tempo) are applied.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::boost::AutoBoostController;
use super::config::PlayerConfig;
use super::driver::Action;
use super::error::PlayerError;
use super::loader::{LoadOutcome, TrackLoader};
use super::loudness::{LoudnessMonitor, MeterSchedule};
use super::retry::{LadderState, RetryLadder};
use super::status::PlayerStatus;
use crate::audio::effects::analysis_tap;
use crate::audio::effects::level_meter::{FLOOR_DB, WINDOW};
use crate::audio::{CHANNELS, PlayerControls, Renderer};
use crate::io::{AudioBackend, OutputStream};
use crate::state::AuraState;

pub const MIN_TEMPO: f64 = 0.5;
pub const MAX_TEMPO: f64 = 2.0;

pub const DEFAULT_GAIN: f64 = 1.0;
pub const DEFAULT_CUTOFF_HZ: f64 = 5000.0;
pub const MIN_CUTOFF_HZ: f64 = 20.0;
pub const MAX_CUTOFF_HZ: f64 = 20000.0;

/// Room for several meter ticks of mono samples.
const TAP_CAPACITY: usize = WINDOW * 8;

/// Clamps a tempo multiplier to the playable range. Non-finite input means 1.0.
pub fn clamp_tempo(multiplier: f64) -> f64 {
    if multiplier.is_finite() {
        multiplier.clamp(MIN_TEMPO, MAX_TEMPO)
    } else {
        1.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GraphState {
    NotBuilt,
    Built,
    /// The device refused the graph; raw playback for the rest of the session.
    Degraded,
}

pub struct PlaybackEngine<B: AudioBackend, L: TrackLoader> {
    backend: B,
    loader: L,
    controls: Arc<PlayerControls>,
    output: Option<Box<dyn OutputStream>>,
    unlock_guard: Option<Box<dyn OutputStream>>,
    tone_guard: Option<Box<dyn OutputStream>>,
    graph: GraphState,
    monitor: Option<LoudnessMonitor>,
    meter: MeterSchedule,
    boost: AutoBoostController,
    ladder: RetryLadder,

    requested_url: Option<String>,
    load_generation: u64,
    track_name: Option<String>,
    ready: bool,
    user_started: bool,
    playing: bool,

    bypassed: bool,
    volume: f64,
    mod_gain: f64,
    mod_cutoff_hz: f64,
    tempo: f64,
    error: Option<PlayerError>,
}

impl<B: AudioBackend, L: TrackLoader> PlaybackEngine<B, L> {
    pub fn new(backend: B, loader: L, config: &PlayerConfig) -> Self {
        let volume = config.initial_volume.clamp(0.0, 1.0);
        Self {
            backend,
            loader,
            controls: Arc::new(PlayerControls::new(DEFAULT_GAIN, DEFAULT_CUTOFF_HZ, volume)),
            output: None,
            unlock_guard: None,
            tone_guard: None,
            graph: GraphState::NotBuilt,
            monitor: None,
            meter: MeterSchedule::new(config.meter_interval),
            boost: AutoBoostController::new(),
            ladder: RetryLadder::new(),
            requested_url: None,
            load_generation: 0,
            track_name: None,
            ready: false,
            user_started: false,
            playing: false,
            bypassed: false,
            volume,
            mod_gain: DEFAULT_GAIN,
            mod_cutoff_hz: DEFAULT_CUTOFF_HZ,
            tempo: 1.0,
            error: None,
        }
    }

    pub fn apply(&mut self, action: Action, now: Instant) {
        match action {
            Action::Load(url) => self.load(&url, now),
            Action::Tempo(multiplier) => self.set_tempo(multiplier),
            Action::Modulation { gain, cutoff_hz } => self.apply_modulation(gain, cutoff_hz),
        }
    }

    /// Switches to `url`. Loading the URL that is already loaded or in flight
    /// does nothing.
    pub fn load(&mut self, url: &str, now: Instant) {
        if self.requested_url.as_deref() == Some(url) {
            debug!("Track {url} already requested");
            return;
        }

        info!("Loading track {url}");
        self.requested_url = Some(url.to_string());
        self.load_generation += 1;
        self.ready = false;
        self.error = None;
        self.track_name = None;
        self.playing = false;
        self.controls.set_playing(false);
        self.controls.set_track(None);
        self.ladder.reset();
        self.unlock_guard = None;
        self.boost.reset();
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.clear();
        }
        self.update_metering(now);
        self.push_targets();

        self.loader.request(url, self.load_generation);
    }

    pub fn on_track_loaded(&mut self, outcome: LoadOutcome, now: Instant) {
        if outcome.generation != self.load_generation {
            debug!(
                "Discarding stale load of {} (generation {}, current {})",
                outcome.url, outcome.generation, self.load_generation
            );
            return;
        }

        match outcome.result {
            Ok(track) => {
                info!("Track ready: {}", track.name());
                self.track_name = Some(track.name().to_string());
                self.controls.set_track(Some(track));
                self.ready = true;
                if self.user_started {
                    self.play(now);
                }
            }
            Err(e) => {
                error!("{}", e);
                self.error = Some(e);
            }
        }
    }

    /// The user gesture. Builds the graph on first use and starts playback,
    /// or remembers the request until a track is ready.
    pub fn start(&mut self, now: Instant) {
        self.user_started = true;
        self.ensure_output();

        if self.playing {
            return;
        }
        if !self.ready {
            info!("Start requested, waiting for a track");
            return;
        }
        self.play(now);
    }

    /// Manual play that bypasses the retry ladder. Makes exactly one attempt.
    pub fn force_play(&mut self, now: Instant) -> Result<(), PlayerError> {
        self.user_started = true;
        self.ensure_output();

        if !self.ready {
            return Err(PlayerError::PlaybackBlocked("no track is ready".into()));
        }
        match self.attempt_play() {
            Ok(()) => {
                self.on_playing(now);
                Ok(())
            }
            Err(e) => {
                warn!("Forced play failed: {}", e);
                Err(e)
            }
        }
    }

    pub fn pause(&mut self, now: Instant) {
        if let Some(output) = self.output.as_mut()
            && let Err(e) = output.pause()
        {
            warn!("Failed to pause output: {}", e);
        }
        if self.playing {
            info!("Playback paused");
        }
        self.playing = false;
        self.controls.set_playing(false);
        self.boost.cancel();
        self.update_metering(now);
    }

    /// Varispeed playback rate, applied immediately.
    pub fn set_tempo(&mut self, multiplier: f64) {
        let tempo = clamp_tempo(multiplier);
        if tempo != multiplier {
            debug!("Tempo {multiplier} clamped to {tempo}");
        }
        self.tempo = tempo;
        self.controls.set_rate(tempo);
    }

    /// New modulation targets. `None`, non-finite and negative values keep
    /// the current target.
    pub fn apply_modulation(&mut self, gain: Option<f64>, cutoff_hz: Option<f64>) {
        if let Some(gain) = gain {
            if gain.is_finite() && gain >= 0.0 {
                self.mod_gain = gain;
            } else {
                warn!("Rejecting modulation gain {gain}");
            }
        }
        if let Some(cutoff) = cutoff_hz {
            if cutoff.is_finite() && cutoff >= 0.0 {
                self.mod_cutoff_hz = cutoff.clamp(MIN_CUTOFF_HZ, MAX_CUTOFF_HZ);
            } else {
                warn!("Rejecting filter cutoff {cutoff}");
            }
        }
        self.push_targets();
    }

    /// Plays the reference tone on its own stream. Track playback is untouched.
    pub fn play_tone(&mut self) -> Result<(), PlayerError> {
        self.tone_guard = None;
        self.tone_guard = Some(self.backend.reference_tone()?);
        Ok(())
    }

    pub fn set_bypass(&mut self, on: bool) {
        if self.bypassed == on {
            return;
        }
        info!("Bypass {}", if on { "on" } else { "off" });
        self.bypassed = on;
        if on {
            self.boost.cancel();
        }
        self.push_targets();
    }

    pub fn set_volume(&mut self, level: f64) {
        if !level.is_finite() {
            warn!("Rejecting volume {level}");
            return;
        }
        self.volume = level.clamp(0.0, 1.0);
        self.push_targets();
    }

    /// The gain stage target: user volume only while bypassed, otherwise
    /// modulation gain times volume times boost.
    fn graph_gain(&self) -> f64 {
        if self.bypassed {
            self.volume
        } else {
            self.mod_gain * self.volume * self.boost.boost() as f64
        }
    }

    fn graph_cutoff(&self) -> f64 {
        if self.bypassed {
            MAX_CUTOFF_HZ
        } else {
            self.mod_cutoff_hz
        }
    }

    pub fn effective_gain(&self) -> f64 {
        match self.graph {
            GraphState::Built => self.graph_gain(),
            GraphState::NotBuilt | GraphState::Degraded => self.volume,
        }
    }

    fn push_targets(&mut self) {
        self.controls
            .set_targets(self.graph_gain(), self.graph_cutoff());
        if self.graph != GraphState::Built {
            self.controls.set_element_volume(self.volume);
        }
    }

    fn ensure_output(&mut self) {
        if self.output.is_some() {
            return;
        }

        if self.graph == GraphState::NotBuilt {
            let (tap, reader) = analysis_tap::<CHANNELS>(TAP_CAPACITY);
            let renderer = Renderer::graph(self.controls.clone(), tap);
            match self.backend.open_graph(renderer) {
                Ok(stream) => {
                    info!("Audio graph built");
                    self.graph = GraphState::Built;
                    self.monitor = Some(LoudnessMonitor::new(reader));
                    self.controls.set_element_volume(1.0);
                    self.output = Some(stream);
                    return;
                }
                Err(e) => {
                    warn!("{}, falling back to raw playback", e);
                    self.graph = GraphState::Degraded;
                    self.controls.set_element_volume(self.volume);
                }
            }
        }

        match self.backend.open_raw(self.controls.clone()) {
            Ok(stream) => self.output = Some(stream),
            Err(e) => {
                error!("No audio output: {}", e);
                self.error = Some(e);
            }
        }
    }

    /// One play attempt. A missing output (the device refused to open) is
    /// reopened first, so ladder retries can recover from a transient failure.
    fn attempt_play(&mut self) -> Result<(), PlayerError> {
        self.ensure_output();
        let output = self
            .output
            .as_mut()
            .ok_or_else(|| PlayerError::PlaybackBlocked("no audio output".into()))?;
        output.play()
    }

    /// First play attempt of a start. A rejection enters the retry ladder.
    fn play(&mut self, now: Instant) {
        match self.attempt_play() {
            Ok(()) => self.on_playing(now),
            Err(e) => {
                warn!("{}", e);
                self.ladder.rejected(now);
                if self.ladder.state() == LadderState::Blocked {
                    match self.backend.unlock() {
                        Ok(guard) => self.unlock_guard = Some(guard),
                        Err(e) => debug!("Unlock tone failed: {}", e),
                    }
                    self.ladder.arm();
                }
            }
        }
    }

    fn on_playing(&mut self, now: Instant) {
        if !self.playing {
            info!("Playback started");
        }
        self.playing = true;
        self.error = None;
        self.controls.set_playing(true);
        self.ladder.succeeded();
        self.unlock_guard = None;
        self.update_metering(now);
    }

    fn update_metering(&mut self, now: Instant) {
        let should_run =
            self.graph == GraphState::Built && self.user_started && self.ready && self.playing;
        if should_run {
            if !self.meter.is_running() {
                debug!("Metering started");
            }
            self.meter.start(now);
        } else if self.meter.is_running() {
            debug!("Metering stopped");
            self.meter.stop();
        }
    }

    fn boost_active(&self) -> bool {
        self.graph == GraphState::Built && self.user_started && self.playing && !self.bypassed
    }

    /// The earliest pending timer: a ladder retry or a meter tick.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.ladder.deadline(), self.meter.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn on_deadline(&mut self, now: Instant) {
        if let Some(attempt) = self.ladder.take_due(now) {
            self.retry(attempt, now);
        }

        if self.meter.due(now) {
            self.meter.advance(now);
            self.meter_tick(now);
        }
    }

    fn retry(&mut self, attempt: u8, now: Instant) {
        if self.playing {
            self.ladder.succeeded();
            return;
        }
        info!("Retrying playback (retry {})", attempt);
        match self.attempt_play() {
            Ok(()) => self.on_playing(now),
            Err(e) => {
                self.ladder.attempt_failed();
                if self.ladder.state() == LadderState::Failed {
                    warn!("Playback still blocked, giving up until forced: {}", e);
                    self.unlock_guard = None;
                    self.error = Some(e);
                }
            }
        }
    }

    fn meter_tick(&mut self, now: Instant) {
        let Some(level) = self.monitor.as_mut().and_then(|m| m.tick()) else {
            return;
        };
        if self.boost_active() && self.boost.observe(level, now).is_some() {
            self.push_targets();
        }
    }

    pub fn status(&self, aura: &AuraState, connected: bool) -> PlayerStatus {
        let audio = &aura.audio;
        let modulation = audio.modulation.as_ref();
        PlayerStatus {
            track_name: self
                .track_name
                .clone()
                .or_else(|| audio.current_track.clone()),
            base_tempo: audio.base_tempo,
            target_tempo_bpm: audio.tempo_bpm,
            tempo_multiplier: self.tempo,
            primary_emotion: audio.primary_emotion.clone(),
            face_frame_bytes: aura.source_data.face_frame.as_ref().map(|f| f.jpeg.len()),
            mod_gain: modulation.and_then(|m| m.gain),
            mod_cutoff_hz: modulation.and_then(|m| m.filter_cutoff_hz),
            effective_gain: self.effective_gain(),
            loudness_db: self
                .monitor
                .as_ref()
                .map(|m| m.last_db())
                .unwrap_or(FLOOR_DB),
            boost: self.boost.boost(),
            ready: self.ready,
            bypassed: self.bypassed,
            connected,
            playing: self.playing,
            degraded: self.graph == GraphState::Degraded,
            error: self.error.as_ref().map(|e| e.to_string()),
        }
    }

    /// Stops metering and releases the output streams.
    pub fn shutdown(&mut self) {
        info!("Shutting down playback engine");
        self.meter.stop();
        if let Some(mut output) = self.output.take()
            && let Err(e) = output.pause()
        {
            debug!("Pause on shutdown failed: {}", e);
        }
        self.unlock_guard = None;
        self.tone_guard = None;
        self.playing = false;
        self.controls.set_playing(false);
        self.controls.set_track(None);
    }
}

#[cfg(test)]
impl<B: AudioBackend, L: TrackLoader> PlaybackEngine<B, L> {
    pub fn controls(&self) -> &Arc<PlayerControls> {
        &self.controls
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn ladder_state(&self) -> LadderState {
        self.ladder.state()
    }

    pub fn boost(&self) -> f32 {
        self.boost.boost()
    }

    pub fn tempo(&self) -> f64 {
        self.tempo
    }
}
