//! Real-time rendering of the signal chain.
//!
//! [`PlayerControls`] is the only state shared between the engine and the
//! output device callback. Every field is an atomic (floats are stored as
//! `f64` bits) or an [`ArcSwapOption`], so the callback never blocks.
//!
//! [`Renderer`] runs inside the callback: it pulls frames from the current
//! track with varispeed interpolation, runs them through the chain
//! `lowpass → gain → analysis tap` (when the processed graph is active) and
//! applies the element volume. Output is soft-clipped to `[-1, 1]`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use arc_swap::ArcSwapOption;
use dasp_sample::{FromSample, Sample};

use super::effects::{AnalysisTap, Effect, Gain, Lowpass};
use super::{CHANNELS, SAMPLE_RATE, Track};

/// Length of every gain and cutoff ramp.
pub const RAMP_MS: u32 = 250;
pub const RAMP_FRAMES: u32 = SAMPLE_RATE / 1000 * RAMP_MS;

/// Level above which [`soft_clip`] starts compressing.
const CLIP_KNEE: f32 = 0.9;

/// Passes `[-CLIP_KNEE, CLIP_KNEE]` unchanged and bends everything beyond it
/// smoothly toward full scale, so boosted output never exceeds `[-1, 1]`.
#[inline]
pub fn soft_clip(sample: f32) -> f32 {
    let magnitude = sample.abs();
    if magnitude <= CLIP_KNEE {
        return sample;
    }
    let headroom = 1.0 - CLIP_KNEE;
    let bent = CLIP_KNEE + headroom * ((magnitude - CLIP_KNEE) / headroom).tanh();
    bent.copysign(sample)
}

pub struct PlayerControls {
    track: ArcSwapOption<Track>,
    track_generation: AtomicU64,
    playing: AtomicBool,
    rate: AtomicU64,
    element_volume: AtomicU64,
    gain_target: AtomicU64,
    cutoff_target: AtomicU64,
    target_generation: AtomicU64,
}

impl PlayerControls {
    pub fn new(gain: f64, cutoff_hz: f64, element_volume: f64) -> Self {
        Self {
            track: ArcSwapOption::empty(),
            track_generation: AtomicU64::new(0),
            playing: AtomicBool::new(false),
            rate: AtomicU64::new(1f64.to_bits()),
            element_volume: AtomicU64::new(element_volume.to_bits()),
            gain_target: AtomicU64::new(gain.to_bits()),
            cutoff_target: AtomicU64::new(cutoff_hz.to_bits()),
            target_generation: AtomicU64::new(0),
        }
    }

    /// Swaps the playing track. Playback restarts from the first frame.
    pub fn set_track(&self, track: Option<Arc<Track>>) {
        self.track.store(track);
        self.track_generation.fetch_add(1, Ordering::AcqRel);
    }

    #[cfg(test)]
    pub fn has_track(&self) -> bool {
        self.track.load().is_some()
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Release);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn set_rate(&self, rate: f64) {
        self.rate.store(rate.to_bits(), Ordering::Release);
    }

    pub fn rate(&self) -> f64 {
        f64::from_bits(self.rate.load(Ordering::Acquire))
    }

    pub fn set_element_volume(&self, volume: f64) {
        self.element_volume.store(volume.to_bits(), Ordering::Release);
    }

    pub fn element_volume(&self) -> f64 {
        f64::from_bits(self.element_volume.load(Ordering::Acquire))
    }

    /// Publishes new ramp targets. The renderer restarts both ramps from
    /// their current values.
    pub fn set_targets(&self, gain: f64, cutoff_hz: f64) {
        self.gain_target.store(gain.to_bits(), Ordering::Release);
        self.cutoff_target.store(cutoff_hz.to_bits(), Ordering::Release);
        self.target_generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn targets(&self) -> (f64, f64) {
        (
            f64::from_bits(self.gain_target.load(Ordering::Acquire)),
            f64::from_bits(self.cutoff_target.load(Ordering::Acquire)),
        )
    }
}

/// The processed part of the chain, present only in graph mode.
pub struct SignalChain {
    filter: Lowpass<CHANNELS, SAMPLE_RATE>,
    gain: Gain<CHANNELS>,
    tap: AnalysisTap<CHANNELS>,
}

impl SignalChain {
    fn process(&mut self, block: &mut [f32]) {
        self.filter.process(block);
        self.gain.process(block);
        self.tap.process(block);
    }
}

pub struct Renderer {
    controls: Arc<PlayerControls>,
    track: Option<Arc<Track>>,
    track_generation: u64,
    target_generation: u64,
    position: f64,
    /// Track frames per device frame at rate 1.0.
    step_scale: f64,
    out_channels: usize,
    chain: Option<SignalChain>,
    scratch: Vec<f32>,
    converted: Vec<f32>,
}

impl Renderer {
    /// Full processed chain at the native rate and channel count.
    pub fn graph(controls: Arc<PlayerControls>, tap: AnalysisTap<CHANNELS>) -> Self {
        let (gain, cutoff) = controls.targets();
        let chain = SignalChain {
            filter: Lowpass::new(cutoff as f32),
            gain: Gain::new(gain as f32),
            tap,
        };
        Self::new(controls, SAMPLE_RATE, CHANNELS, Some(chain))
    }

    /// Plain varispeed playback with element volume only, at any device
    /// rate and channel count.
    pub fn raw(controls: Arc<PlayerControls>, device_rate: u32, out_channels: usize) -> Self {
        Self::new(controls, device_rate, out_channels, None)
    }

    fn new(
        controls: Arc<PlayerControls>,
        device_rate: u32,
        out_channels: usize,
        chain: Option<SignalChain>,
    ) -> Self {
        let target_generation = controls.target_generation.load(Ordering::Acquire);
        Self {
            controls,
            track: None,
            track_generation: u64::MAX,
            target_generation,
            position: 0.0,
            step_scale: SAMPLE_RATE as f64 / device_rate.max(1) as f64,
            out_channels: out_channels.max(1),
            chain,
            scratch: Vec::new(),
            converted: Vec::new(),
        }
    }

    fn sync(&mut self) {
        let generation = self.controls.track_generation.load(Ordering::Acquire);
        if generation != self.track_generation {
            self.track_generation = generation;
            self.track = self.controls.track.load_full();
            self.position = 0.0;
            if let Some(chain) = self.chain.as_mut() {
                chain.filter.reset();
            }
        }

        let generation = self.controls.target_generation.load(Ordering::Acquire);
        if generation != self.target_generation {
            self.target_generation = generation;
            let (gain, cutoff) = self.controls.targets();
            if let Some(chain) = self.chain.as_mut() {
                chain.gain.set_target(gain as f32, RAMP_FRAMES);
                chain.filter.set_target(cutoff as f32, RAMP_FRAMES);
            }
        }
    }

    /// Fills an interleaved `f32` device buffer.
    pub fn render(&mut self, out: &mut [f32]) {
        self.sync();

        let track = match &self.track {
            Some(track) if !track.is_empty() && self.controls.is_playing() => track.clone(),
            _ => {
                out.fill(0.0);
                return;
            }
        };

        let frames = out.len() / self.out_channels;
        self.scratch.resize(frames * CHANNELS, 0.0);

        let step = self.controls.rate() * self.step_scale;
        let len = track.frames();
        for frame in self.scratch.chunks_exact_mut(CHANNELS) {
            let index = self.position as usize;
            let frac = (self.position - index as f64) as f32;
            let a = track.frame(index % len);
            let b = track.frame((index + 1) % len);
            for ((slot, &a), &b) in frame.iter_mut().zip(a).zip(b) {
                *slot = a + (b - a) * frac;
            }
            self.position += step;
            if self.position >= len as f64 {
                self.position %= len as f64;
            }
        }

        if let Some(chain) = self.chain.as_mut() {
            chain.process(&mut self.scratch);
        }

        let volume = self.controls.element_volume() as f32;
        for (out_frame, frame) in out
            .chunks_exact_mut(self.out_channels)
            .zip(self.scratch.chunks_exact(CHANNELS))
        {
            for (ch, slot) in out_frame.iter_mut().enumerate() {
                *slot = soft_clip(frame[ch % CHANNELS] * volume);
            }
        }
    }

    /// Fills a device buffer of any supported sample format.
    pub fn render_as<S: Sample + FromSample<f32>>(&mut self, out: &mut [S]) {
        let mut converted = std::mem::take(&mut self.converted);
        converted.resize(out.len(), 0.0);
        self.render(&mut converted);
        for (slot, &value) in out.iter_mut().zip(converted.iter()) {
            *slot = S::from_sample(value);
        }
        self.converted = converted;
    }
}
