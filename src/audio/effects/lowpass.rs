//! Lowpass filter.

use super::Effect;
use crate::audio::ramp::LinearRamp;

/// Coefficients are recomputed this often while the cutoff is ramping.
const COEFF_INTERVAL: u32 = 32;

const Q: f32 = std::f32::consts::FRAC_1_SQRT_2;

#[derive(Debug, Clone, Copy, Default)]
struct Coefficients {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl Coefficients {
    fn lowpass(cutoff_hz: f32, sample_rate: f32) -> Self {
        let cutoff = cutoff_hz.clamp(10.0, sample_rate * 0.45);
        let w0 = std::f32::consts::TAU * cutoff / sample_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * Q);
        let a0 = 1.0 + alpha;
        Self {
            b0: (1.0 - cos) * 0.5 / a0,
            b1: (1.0 - cos) / a0,
            b2: (1.0 - cos) * 0.5 / a0,
            a1: -2.0 * cos / a0,
            a2: (1.0 - alpha) / a0,
        }
    }
}

/// Second-order Butterworth lowpass with a ramped cutoff.
///
/// Transposed direct form II, one state pair per channel.
pub struct Lowpass<const CHANNELS: usize, const SAMPLE_RATE: u32> {
    cutoff: LinearRamp,
    coeffs: Coefficients,
    state: [[f32; 2]; CHANNELS],
    since_update: u32,
}

impl<const CHANNELS: usize, const SAMPLE_RATE: u32> Lowpass<CHANNELS, SAMPLE_RATE> {
    pub fn new(cutoff_hz: f32) -> Self {
        Self {
            cutoff: LinearRamp::new(cutoff_hz),
            coeffs: Coefficients::lowpass(cutoff_hz, SAMPLE_RATE as f32),
            state: [[0.0; 2]; CHANNELS],
            since_update: 0,
        }
    }

    /// Ramps the cutoff to `cutoff_hz` over `frames` frames.
    pub fn set_target(&mut self, cutoff_hz: f32, frames: u32) {
        self.cutoff.retarget(cutoff_hz, frames);
        if frames == 0 {
            self.update_coefficients();
        }
    }

    #[cfg(test)]
    pub fn cutoff(&self) -> f32 {
        self.cutoff.value()
    }

    fn update_coefficients(&mut self) {
        self.coeffs = Coefficients::lowpass(self.cutoff.value(), SAMPLE_RATE as f32);
        self.since_update = 0;
    }
}

impl<const CHANNELS: usize, const SAMPLE_RATE: u32> Effect for Lowpass<CHANNELS, SAMPLE_RATE> {
    fn process(&mut self, block: &mut [f32]) {
        for frame in block.chunks_exact_mut(CHANNELS) {
            if self.cutoff.is_ramping() {
                self.cutoff.next();
                self.since_update += 1;
                if self.since_update >= COEFF_INTERVAL || !self.cutoff.is_ramping() {
                    self.update_coefficients();
                }
            }

            let c = self.coeffs;
            for (sample, [z1, z2]) in frame.iter_mut().zip(self.state.iter_mut()) {
                let x = *sample;
                let y = c.b0 * x + *z1;
                *z1 = c.b1 * x - c.a1 * y + *z2;
                *z2 = c.b2 * x - c.a2 * y;
                *sample = y;
            }
        }
    }

    fn reset(&mut self) {
        self.state = [[0.0; 2]; CHANNELS];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, frames: usize) -> Vec<f32> {
        (0..frames)
            .flat_map(|i| {
                let s = (i as f32 * freq * std::f32::consts::TAU / 48000.0).sin();
                [s, s]
            })
            .collect()
    }

    fn peak(block: &[f32]) -> f32 {
        block.iter().fold(0.0f32, |m, s| m.max(s.abs()))
    }

    #[test]
    fn test_passes_dc() {
        let mut filter = Lowpass::<2, 48000>::new(1000.0);
        let mut block = vec![0.5; 2 * 4800];
        filter.process(&mut block);

        let last = &block[block.len() - 2..];
        assert!((last[0] - 0.5).abs() < 1e-3);
        assert!((last[1] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_attenuates_above_cutoff() {
        let mut filter = Lowpass::<2, 48000>::new(500.0);
        let mut block = sine(8000.0, 4800);
        filter.process(&mut block);

        assert!(peak(&block[4800..]) < 0.05);
    }

    #[test]
    fn test_wide_open_passes_audio_band() {
        let mut filter = Lowpass::<2, 48000>::new(20000.0);
        let mut block = sine(1000.0, 4800);
        filter.process(&mut block);

        let p = peak(&block[4800..]);
        assert!(p > 0.95 && p < 1.05, "peak {p}");
    }

    #[test]
    fn test_cutoff_ramps_to_target() {
        let mut filter = Lowpass::<2, 48000>::new(5000.0);
        filter.set_target(1000.0, 12000);

        let mut block = vec![0.0; 2 * 6000];
        filter.process(&mut block);
        assert!((filter.cutoff() - 3000.0).abs() < 5.0);

        filter.process(&mut block);
        assert_eq!(filter.cutoff(), 1000.0);
    }
}
