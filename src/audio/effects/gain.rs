//! Gain (volume) effect.

use super::Effect;
use crate::audio::ramp::LinearRamp;

/// Applies a ramped gain factor to every sample of a frame.
pub struct Gain<const CHANNELS: usize> {
    factor: LinearRamp,
}

impl<const CHANNELS: usize> Gain<CHANNELS> {
    pub fn new(factor: f32) -> Self {
        Self {
            factor: LinearRamp::new(factor),
        }
    }

    /// Ramps the factor to `factor` over `frames` frames.
    pub fn set_target(&mut self, factor: f32, frames: u32) {
        self.factor.retarget(factor, frames);
    }

    #[cfg(test)]
    pub fn factor(&self) -> f32 {
        self.factor.value()
    }
}

impl<const CHANNELS: usize> Effect for Gain<CHANNELS> {
    fn process(&mut self, block: &mut [f32]) {
        if !self.factor.is_ramping() {
            let factor = self.factor.value();
            for sample in block.iter_mut() {
                *sample *= factor;
            }
            return;
        }
        for frame in block.chunks_exact_mut(CHANNELS) {
            let factor = self.factor.next();
            for sample in frame {
                *sample *= factor;
            }
        }
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_gain() {
        let mut gain = Gain::<2>::new(0.5);
        let mut block = vec![1.0, -1.0, 0.4, -0.4];
        gain.process(&mut block);
        assert_eq!(block, vec![0.5, -0.5, 0.2, -0.2]);
    }

    #[test]
    fn test_ramp_is_monotonic_and_lands() {
        let mut gain = Gain::<2>::new(1.0);
        gain.set_target(0.0, 12000);

        let mut block = vec![1.0; 2 * 12000];
        gain.process(&mut block);

        assert!(block.windows(2).all(|w| w[1] <= w[0]));
        assert_eq!(block[block.len() - 1], 0.0);
        assert_eq!(gain.factor(), 0.0);
    }
}
