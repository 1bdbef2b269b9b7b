//! Audio level metering.
//!
//! The real-time side is [`AnalysisTap`], which only pushes samples into a
//! lock-free ring. The [`TapReader`] on the engine side drains the ring into a
//! sliding window and computes levels from there.

use rtrb::{Consumer, Producer, RingBuffer};

use super::Effect;

/// Samples in the measurement window.
pub const WINDOW: usize = 2048;

/// Amplitude floor, so silence reads as -160 dB instead of `-inf`.
const AMPLITUDE_FLOOR: f32 = 1e-8;

pub const FLOOR_DB: f32 = -160.0;

/// RMS level of `samples` in dBFS, floored at [`FLOOR_DB`].
pub fn calculate_rms_db(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return FLOOR_DB;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    let rms = (sum_sq / samples.len() as f64).sqrt() as f32;
    if rms <= AMPLITUDE_FLOOR {
        return FLOOR_DB;
    }
    (20.0 * rms.log10()).max(FLOOR_DB)
}

/// Creates a connected tap and reader. `capacity` is in mono samples.
pub fn analysis_tap<const CHANNELS: usize>(capacity: usize) -> (AnalysisTap<CHANNELS>, TapReader) {
    let (producer, consumer) = RingBuffer::new(capacity);
    (
        AnalysisTap { producer },
        TapReader {
            consumer,
            window: vec![0.0; WINDOW],
            write: 0,
            filled: 0,
        },
    )
}

/// Pass-through effect that feeds a mono down-mix to the loudness monitor.
///
/// When the reader falls behind, new samples are dropped.
pub struct AnalysisTap<const CHANNELS: usize> {
    producer: Producer<f32>,
}

impl<const CHANNELS: usize> Effect for AnalysisTap<CHANNELS> {
    fn process(&mut self, block: &mut [f32]) {
        for frame in block.chunks_exact(CHANNELS) {
            let mono = frame.iter().sum::<f32>() / CHANNELS as f32;
            if self.producer.push(mono).is_err() {
                break;
            }
        }
    }

    fn reset(&mut self) {}
}

pub struct TapReader {
    consumer: Consumer<f32>,
    window: Vec<f32>,
    write: usize,
    filled: usize,
}

impl TapReader {
    /// Moves everything the tap has produced into the window.
    pub fn drain(&mut self) -> usize {
        let mut count = 0;
        while let Ok(sample) = self.consumer.pop() {
            self.window[self.write] = sample;
            self.write = (self.write + 1) % WINDOW;
            self.filled = (self.filled + 1).min(WINDOW);
            count += 1;
        }
        count
    }

    /// Level of the current window in dBFS.
    pub fn level_db(&self) -> f32 {
        calculate_rms_db(&self.window[..self.filled])
    }

    /// Empties the window, e.g. when the track changes.
    pub fn clear(&mut self) {
        while self.consumer.pop().is_ok() {}
        self.write = 0;
        self.filled = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms_db_of_full_scale_square() {
        let samples = [1.0, -1.0, 1.0, -1.0];
        assert!(calculate_rms_db(&samples).abs() < 1e-4);

        let half = [0.5; 16];
        assert!((calculate_rms_db(&half) + 6.0206).abs() < 1e-3);
    }

    #[test]
    fn test_silence_hits_floor() {
        assert_eq!(calculate_rms_db(&[0.0; 64]), FLOOR_DB);
        assert_eq!(calculate_rms_db(&[]), FLOOR_DB);
        assert!(calculate_rms_db(&[0.0; 64]).is_finite());
    }

    #[test]
    fn test_tap_downmixes_and_passes_through() {
        let (mut tap, mut reader) = analysis_tap::<2>(16);
        let mut block = vec![0.2, 0.4, 0.2, 0.4];
        tap.process(&mut block);

        assert_eq!(block, vec![0.2, 0.4, 0.2, 0.4]);
        assert_eq!(reader.drain(), 2);
        let expected = 20.0 * 0.3f32.log10();
        assert!((reader.level_db() - expected).abs() < 1e-3);
    }

    #[test]
    fn test_full_ring_drops_samples() {
        let (mut tap, mut reader) = analysis_tap::<2>(4);
        let mut block = vec![0.1; 2 * 10];
        tap.process(&mut block);
        assert_eq!(reader.drain(), 4);
    }

    #[test]
    fn test_window_keeps_latest_samples() {
        let (mut tap, mut reader) = analysis_tap::<1>(WINDOW * 2);
        let mut loud = vec![1.0; WINDOW];
        tap.process(&mut loud);
        let mut quiet = vec![0.0; WINDOW];
        tap.process(&mut quiet);

        reader.drain();
        assert_eq!(reader.level_db(), FLOOR_DB);

        reader.clear();
        assert_eq!(reader.level_db(), FLOOR_DB);
    }
}
