use anyhow::Result;

/// A fully decoded track with compile-time channel count and sample rate.
///
/// Samples are interleaved `f32` in `[-1.0, 1.0]`. The renderer indexes it one
/// frame at a time, so the length is always a whole number of frames.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackBuffer<const CHANNELS: usize, const SAMPLE_RATE: u32> {
    name: String,
    data: Vec<f32>,
}

impl<const CHANNELS: usize, const SAMPLE_RATE: u32> TrackBuffer<CHANNELS, SAMPLE_RATE> {
    /// Returns an error if the data length is not a multiple of the channel count.
    pub fn new(name: impl Into<String>, data: Vec<f32>) -> Result<Self> {
        if data.len() % CHANNELS != 0 {
            anyhow::bail!(
                "Data length {} must be a multiple of channels {}",
                data.len(),
                CHANNELS
            );
        }
        Ok(Self {
            name: name.into(),
            data,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.data.len() / CHANNELS
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The `CHANNELS` samples of frame `index`.
    pub fn frame(&self, index: usize) -> &[f32] {
        let start = index * CHANNELS;
        &self.data[start..start + CHANNELS]
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / SAMPLE_RATE as f64
    }

    #[cfg(test)]
    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_buffer_frames() {
        let track = TrackBuffer::<2, 48000>::new("t", vec![0.1, -0.1, 0.2, -0.2]).unwrap();

        assert_eq!(track.frames(), 2);
        assert_eq!(track.frame(1), &[0.2, -0.2]);
        assert_eq!(track.data().len(), 4);
        assert_eq!(track.name(), "t");
    }

    #[test]
    fn test_track_buffer_rejects_partial_frame() {
        assert!(TrackBuffer::<2, 48000>::new("t", vec![0.0; 3]).is_err());
    }

    #[test]
    fn test_duration() {
        let track = TrackBuffer::<2, 48000>::new("t", vec![0.0; 96000]).unwrap();
        assert!((track.duration_secs() - 1.0).abs() < 1e-9);
    }
}
