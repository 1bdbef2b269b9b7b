//! Signal chain effects.
//!
//! Every effect processes an interleaved `f32` block in place:
//!
//! - [`Lowpass`] - Ramped biquad lowpass filter
//! - [`Gain`] - Ramped gain stage
//! - [`AnalysisTap`] - Mono down-mix feed for the loudness monitor

pub mod gain;
pub mod level_meter;
pub mod lowpass;

pub use gain::Gain;
pub use level_meter::{AnalysisTap, TapReader, analysis_tap, calculate_rms_db};
pub use lowpass::Lowpass;

pub trait Effect {
    /// Processes an interleaved block in place.
    fn process(&mut self, block: &mut [f32]);

    /// Clears internal state.
    fn reset(&mut self);
}
