//! Makeup gain for sustained inaudibility.
//!
//! A level at or below [`QUIET_THRESHOLD_DB`] opens a dwell window; once the
//! window has lasted [`DWELL`] the boost is multiplied by [`BOOST_STEP`] (up
//! to [`MAX_BOOST`]) and a new window begins. Any louder sample closes the
//! window. The boost never goes down on its own.

use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

pub const QUIET_THRESHOLD_DB: f32 = -50.0;
pub const DWELL: Duration = Duration::from_millis(3000);
pub const BOOST_STEP: f32 = 1.5;
pub const MAX_BOOST: f32 = 4.0;

#[derive(Debug, Clone)]
pub struct AutoBoostController {
    boost: f32,
    below_since: Option<Instant>,
}

impl Default for AutoBoostController {
    fn default() -> Self {
        Self::new()
    }
}

impl AutoBoostController {
    pub fn new() -> Self {
        Self {
            boost: 1.0,
            below_since: None,
        }
    }

    pub fn boost(&self) -> f32 {
        self.boost
    }

    /// Feeds one level sample. Returns the new boost when it changed.
    pub fn observe(&mut self, level_db: f32, now: Instant) -> Option<f32> {
        if level_db > QUIET_THRESHOLD_DB {
            self.below_since = None;
            return None;
        }

        let since = *self.below_since.get_or_insert(now);
        if now.duration_since(since) < DWELL {
            return None;
        }

        self.below_since = Some(now);
        if self.boost >= MAX_BOOST {
            return None;
        }

        self.boost = (self.boost * BOOST_STEP).min(MAX_BOOST);
        info!(
            "Output quiet for {:?} at {:.1} dB, boost now {:.2}",
            DWELL, level_db, self.boost
        );
        Some(self.boost)
    }

    /// Closes the dwell window without touching the boost.
    pub fn cancel(&mut self) {
        self.below_since = None;
    }

    pub fn reset(&mut self) {
        self.boost = 1.0;
        self.below_since = None;
    }
}
