//! Loudness metering on a fixed tick.

use std::time::Duration;

use tokio::time::Instant;

use crate::audio::effects::TapReader;
use crate::audio::effects::level_meter::FLOOR_DB;

/// Reads the renderer's analysis tap and keeps the latest level.
pub struct LoudnessMonitor {
    reader: TapReader,
    last_db: f32,
    primed: bool,
}

impl LoudnessMonitor {
    pub fn new(reader: TapReader) -> Self {
        Self {
            reader,
            last_db: FLOOR_DB,
            primed: false,
        }
    }

    /// Drains the tap and re-measures the window.
    ///
    /// Returns `None` until the tap has produced its first samples, so a
    /// device that has not started pulling audio is not mistaken for silence.
    pub fn tick(&mut self) -> Option<f32> {
        if self.reader.drain() > 0 {
            self.primed = true;
        }
        if !self.primed {
            return None;
        }
        self.last_db = self.reader.level_db();
        Some(self.last_db)
    }

    pub fn last_db(&self) -> f32 {
        self.last_db
    }

    /// Forgets the old track's audio.
    pub fn clear(&mut self) {
        self.reader.clear();
        self.last_db = FLOOR_DB;
        self.primed = false;
    }
}

/// A cancellable periodic deadline.
#[derive(Debug, Clone)]
pub struct MeterSchedule {
    period: Duration,
    next: Option<Instant>,
}

impl MeterSchedule {
    pub fn new(period: Duration) -> Self {
        Self { period, next: None }
    }

    /// Starts ticking one period from `now`. No effect when already running.
    pub fn start(&mut self, now: Instant) {
        if self.next.is_none() {
            self.next = Some(now + self.period);
        }
    }

    pub fn stop(&mut self) {
        self.next = None;
    }

    pub fn is_running(&self) -> bool {
        self.next.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.next
    }

    pub fn due(&self, now: Instant) -> bool {
        self.next.is_some_and(|next| next <= now)
    }

    /// Schedules the next tick. Missed ticks are skipped, not replayed.
    pub fn advance(&mut self, now: Instant) {
        if let Some(next) = self.next {
            let mut following = next + self.period;
            if following <= now {
                following = now + self.period;
            }
            self.next = Some(following);
        }
    }
}
