//! Bounded recovery from a rejected play.
//!
//! ```text
//! Idle ──reject──► Blocked ──arm──► Retrying(1) ──fail──► Retrying(2) ──fail──► Failed
//!                                        └──────ok──────────────┴──────ok──────► Playing
//! ```
//!
//! Both retries are scheduled relative to the initial attempt, so the ladder
//! makes at most three play attempts in total.

use std::time::Duration;

use tokio::time::Instant;

/// Delay of each retry after the initial rejected attempt.
const RETRY_OFFSETS: [Duration; 2] = [Duration::from_millis(100), Duration::from_millis(1000)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LadderState {
    Idle,
    Blocked,
    Retrying { attempt: u8 },
    Playing,
    Failed,
}

#[derive(Debug, Clone)]
pub struct RetryLadder {
    state: LadderState,
    started: Option<Instant>,
}

impl Default for RetryLadder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryLadder {
    pub fn new() -> Self {
        Self {
            state: LadderState::Idle,
            started: None,
        }
    }

    pub fn state(&self) -> LadderState {
        self.state
    }

    /// The initial play attempt at `now` was rejected.
    ///
    /// Ignored unless the ladder is idle; a running or exhausted ladder is
    /// never restarted by another rejection.
    pub fn rejected(&mut self, now: Instant) {
        if self.state == LadderState::Idle {
            self.state = LadderState::Blocked;
            self.started = Some(now);
        }
    }

    /// Schedules the retries once the unlock step has run.
    pub fn arm(&mut self) {
        if self.state == LadderState::Blocked {
            self.state = LadderState::Retrying { attempt: 1 };
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        match (self.state, self.started) {
            (LadderState::Retrying { attempt }, Some(started)) => {
                Some(started + RETRY_OFFSETS[(attempt - 1) as usize])
            }
            _ => None,
        }
    }

    /// Returns the retry that is due at `now`, if any.
    pub fn take_due(&self, now: Instant) -> Option<u8> {
        match (self.state, self.deadline()) {
            (LadderState::Retrying { attempt }, Some(deadline)) if deadline <= now => Some(attempt),
            _ => None,
        }
    }

    /// Playback started, by a retry or any other way.
    pub fn succeeded(&mut self) {
        self.state = LadderState::Playing;
    }

    pub fn attempt_failed(&mut self) {
        self.state = match self.state {
            LadderState::Retrying { attempt } if (attempt as usize) < RETRY_OFFSETS.len() => {
                LadderState::Retrying {
                    attempt: attempt + 1,
                }
            }
            LadderState::Retrying { .. } => LadderState::Failed,
            other => other,
        };
    }

    pub fn reset(&mut self) {
        self.state = LadderState::Idle;
        self.started = None;
    }
}
