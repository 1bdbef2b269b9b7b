//! Linear parameter ramps.

/// Moves a value linearly toward a target over a fixed number of frames.
///
/// Retargeting while a ramp is in progress starts the new ramp from wherever
/// the value currently is. Only the latest target is ever pursued.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearRamp {
    current: f32,
    target: f32,
    step: f32,
    remaining: u32,
}

impl LinearRamp {
    pub fn new(value: f32) -> Self {
        Self {
            current: value,
            target: value,
            step: 0.0,
            remaining: 0,
        }
    }

    pub fn retarget(&mut self, target: f32, frames: u32) {
        self.target = target;
        if frames == 0 {
            self.current = target;
            self.step = 0.0;
            self.remaining = 0;
        } else {
            self.step = (target - self.current) / frames as f32;
            self.remaining = frames;
        }
    }

    /// Jumps straight to `value`, cancelling any ramp.
    #[cfg(test)]
    pub fn set(&mut self, value: f32) {
        self.retarget(value, 0);
    }

    /// Advances one frame and returns the new value.
    #[inline]
    pub fn next(&mut self) -> f32 {
        if self.remaining > 0 {
            self.remaining -= 1;
            if self.remaining == 0 {
                self.current = self.target;
            } else {
                self.current += self.step;
            }
        }
        self.current
    }

    /// Advances `frames` frames at once.
    #[cfg(test)]
    pub fn advance(&mut self, frames: u32) -> f32 {
        if frames >= self.remaining {
            self.current = self.target;
            self.remaining = 0;
        } else {
            self.remaining -= frames;
            self.current += self.step * frames as f32;
        }
        self.current
    }

    pub fn value(&self) -> f32 {
        self.current
    }

    #[cfg(test)]
    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_ramping(&self) -> bool {
        self.remaining > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reaches_target_exactly() {
        let mut ramp = LinearRamp::new(0.0);
        ramp.retarget(1.0, 12000);

        for _ in 0..11999 {
            ramp.next();
        }
        assert!(ramp.is_ramping());
        assert_eq!(ramp.next(), 1.0);
        assert!(!ramp.is_ramping());
        assert_eq!(ramp.next(), 1.0);
    }

    #[test]
    fn test_midpoint_is_linear() {
        let mut ramp = LinearRamp::new(1.0);
        ramp.retarget(3.0, 100);
        let mid = ramp.advance(50);
        assert!((mid - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_retarget_restarts_from_current_value() {
        let mut ramp = LinearRamp::new(0.0);
        ramp.retarget(1.0, 100);
        let halfway = ramp.advance(50);

        ramp.retarget(0.0, 100);
        assert_eq!(ramp.value(), halfway);
        assert_eq!(ramp.target(), 0.0);

        let quarter = ramp.advance(50);
        assert!((quarter - 0.25).abs() < 1e-4);
        assert_eq!(ramp.advance(1000), 0.0);
    }

    #[test]
    fn test_set_jumps() {
        let mut ramp = LinearRamp::new(0.2);
        ramp.retarget(0.8, 10);
        ramp.set(0.5);
        assert!(!ramp.is_ramping());
        assert_eq!(ramp.next(), 0.5);
    }
}
