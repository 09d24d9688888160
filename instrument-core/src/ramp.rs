//! Linear setpoint ramps.

use core::time::Duration;

use crate::timing::{Millis, duration_millis};

/// Linear interpolation of one controlled variable from a start value to a
/// target value over a fixed duration.
///
/// [`ParameterRamp::current_target`] is a pure function of the stored fields
/// and `now`; the owner polls [`ParameterRamp::is_complete`] each tick and
/// calls [`ParameterRamp::stop`] once the ramp has landed.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ParameterRamp {
    active: bool,
    start_value: f32,
    target_value: f32,
    duration: Duration,
    started_at: Millis,
}

impl Default for ParameterRamp {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterRamp {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            active: false,
            start_value: 0.0,
            target_value: 0.0,
            duration: Duration::ZERO,
            started_at: Millis::ZERO,
        }
    }

    /// Arms the ramp. A zero duration lands on `target` immediately.
    pub fn start(&mut self, start: f32, target: f32, duration: Duration, now: Millis) {
        self.active = true;
        self.start_value = start;
        self.target_value = target;
        self.duration = duration;
        self.started_at = now;
    }

    /// Deactivates the ramp; [`ParameterRamp::current_target`] then reports the target.
    pub fn stop(&mut self) {
        self.active = false;
    }

    /// Shifts the ramp start forward so that an interval spent paused does
    /// not count towards ramp progress.
    pub fn defer(&mut self, by: Duration) {
        if self.active {
            self.started_at = self.started_at + by;
        }
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub const fn target(&self) -> f32 {
        self.target_value
    }

    #[must_use]
    pub fn is_complete(&self, now: Millis) -> bool {
        !self.active || now.saturating_duration_since(self.started_at) >= self.duration
    }

    #[must_use]
    pub fn current_target(&self, now: Millis) -> f32 {
        if self.is_complete(now) {
            return self.target_value;
        }

        let elapsed = duration_millis(now.saturating_duration_since(self.started_at));
        let total = duration_millis(self.duration);
        #[allow(clippy::cast_precision_loss)]
        let fraction = (elapsed as f32 / total as f32).clamp(0.0, 1.0);
        self.start_value + (self.target_value - self.start_value) * fraction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lands_exactly_on_target_at_duration() {
        for (start, target, secs) in [(25.0, 37.0, 1_800), (37.0, 4.0, 7), (0.04, 5.0, 1)] {
            let mut ramp = ParameterRamp::new();
            ramp.start(start, target, Duration::from_secs(secs), Millis(500));
            let end = Millis(500) + Duration::from_secs(secs);
            assert_eq!(ramp.current_target(end), target);
            assert!(ramp.is_complete(end));
        }
    }

    #[test]
    fn interpolates_linearly_and_monotonically() {
        let mut ramp = ParameterRamp::new();
        ramp.start(20.0, 30.0, Duration::from_secs(10), Millis::ZERO);
        assert_eq!(ramp.current_target(Millis::ZERO), 20.0);
        assert!((ramp.current_target(Millis(5_000)) - 25.0).abs() < 1e-4);

        let mut previous = 20.0;
        for step in 0..=100 {
            let value = ramp.current_target(Millis(step * 100));
            assert!(value >= previous);
            assert!(value <= 30.0);
            previous = value;
        }
    }

    #[test]
    fn inactive_ramp_reports_target() {
        let mut ramp = ParameterRamp::new();
        ramp.start(10.0, 50.0, Duration::from_secs(60), Millis::ZERO);
        ramp.stop();
        assert_eq!(ramp.current_target(Millis(1)), 50.0);
        assert!(ramp.is_complete(Millis(1)));
    }

    #[test]
    fn zero_duration_completes_immediately() {
        let mut ramp = ParameterRamp::new();
        ramp.start(10.0, 50.0, Duration::ZERO, Millis(42));
        assert!(ramp.is_complete(Millis(42)));
        assert_eq!(ramp.current_target(Millis(42)), 50.0);
    }

    #[test]
    fn defer_excludes_paused_interval() {
        let mut ramp = ParameterRamp::new();
        ramp.start(0.0, 10.0, Duration::from_secs(10), Millis::ZERO);
        ramp.defer(Duration::from_secs(5));
        assert!((ramp.current_target(Millis(10_000)) - 5.0).abs() < 1e-4);
        assert!(ramp.is_complete(Millis(15_000)));
    }
}
