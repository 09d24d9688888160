//! Monotonic millisecond clock shared by every control engine.
//!
//! The host loop samples one [`Millis`] per tick and passes it to each engine
//! so that the thermal cycler, protocol sequencer, ramps and alarm monitor all
//! agree on "now" within a tick.

use core::fmt;
use core::ops::Add;
use core::time::Duration;

use crate::telemetry::TelemetryInstant;

/// Milliseconds since an arbitrary, never-resetting epoch.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Millis(pub u64);

impl Millis {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000))
    }

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Whole seconds, truncated. Used for alarm timestamps.
    #[must_use]
    pub const fn as_secs(self) -> u64 {
        self.0 / 1_000
    }

    /// Returns `self - earlier`, or zero when `earlier` is in the future.
    #[must_use]
    pub const fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Millis {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0.saturating_add(duration_millis(rhs)))
    }
}

impl TelemetryInstant for Millis {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Millis::saturating_duration_since(*self, earlier)
    }
}

impl fmt::Display for Millis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}s", self.0 / 1_000, self.0 % 1_000)
    }
}

/// Converts a duration to whole milliseconds, saturating at `u64::MAX`.
#[must_use]
pub fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Elapsed-time bookkeeping for one phase or stage.
///
/// Time spent paused is accumulated and excluded from [`PhaseClock::elapsed`],
/// so a phase of duration `d` interrupted by a pause of `p` completes after
/// `d + p` of wall-clock time.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PhaseClock {
    started_at: Millis,
    paused_at: Option<Millis>,
    paused_total: Duration,
}

impl PhaseClock {
    #[must_use]
    pub const fn new(now: Millis) -> Self {
        Self {
            started_at: now,
            paused_at: None,
            paused_total: Duration::ZERO,
        }
    }

    /// Starts a fresh phase at `now`, discarding any accumulated pause time.
    pub fn restart(&mut self, now: Millis) {
        *self = Self::new(now);
    }

    #[must_use]
    pub const fn started_at(&self) -> Millis {
        self.started_at
    }

    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Freezes the clock. Returns `false` when it was already paused.
    pub fn pause(&mut self, now: Millis) -> bool {
        if self.paused_at.is_some() {
            return false;
        }
        self.paused_at = Some(now);
        true
    }

    /// Unfreezes the clock and returns the length of the pause just ended.
    pub fn resume(&mut self, now: Millis) -> Option<Duration> {
        let paused_at = self.paused_at.take()?;
        let interval = now.saturating_duration_since(paused_at);
        self.paused_total = self.paused_total.saturating_add(interval);
        Some(interval)
    }

    #[must_use]
    pub const fn paused_total(&self) -> Duration {
        self.paused_total
    }

    /// Phase time net of pauses. Never negative; frozen while paused.
    #[must_use]
    pub fn elapsed(&self, now: Millis) -> Duration {
        let reference = match self.paused_at {
            Some(paused_at) => paused_at,
            None => now,
        };
        reference
            .saturating_duration_since(self.started_at)
            .saturating_sub(self.paused_total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_excludes_paused_interval() {
        let mut clock = PhaseClock::new(Millis(1_000));
        assert!(clock.pause(Millis(4_000)));
        assert_eq!(clock.elapsed(Millis(9_000)), Duration::from_secs(3));
        assert_eq!(clock.resume(Millis(9_000)), Some(Duration::from_secs(5)));
        assert_eq!(clock.elapsed(Millis(10_000)), Duration::from_secs(4));
    }

    #[test]
    fn double_pause_and_stray_resume_are_ignored() {
        let mut clock = PhaseClock::new(Millis::ZERO);
        assert_eq!(clock.resume(Millis(10)), None);
        assert!(clock.pause(Millis(100)));
        assert!(!clock.pause(Millis(200)));
        assert_eq!(clock.resume(Millis(300)), Some(Duration::from_millis(200)));
        assert_eq!(clock.paused_total(), Duration::from_millis(200));
    }

    #[test]
    fn elapsed_saturates_when_now_precedes_start() {
        let clock = PhaseClock::new(Millis(5_000));
        assert_eq!(clock.elapsed(Millis(1_000)), Duration::ZERO);
    }

    #[test]
    fn display_formats_seconds_with_millis() {
        let mut text = heapless::String::<16>::new();
        core::fmt::write(&mut text, format_args!("{}", Millis(12_045))).expect("fits");
        assert_eq!(text.as_str(), "12.045s");
    }
}
