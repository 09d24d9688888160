//! Multi-stage environmental protocol sequencer.
//!
//! A protocol is an ordered list of stages, each a temperature/humidity/CO₂
//! target with a duration (zero meaning "until advanced manually") and an
//! optional ramp. The sequencer owns one [`ParameterRamp`] per variable and
//! writes the interpolated setpoints into the [`Plant`] on every update.

pub mod templates;

use core::fmt;
use core::time::Duration;

use heapless::Vec;

use crate::alarms::AlarmThresholds;
use crate::environment::{Plant, Readings, Variable};
use crate::ramp::ParameterRamp;
use crate::timing::{Millis, PhaseClock, duration_millis};

/// Maximum number of stages in one protocol.
pub const MAX_STAGES: usize = 8;

/// Distance between a seeded warning bound and its critical bound.
pub const CRITICAL_MARGINS: Readings = Readings::new(1.0, 5.0, 0.2);

/// One step of an environmental protocol.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ProtocolStage {
    pub name: &'static str,
    pub targets: Readings,
    /// Zero means indefinite.
    pub duration: Duration,
    pub ramp_enabled: bool,
    pub ramp_duration: Duration,
}

impl ProtocolStage {
    /// Stage that applies its targets instantly.
    #[must_use]
    pub const fn hold(name: &'static str, targets: Readings, duration_secs: u64) -> Self {
        Self {
            name,
            targets,
            duration: Duration::from_secs(duration_secs),
            ramp_enabled: false,
            ramp_duration: Duration::ZERO,
        }
    }

    /// Stage that ramps from the live readings to its targets.
    #[must_use]
    pub const fn ramped(
        name: &'static str,
        targets: Readings,
        duration_secs: u64,
        ramp_secs: u64,
    ) -> Self {
        Self {
            name,
            targets,
            duration: Duration::from_secs(duration_secs),
            ramp_enabled: true,
            ramp_duration: Duration::from_secs(ramp_secs),
        }
    }

    #[must_use]
    pub const fn is_indefinite(&self) -> bool {
        self.duration.is_zero()
    }

    const fn ramp_time(&self) -> Duration {
        if self.ramp_enabled {
            self.ramp_duration
        } else {
            Duration::ZERO
        }
    }
}

/// Alarm bounds carried by a protocol. These are the warning bounds; the
/// critical bounds sit [`CRITICAL_MARGINS`] further out.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AlarmSeeds {
    pub temp_high: f32,
    pub temp_low: f32,
    pub humidity_low: f32,
    pub co2_high: f32,
    pub co2_low: f32,
}

impl Default for AlarmSeeds {
    fn default() -> Self {
        Self {
            temp_high: 38.0,
            temp_low: 36.0,
            humidity_low: 90.0,
            co2_high: 5.3,
            co2_low: 4.7,
        }
    }
}

impl AlarmSeeds {
    #[must_use]
    pub const fn new(
        temp_high: f32,
        temp_low: f32,
        humidity_low: f32,
        co2_high: f32,
        co2_low: f32,
    ) -> Self {
        Self {
            temp_high,
            temp_low,
            humidity_low,
            co2_high,
            co2_low,
        }
    }

    /// Expands the seeds into a full threshold set.
    #[must_use]
    pub fn thresholds(&self) -> AlarmThresholds {
        let margins = CRITICAL_MARGINS;
        AlarmThresholds {
            temp_warning_high: self.temp_high,
            temp_warning_low: self.temp_low,
            temp_critical_high: self.temp_high + margins.temperature,
            temp_critical_low: self.temp_low - margins.temperature,
            humidity_warning_low: self.humidity_low,
            humidity_critical_low: self.humidity_low - margins.humidity,
            co2_warning_high: self.co2_high,
            co2_warning_low: self.co2_low,
            co2_critical_high: self.co2_high + margins.co2,
            co2_critical_low: self.co2_low - margins.co2,
            ..AlarmThresholds::default()
        }
    }
}

/// Named, ordered stage list plus alarm seeds.
#[derive(Clone, Debug, PartialEq)]
pub struct EnvironmentProtocol {
    pub name: &'static str,
    pub stages: Vec<ProtocolStage, MAX_STAGES>,
    pub seeds: AlarmSeeds,
}

impl EnvironmentProtocol {
    #[must_use]
    pub fn new(name: &'static str, stages: &[ProtocolStage], seeds: AlarmSeeds) -> Self {
        Self {
            name,
            stages: stages.iter().copied().take(MAX_STAGES).collect(),
            seeds,
        }
    }

    /// Sum of all finite stage durations.
    #[must_use]
    pub fn scheduled_duration(&self) -> Duration {
        self.stages
            .iter()
            .fold(Duration::ZERO, |acc, stage| acc.saturating_add(stage.duration))
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SequencerState {
    Idle,
    Preheating,
    Running,
    Paused,
    Complete,
}

impl SequencerState {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            SequencerState::Idle => "IDLE",
            SequencerState::Preheating => "PREHEATING",
            SequencerState::Running => "RUNNING",
            SequencerState::Paused => "PAUSED",
            SequencerState::Complete => "COMPLETE",
        }
    }
}

impl fmt::Display for SequencerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Notable sequencer transitions.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum SequencerEvent {
    StageEntered {
        index: usize,
        name: &'static str,
        preheating: bool,
    },
    PreheatComplete {
        index: usize,
    },
    ProtocolComplete,
}

pub type SequencerEvents = Vec<SequencerEvent, 2>;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SequencerError {
    /// The protocol has no stages; the sequencer stays idle.
    EmptyProtocol,
}

impl fmt::Display for SequencerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequencerError::EmptyProtocol => f.write_str("protocol has no stages"),
        }
    }
}

/// Drives one [`EnvironmentProtocol`] through its stages.
#[derive(Clone, Debug)]
pub struct ProtocolSequencer {
    protocol: Option<EnvironmentProtocol>,
    state: SequencerState,
    resume_to: SequencerState,
    stage_index: usize,
    clock: PhaseClock,
    ramps: [ParameterRamp; 3],
}

impl Default for ProtocolSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolSequencer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            protocol: None,
            state: SequencerState::Idle,
            resume_to: SequencerState::Running,
            stage_index: 0,
            clock: PhaseClock::new(Millis::ZERO),
            ramps: [ParameterRamp::new(); 3],
        }
    }

    /// Loads `protocol` and enters its first stage.
    pub fn start<P: Plant>(
        &mut self,
        protocol: EnvironmentProtocol,
        now: Millis,
        plant: &mut P,
    ) -> Result<SequencerEvent, SequencerError> {
        if protocol.stages.is_empty() {
            self.stop();
            return Err(SequencerError::EmptyProtocol);
        }
        self.protocol = Some(protocol);
        self.enter_stage(0, now, plant)
            .ok_or(SequencerError::EmptyProtocol)
    }

    /// Abandons the protocol immediately.
    pub fn stop(&mut self) {
        self.state = SequencerState::Idle;
        self.stage_index = 0;
        self.clock = PhaseClock::new(Millis::ZERO);
        for ramp in &mut self.ramps {
            ramp.stop();
        }
    }

    /// Legal from `Running` or `Preheating`.
    pub fn pause(&mut self, now: Millis) -> bool {
        if !matches!(
            self.state,
            SequencerState::Running | SequencerState::Preheating
        ) {
            return false;
        }
        self.resume_to = self.state;
        self.state = SequencerState::Paused;
        self.clock.pause(now);
        true
    }

    /// Legal from `Paused`. Stage time and ramps skip the paused interval.
    pub fn resume(&mut self, now: Millis) -> bool {
        if self.state != SequencerState::Paused {
            return false;
        }
        if let Some(interval) = self.clock.resume(now) {
            for ramp in &mut self.ramps {
                ramp.defer(interval);
            }
        }
        self.state = self.resume_to;
        true
    }

    /// Manually advances to the next stage, completing after the last one.
    pub fn next_stage<P: Plant>(&mut self, now: Millis, plant: &mut P) -> Option<SequencerEvent> {
        if matches!(self.state, SequencerState::Idle | SequencerState::Complete) {
            return None;
        }
        Some(self.advance(now, plant))
    }

    /// Advances stage time, drives ramps into `plant`, and reports transitions.
    pub fn update<P: Plant>(&mut self, now: Millis, plant: &mut P) -> SequencerEvents {
        let mut events = SequencerEvents::new();
        if !matches!(
            self.state,
            SequencerState::Running | SequencerState::Preheating
        ) {
            return events;
        }

        self.drive_ramps(now, plant);

        let Some(&stage) = self.current_stage() else {
            return events;
        };
        let elapsed = self.clock.elapsed(now);

        // A ramp that ends with its stage still reports preheat first.
        if self.state == SequencerState::Preheating && elapsed >= stage.ramp_time() {
            self.state = SequencerState::Running;
            let _ = events.push(SequencerEvent::PreheatComplete {
                index: self.stage_index,
            });
        }

        if !stage.is_indefinite() && elapsed >= stage.duration {
            let _ = events.push(self.advance(now, plant));
        }

        events
    }

    fn advance<P: Plant>(&mut self, now: Millis, plant: &mut P) -> SequencerEvent {
        let next = self.stage_index + 1;
        match self.enter_stage(next, now, plant) {
            Some(event) => event,
            None => {
                self.state = SequencerState::Complete;
                SequencerEvent::ProtocolComplete
            }
        }
    }

    fn enter_stage<P: Plant>(
        &mut self,
        index: usize,
        now: Millis,
        plant: &mut P,
    ) -> Option<SequencerEvent> {
        let stage = *self.protocol.as_ref()?.stages.get(index)?;
        self.stage_index = index;
        self.clock.restart(now);
        self.state = if stage.ramp_enabled {
            SequencerState::Preheating
        } else {
            SequencerState::Running
        };

        for (ramp, variable) in self.ramps.iter_mut().zip(Variable::ALL) {
            let live = plant.read(variable.zone(), now);
            ramp.start(live, stage.targets.get(variable), stage.ramp_time(), now);
        }
        self.drive_ramps(now, plant);

        Some(SequencerEvent::StageEntered {
            index,
            name: stage.name,
            preheating: stage.ramp_enabled,
        })
    }

    fn drive_ramps<P: Plant>(&mut self, now: Millis, plant: &mut P) {
        for (ramp, variable) in self.ramps.iter_mut().zip(Variable::ALL) {
            if !ramp.is_active() {
                continue;
            }
            plant.apply_setpoint(variable.zone(), ramp.current_target(now));
            if ramp.is_complete(now) {
                ramp.stop();
            }
        }
    }

    /// Replaces the commanded target of one variable, cancelling its ramp.
    pub fn override_target<P: Plant>(
        &mut self,
        variable: Variable,
        value: f32,
        now: Millis,
        plant: &mut P,
    ) {
        let ramp = &mut self.ramps[usize::from(variable.zone())];
        ramp.start(value, value, Duration::ZERO, now);
        ramp.stop();
        plant.apply_setpoint(variable.zone(), value);
    }

    /// Setpoints currently commanded, including in-flight ramp values.
    #[must_use]
    pub fn current_targets(&self, now: Millis) -> Readings {
        let mut targets = Readings::default();
        for (ramp, variable) in self.ramps.iter().zip(Variable::ALL) {
            targets.set(variable, ramp.current_target(now));
        }
        targets
    }

    #[must_use]
    pub const fn state(&self) -> SequencerState {
        self.state
    }

    #[must_use]
    pub fn protocol(&self) -> Option<&EnvironmentProtocol> {
        self.protocol.as_ref()
    }

    #[must_use]
    pub const fn current_stage_index(&self) -> usize {
        self.stage_index
    }

    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.protocol
            .as_ref()
            .map_or(0, |protocol| protocol.stages.len())
    }

    #[must_use]
    pub fn current_stage(&self) -> Option<&ProtocolStage> {
        if matches!(self.state, SequencerState::Idle) {
            return None;
        }
        self.protocol.as_ref()?.stages.get(self.stage_index)
    }

    #[must_use]
    pub fn stage_elapsed(&self, now: Millis) -> Duration {
        match self.state {
            SequencerState::Idle | SequencerState::Complete => Duration::ZERO,
            _ => self.clock.elapsed(now),
        }
    }

    /// `None` for indefinite stages or when no stage is running.
    #[must_use]
    pub fn stage_time_remaining(&self, now: Millis) -> Option<Duration> {
        if self.state == SequencerState::Complete {
            return None;
        }
        let stage = self.current_stage()?;
        if stage.is_indefinite() {
            return None;
        }
        Some(stage.duration.saturating_sub(self.clock.elapsed(now)))
    }

    /// `(completed stages + current stage fraction) / stage count`, in percent.
    #[must_use]
    pub fn progress(&self, now: Millis) -> f32 {
        match self.state {
            SequencerState::Idle => 0.0,
            SequencerState::Complete => 100.0,
            _ => {
                let total = self.stage_count();
                if total == 0 {
                    return 0.0;
                }
                let fraction = self.current_stage().map_or(0.0, |stage| {
                    if stage.is_indefinite() {
                        0.0
                    } else {
                        #[allow(clippy::cast_precision_loss)]
                        let ratio = duration_millis(self.clock.elapsed(now)) as f32
                            / duration_millis(stage.duration) as f32;
                        ratio.clamp(0.0, 1.0)
                    }
                });
                #[allow(clippy::cast_precision_loss)]
                let percent = (self.stage_index as f32 + fraction) / total as f32 * 100.0;
                percent.clamp(0.0, 100.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::NoopPlant;

    const WARM: Readings = Readings::new(37.0, 90.0, 5.0);
    const COOL: Readings = Readings::new(25.0, 50.0, 0.04);

    fn two_stage(first_secs: u64) -> EnvironmentProtocol {
        EnvironmentProtocol::new(
            "test",
            &[
                ProtocolStage::hold("first", WARM, first_secs),
                ProtocolStage::hold("second", COOL, 60),
            ],
            AlarmSeeds::default(),
        )
    }

    #[test]
    fn empty_protocol_stays_idle() {
        let mut plant = NoopPlant::new();
        let mut sequencer = ProtocolSequencer::new();
        let empty = EnvironmentProtocol::new("empty", &[], AlarmSeeds::default());
        assert_eq!(
            sequencer.start(empty, Millis::ZERO, &mut plant),
            Err(SequencerError::EmptyProtocol)
        );
        assert_eq!(sequencer.state(), SequencerState::Idle);
        assert!(sequencer.update(Millis(1_000), &mut plant).is_empty());
    }

    #[test]
    fn instant_stage_applies_targets_on_entry() {
        let mut plant = NoopPlant::new();
        let mut sequencer = ProtocolSequencer::new();
        sequencer
            .start(two_stage(30), Millis::ZERO, &mut plant)
            .expect("protocol starts");
        assert_eq!(sequencer.state(), SequencerState::Running);
        assert_eq!(plant.commanded(0), Some(37.0));
        assert_eq!(plant.commanded(1), Some(90.0));
        assert_eq!(sequencer.current_targets(Millis::ZERO), WARM);
    }

    #[test]
    fn stages_advance_then_complete() {
        let mut plant = NoopPlant::new();
        let mut sequencer = ProtocolSequencer::new();
        sequencer
            .start(two_stage(30), Millis::ZERO, &mut plant)
            .expect("protocol starts");

        assert!(sequencer.update(Millis(29_999), &mut plant).is_empty());
        let events = sequencer.update(Millis(30_000), &mut plant);
        assert!(matches!(
            events.first(),
            Some(SequencerEvent::StageEntered { index: 1, .. })
        ));
        assert!((sequencer.progress(Millis(60_000)) - 75.0).abs() < 1e-3);

        let events = sequencer.update(Millis(90_000), &mut plant);
        assert_eq!(events.first(), Some(&SequencerEvent::ProtocolComplete));
        assert_eq!(sequencer.state(), SequencerState::Complete);
        assert!((sequencer.progress(Millis(90_000)) - 100.0).abs() < f32::EPSILON);
        assert_eq!(sequencer.stage_time_remaining(Millis(90_000)), None);
    }

    #[test]
    fn ramped_stage_preheats_from_live_reading() {
        let mut plant = NoopPlant::new();
        plant.apply_setpoint(0, 25.0);
        let protocol = EnvironmentProtocol::new(
            "ramp",
            &[ProtocolStage::ramped("warm", WARM, 0, 100)],
            AlarmSeeds::default(),
        );
        let mut sequencer = ProtocolSequencer::new();
        let entered = sequencer
            .start(protocol, Millis::ZERO, &mut plant)
            .expect("protocol starts");
        assert!(matches!(
            entered,
            SequencerEvent::StageEntered {
                preheating: true,
                ..
            }
        ));
        assert_eq!(sequencer.state(), SequencerState::Preheating);

        sequencer.update(Millis(50_000), &mut plant);
        let midway = plant.commanded(0).expect("zone 0");
        assert!((midway - 31.0).abs() < 1e-3);

        let events = sequencer.update(Millis(100_000), &mut plant);
        assert_eq!(
            events.as_slice(),
            &[SequencerEvent::PreheatComplete { index: 0 }]
        );
        assert_eq!(plant.commanded(0), Some(37.0));
        assert_eq!(sequencer.state(), SequencerState::Running);
    }

    #[test]
    fn ramp_ending_with_its_stage_reports_preheat_first() {
        let mut plant = NoopPlant::new();
        let protocol = EnvironmentProtocol::new(
            "ramp",
            &[
                ProtocolStage::ramped("warm", WARM, 100, 100),
                ProtocolStage::hold("keep", WARM, 0),
            ],
            AlarmSeeds::default(),
        );
        let mut sequencer = ProtocolSequencer::new();
        sequencer
            .start(protocol, Millis::ZERO, &mut plant)
            .expect("protocol starts");

        let events = sequencer.update(Millis(100_000), &mut plant);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], SequencerEvent::PreheatComplete { index: 0 });
        assert!(matches!(
            events[1],
            SequencerEvent::StageEntered {
                index: 1,
                preheating: false,
                ..
            }
        ));
    }

    #[test]
    fn pause_freezes_stage_and_ramp() {
        let mut plant = NoopPlant::new();
        plant.apply_setpoint(0, 25.0);
        let protocol = EnvironmentProtocol::new(
            "ramp",
            &[ProtocolStage::ramped("warm", WARM, 200, 100)],
            AlarmSeeds::default(),
        );
        let mut sequencer = ProtocolSequencer::new();
        sequencer
            .start(protocol, Millis::ZERO, &mut plant)
            .expect("protocol starts");

        assert!(sequencer.pause(Millis(50_000)));
        assert!(!sequencer.pause(Millis(50_000)));
        assert!(sequencer.update(Millis(500_000), &mut plant).is_empty());
        assert!(sequencer.resume(Millis(500_000)));
        assert!(!sequencer.resume(Millis(500_000)));
        assert_eq!(sequencer.state(), SequencerState::Preheating);

        sequencer.update(Millis(500_000), &mut plant);
        assert!((plant.commanded(0).expect("zone 0") - 31.0).abs() < 1e-3);
        assert_eq!(
            sequencer.stage_time_remaining(Millis(500_000)),
            Some(Duration::from_secs(150))
        );
    }

    #[test]
    fn next_stage_is_ignored_when_idle() {
        let mut plant = NoopPlant::new();
        let mut sequencer = ProtocolSequencer::new();
        assert_eq!(sequencer.next_stage(Millis::ZERO, &mut plant), None);
    }

    #[test]
    fn override_cancels_ramp() {
        let mut plant = NoopPlant::new();
        let protocol = EnvironmentProtocol::new(
            "ramp",
            &[ProtocolStage::ramped("warm", WARM, 0, 100)],
            AlarmSeeds::default(),
        );
        let mut sequencer = ProtocolSequencer::new();
        sequencer
            .start(protocol, Millis::ZERO, &mut plant)
            .expect("protocol starts");
        sequencer.override_target(Variable::Temperature, 30.0, Millis(10_000), &mut plant);
        sequencer.update(Millis(20_000), &mut plant);
        assert_eq!(plant.commanded(0), Some(30.0));
        assert_eq!(sequencer.current_targets(Millis(20_000)).temperature, 30.0);
    }

    #[test]
    fn seeds_expand_to_default_thresholds() {
        let thresholds = AlarmSeeds::new(38.0, 36.0, 90.0, 5.3, 4.7).thresholds();
        assert_eq!(thresholds.temp_critical_high, 39.0);
        assert_eq!(thresholds.temp_critical_low, 35.0);
        assert_eq!(thresholds.humidity_critical_low, 85.0);
        assert!((thresholds.co2_critical_high - 5.5).abs() < 1e-4);
    }
}
