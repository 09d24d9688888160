//! PCR thermal cycling state machine.
//!
//! The cycler walks a fixed phase graph:
//!
//! ```text
//! Idle -> [HotStart] -> InitialDenature -> Denature -> Anneal -> Extend ---+
//!                                             ^      (or AnnealExtend)     |
//!                                             +---- while cycle < cycles --+
//!                                                                          |
//!                            Complete <- Hold <- FinalExtend <-------------+
//! ```
//!
//! At most one transition happens per [`ThermalCycler::update`] call. Phase
//! targets switch instantly; there is no ramping on the thermal side.

pub mod program;

use core::fmt;
use core::time::Duration;

use crate::timing::{Millis, PhaseClock, duration_millis};

pub use program::{
    CYCLE_RANGE, GRADIENT_POSITION_RANGE, Gradient, HotStart, PhaseStep, ProgramError,
    ProgramType, ProgramWarning, ProgramWarnings, SAFE_TEMPERATURE_RANGE, ThermalProgram, Touchdown, TwoStep,
};

/// Block temperature commanded while idle or after completion.
pub const AMBIENT_TEMPERATURE: f32 = 25.0;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ThermalPhase {
    Idle,
    HotStart,
    InitialDenature,
    Denature,
    Anneal,
    Extend,
    AnnealExtend,
    FinalExtend,
    Hold,
    Complete,
}

impl ThermalPhase {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            ThermalPhase::Idle => "IDLE",
            ThermalPhase::HotStart => "HOT_START",
            ThermalPhase::InitialDenature => "INITIAL_DENATURE",
            ThermalPhase::Denature => "DENATURE",
            ThermalPhase::Anneal => "ANNEAL",
            ThermalPhase::Extend => "EXTEND",
            ThermalPhase::AnnealExtend => "ANNEAL_EXTEND",
            ThermalPhase::FinalExtend => "FINAL_EXTEND",
            ThermalPhase::Hold => "HOLD",
            ThermalPhase::Complete => "COMPLETE",
        }
    }

    /// Whether the phase is part of an active run.
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, ThermalPhase::Idle | ThermalPhase::Complete)
    }
}

impl fmt::Display for ThermalPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Phase change reported by [`ThermalCycler::update`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PhaseTransition {
    pub from: ThermalPhase,
    pub to: ThermalPhase,
    /// Cycle index after the transition.
    pub cycle: u16,
}

/// Runs one [`ThermalProgram`] at a time.
#[derive(Clone, Debug)]
pub struct ThermalCycler {
    program: ThermalProgram,
    phase: ThermalPhase,
    cycle: u16,
    clock: PhaseClock,
    running: bool,
    total: Duration,
}

impl Default for ThermalCycler {
    fn default() -> Self {
        Self::new()
    }
}

impl ThermalCycler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: ThermalProgram::default(),
            phase: ThermalPhase::Idle,
            cycle: 0,
            clock: PhaseClock::new(Millis::ZERO),
            running: false,
            total: Duration::ZERO,
        }
    }

    /// Copies `program` in and enters the first phase.
    ///
    /// No validation happens here; see [`ThermalProgram::validate`].
    pub fn start(&mut self, program: ThermalProgram, now: Millis) -> PhaseTransition {
        let from = self.phase;
        self.program = program;
        self.cycle = 0;
        self.total = self.compute_total_duration();
        self.running = true;
        self.clock.restart(now);
        self.phase = if program.hot_start.enabled {
            ThermalPhase::HotStart
        } else {
            ThermalPhase::InitialDenature
        };
        PhaseTransition {
            from,
            to: self.phase,
            cycle: self.cycle,
        }
    }

    /// Abandons the run immediately.
    pub fn stop(&mut self) {
        self.phase = ThermalPhase::Idle;
        self.cycle = 0;
        self.running = false;
        self.clock = PhaseClock::new(Millis::ZERO);
    }

    /// Freezes phase advancement. No-op unless running and not paused.
    pub fn pause(&mut self, now: Millis) -> bool {
        self.running && self.clock.pause(now)
    }

    /// Resumes a paused run. The paused interval is excluded from phase time.
    pub fn resume(&mut self, now: Millis) -> bool {
        self.running && self.clock.resume(now).is_some()
    }

    /// Advances the phase graph by at most one step.
    pub fn update(&mut self, now: Millis) -> Option<PhaseTransition> {
        if !self.running || self.clock.is_paused() {
            return None;
        }
        if self.phase == ThermalPhase::Hold && self.program.hold_indefinitely {
            return None;
        }
        if self.clock.elapsed(now) < self.phase_duration(self.phase) {
            return None;
        }

        let from = self.phase;
        self.phase = self.next_phase();
        self.clock.restart(now);
        if self.phase == ThermalPhase::Complete {
            self.running = false;
        }
        Some(PhaseTransition {
            from,
            to: self.phase,
            cycle: self.cycle,
        })
    }

    fn cycles(&self) -> u16 {
        self.program.cycles.max(1)
    }

    fn next_phase(&mut self) -> ThermalPhase {
        match self.phase {
            ThermalPhase::Idle => ThermalPhase::Idle,
            ThermalPhase::HotStart => ThermalPhase::InitialDenature,
            ThermalPhase::InitialDenature => {
                self.cycle = 1;
                ThermalPhase::Denature
            }
            ThermalPhase::Denature if self.program.two_step.enabled => ThermalPhase::AnnealExtend,
            ThermalPhase::Denature => ThermalPhase::Anneal,
            ThermalPhase::Anneal => ThermalPhase::Extend,
            ThermalPhase::Extend | ThermalPhase::AnnealExtend => {
                if self.cycle < self.cycles() {
                    self.cycle += 1;
                    ThermalPhase::Denature
                } else {
                    ThermalPhase::FinalExtend
                }
            }
            ThermalPhase::FinalExtend => ThermalPhase::Hold,
            ThermalPhase::Hold | ThermalPhase::Complete => ThermalPhase::Complete,
        }
    }

    /// Nominal duration of `phase` under the loaded program. Zero for `Hold`.
    #[must_use]
    pub fn phase_duration(&self, phase: ThermalPhase) -> Duration {
        let program = &self.program;
        match phase {
            ThermalPhase::HotStart => program.hot_start.activation.duration,
            ThermalPhase::InitialDenature => program.initial_denature.duration,
            ThermalPhase::Denature => program.denature.duration,
            ThermalPhase::Anneal => program.anneal.duration,
            ThermalPhase::Extend => program.extend.duration,
            ThermalPhase::AnnealExtend => program.two_step.anneal_extend.duration,
            ThermalPhase::FinalExtend => program.final_extend.duration,
            ThermalPhase::Idle | ThermalPhase::Hold | ThermalPhase::Complete => Duration::ZERO,
        }
    }

    fn cycle_duration(&self) -> Duration {
        let body = if self.program.two_step.enabled {
            self.phase_duration(ThermalPhase::AnnealExtend)
        } else {
            self.phase_duration(ThermalPhase::Anneal)
                .saturating_add(self.phase_duration(ThermalPhase::Extend))
        };
        body.saturating_add(self.phase_duration(ThermalPhase::Denature))
    }

    fn compute_total_duration(&self) -> Duration {
        let mut total = self.remaining_after(ThermalPhase::HotStart, 0);
        if self.program.hot_start.enabled {
            total = total.saturating_add(self.phase_duration(ThermalPhase::HotStart));
        }
        total
    }

    /// Scheduled time of every phase after `phase`, given the current cycle.
    fn remaining_after(&self, phase: ThermalPhase, cycle: u16) -> Duration {
        let final_extend = self.phase_duration(ThermalPhase::FinalExtend);
        let cycles_left = u32::from(self.cycles().saturating_sub(cycle));
        let later_cycles = self
            .cycle_duration()
            .saturating_mul(cycles_left)
            .saturating_add(final_extend);

        match phase {
            ThermalPhase::Idle => self.total,
            ThermalPhase::HotStart => self
                .phase_duration(ThermalPhase::InitialDenature)
                .saturating_add(
                    self.cycle_duration()
                        .saturating_mul(u32::from(self.cycles()))
                        .saturating_add(final_extend),
                ),
            ThermalPhase::InitialDenature => self
                .cycle_duration()
                .saturating_mul(u32::from(self.cycles()))
                .saturating_add(final_extend),
            ThermalPhase::Denature if self.program.two_step.enabled => self
                .phase_duration(ThermalPhase::AnnealExtend)
                .saturating_add(later_cycles),
            ThermalPhase::Denature => self
                .phase_duration(ThermalPhase::Anneal)
                .saturating_add(self.phase_duration(ThermalPhase::Extend))
                .saturating_add(later_cycles),
            ThermalPhase::Anneal => self
                .phase_duration(ThermalPhase::Extend)
                .saturating_add(later_cycles),
            ThermalPhase::Extend | ThermalPhase::AnnealExtend => later_cycles,
            ThermalPhase::FinalExtend | ThermalPhase::Hold | ThermalPhase::Complete => {
                Duration::ZERO
            }
        }
    }

    #[must_use]
    pub const fn phase(&self) -> ThermalPhase {
        self.phase
    }

    /// 1-based cycle index; 0 before the first cycle.
    #[must_use]
    pub const fn cycle(&self) -> u16 {
        self.cycle
    }

    #[must_use]
    pub const fn program(&self) -> &ThermalProgram {
        &self.program
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.clock.is_paused()
    }

    /// Sum of all scheduled phases for the loaded program, excluding `Hold`.
    #[must_use]
    pub const fn total_duration(&self) -> Duration {
        self.total
    }

    /// Phase time elapsed, net of pauses.
    #[must_use]
    pub fn phase_elapsed(&self, now: Millis) -> Duration {
        if self.phase.is_active() {
            self.clock.elapsed(now)
        } else {
            Duration::ZERO
        }
    }

    #[must_use]
    pub fn phase_time_remaining(&self, now: Millis) -> Duration {
        if !self.phase.is_active() {
            return Duration::ZERO;
        }
        self.phase_duration(self.phase)
            .saturating_sub(self.clock.elapsed(now))
    }

    #[must_use]
    pub fn total_time_remaining(&self, now: Millis) -> Duration {
        match self.phase {
            ThermalPhase::Idle | ThermalPhase::Complete => Duration::ZERO,
            phase => self
                .phase_time_remaining(now)
                .saturating_add(self.remaining_after(phase, self.cycle)),
        }
    }

    /// Run progress in percent, exactly 100 once complete.
    #[must_use]
    pub fn progress(&self, now: Millis) -> f32 {
        match self.phase {
            ThermalPhase::Idle => 0.0,
            ThermalPhase::Complete => 100.0,
            _ => {
                let total = duration_millis(self.total);
                if total == 0 {
                    return 100.0;
                }
                let done = total.saturating_sub(duration_millis(self.total_time_remaining(now)));
                #[allow(clippy::cast_precision_loss)]
                let percent = done as f32 / total as f32 * 100.0;
                percent.clamp(0.0, 100.0)
            }
        }
    }

    /// Anneal temperature for the current cycle, honouring touchdown.
    #[must_use]
    pub fn current_anneal_temperature(&self) -> f32 {
        self.anneal_temperature_for_cycle(self.cycle)
    }

    /// Anneal temperature for cycle `cycle` (1-based).
    ///
    /// With touchdown enabled the temperature drops by `step_size` per cycle
    /// from `start_temp`, never below `end_temp`, and stays at `end_temp`
    /// once `touchdown_cycles` have run.
    #[must_use]
    pub fn anneal_temperature_for_cycle(&self, cycle: u16) -> f32 {
        let touchdown = &self.program.touchdown;
        if !touchdown.enabled {
            return self.program.anneal.temperature;
        }
        let cycle = cycle.max(1);
        if cycle > touchdown.touchdown_cycles {
            return touchdown.end_temp;
        }
        let stepped = touchdown.start_temp - f32::from(cycle - 1) * touchdown.step_size;
        stepped.max(touchdown.end_temp).min(touchdown.start_temp)
    }

    /// Anneal temperature at block `position` when gradient mode is on.
    #[must_use]
    pub fn gradient_temperature(&self, position: u8) -> f32 {
        let gradient = &self.program.gradient;
        if !gradient.enabled || gradient.positions <= 1 {
            return self.program.anneal.temperature;
        }
        let last = gradient.positions - 1;
        let step = (gradient.temp_high - gradient.temp_low) / f32::from(last);
        gradient.temp_low + f32::from(position.min(last)) * step
    }

    /// Block temperature for the current phase.
    #[must_use]
    pub fn target_temperature(&self) -> f32 {
        let program = &self.program;
        match self.phase {
            ThermalPhase::Idle | ThermalPhase::Complete => AMBIENT_TEMPERATURE,
            ThermalPhase::HotStart => program.hot_start.activation.temperature,
            ThermalPhase::InitialDenature => program.initial_denature.temperature,
            ThermalPhase::Denature => program.denature.temperature,
            ThermalPhase::Anneal => self.current_anneal_temperature(),
            ThermalPhase::Extend => program.extend.temperature,
            ThermalPhase::AnnealExtend => program.two_step.anneal_extend.temperature,
            ThermalPhase::FinalExtend => program.final_extend.temperature,
            ThermalPhase::Hold => program.hold_temperature,
        }
    }
}
