//! Status snapshots returned by [`super::Device::status`].

use core::time::Duration;

use heapless::Vec;

use super::{DeviceKind, DeviceState};
use crate::alarms::{Alarm, AlarmMonitor, MAX_ACTIVE_ALARMS, Severity};
use crate::protocol::SequencerState;
use crate::thermal::{ProgramType, ThermalCycler, ThermalPhase};

/// Most zones any instrument exposes.
pub const MAX_ZONES: usize = 3;

/// Upper end of `GRADIENT_POSITION_RANGE`.
pub const MAX_GRADIENT_POSITIONS: usize = 12;

/// One controlled zone.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ZoneStatus {
    pub name: &'static str,
    pub unit: &'static str,
    pub reading: f32,
    pub setpoint: f32,
}

impl ZoneStatus {
    #[must_use]
    pub fn error(&self) -> f32 {
        self.reading - self.setpoint
    }
}

/// Thermal cycling progress.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ThermalActivity {
    pub phase: ThermalPhase,
    pub cycle: u16,
    pub total_cycles: u16,
    pub phase_remaining: Duration,
    pub total_remaining: Duration,
    pub progress: f32,
    pub target: f32,
    /// Reported only while annealing.
    pub anneal_temperature: Option<f32>,
    /// Mean absolute deviation of the zones from their setpoints.
    pub stability: f32,
    pub program_type: ProgramType,
    pub touchdown: Option<TouchdownActivity>,
    pub gradient: Option<GradientActivity>,
}

/// Touchdown schedule and where the run currently sits on it.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TouchdownActivity {
    pub start_temp: f32,
    pub end_temp: f32,
    pub step_size: f32,
    pub touchdown_cycles: u16,
    pub current_anneal: f32,
}

impl TouchdownActivity {
    /// `None` unless the cycler's program has touchdown enabled.
    #[must_use]
    pub fn from_cycler(cycler: &ThermalCycler) -> Option<Self> {
        let touchdown = cycler.program().touchdown;
        touchdown.enabled.then(|| Self {
            start_temp: touchdown.start_temp,
            end_temp: touchdown.end_temp,
            step_size: touchdown.step_size,
            touchdown_cycles: touchdown.touchdown_cycles,
            current_anneal: cycler.current_anneal_temperature(),
        })
    }
}

/// Anneal temperature at each block position.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GradientActivity {
    pub temp_low: f32,
    pub temp_high: f32,
    pub positions: u8,
    temperatures: [f32; MAX_GRADIENT_POSITIONS],
}

impl GradientActivity {
    /// `None` unless the cycler's program has gradient mode enabled.
    #[must_use]
    pub fn from_cycler(cycler: &ThermalCycler) -> Option<Self> {
        let gradient = cycler.program().gradient;
        if !gradient.enabled {
            return None;
        }
        let mut temperatures = [0.0; MAX_GRADIENT_POSITIONS];
        for (slot, position) in temperatures.iter_mut().zip(0..gradient.positions) {
            *slot = cycler.gradient_temperature(position);
        }
        Some(Self {
            temp_low: gradient.temp_low,
            temp_high: gradient.temp_high,
            positions: gradient.positions,
            temperatures,
        })
    }

    /// Temperatures from position 0 upward.
    #[must_use]
    pub fn temperatures(&self) -> &[f32] {
        let count = usize::from(self.positions).min(MAX_GRADIENT_POSITIONS);
        &self.temperatures[..count]
    }
}

/// Protocol sequencing progress.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ProtocolActivity {
    pub protocol: &'static str,
    pub state: SequencerState,
    pub stage_index: usize,
    pub stage_count: usize,
    pub stage: Option<&'static str>,
    /// `None` for indefinite stages.
    pub stage_remaining: Option<Duration>,
    pub progress: f32,
    /// How long every variable has been inside its stability band.
    pub stable_for: Option<Duration>,
}

/// What the instrument is doing.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Activity {
    Idle,
    Manual,
    Thermal(ThermalActivity),
    Protocol(ProtocolActivity),
}

/// Active alarm overview.
#[derive(Clone, Debug, PartialEq)]
pub struct AlarmSummary {
    pub count: usize,
    pub highest: Option<Severity>,
    pub alarms: Vec<Alarm, MAX_ACTIVE_ALARMS>,
}

impl AlarmSummary {
    #[must_use]
    pub fn from_monitor<const HISTORY: usize>(monitor: &AlarmMonitor<HISTORY>) -> Self {
        Self {
            count: monitor.active_count(),
            highest: monitor.highest_severity(),
            alarms: monitor.active_alarms().iter().copied().collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeviceStatus {
    pub kind: DeviceKind,
    pub state: DeviceState,
    pub uptime: Duration,
    pub zones: Vec<ZoneStatus, MAX_ZONES>,
    pub activity: Activity,
    pub alarms: Option<AlarmSummary>,
}
