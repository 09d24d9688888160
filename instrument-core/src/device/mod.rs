//! Instrument wrappers around the control engines.
//!
//! Every instrument exposes the same command contract through [`Device`]:
//! operators start, stop, pause and resume runs, override setpoints and read
//! a [`DeviceStatus`] snapshot. Commands issued in the wrong state are
//! refused with a [`CommandRejection`] and leave the run untouched.

pub mod dummy;
pub mod incubator;
pub mod params;
pub mod pcr;
pub mod status;

use core::fmt;
use core::time::Duration;

use crate::alarms::AlarmMonitor;
use crate::environment::Plant;
use crate::telemetry::{ControlEvent, TelemetryRecorder};
use crate::thermal::ProgramError;
use crate::timing::Millis;

pub use dummy::DummyDevice;
pub use incubator::IncubatorDevice;
pub use params::{MAX_PARAMS, ParamValue, StartParams};
pub use pcr::PcrDevice;
pub use status::{Activity, AlarmSummary, DeviceStatus, ZoneStatus};

/// Instrument variants the firmware can be built as.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceKind {
    Pcr,
    Incubator,
    Dummy,
}

impl DeviceKind {
    pub const ALL: [DeviceKind; 3] = [DeviceKind::Pcr, DeviceKind::Incubator, DeviceKind::Dummy];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            DeviceKind::Pcr => "pcr",
            DeviceKind::Incubator => "incubator",
            DeviceKind::Dummy => "dummy",
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            DeviceKind::Pcr => "PCR Thermocycler",
            DeviceKind::Incubator => "Cell Culture Incubator",
            DeviceKind::Dummy => "Dummy Instrument",
        }
    }

    /// Parameter names `start` accepts on this instrument.
    #[must_use]
    pub const fn start_keys(self) -> &'static [&'static str] {
        match self {
            DeviceKind::Pcr => &pcr::START_KEYS,
            DeviceKind::Incubator => &incubator::START_KEYS,
            DeviceKind::Dummy => &dummy::START_KEYS,
        }
    }

    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Device lifecycle.
///
/// `Starting` and `Stopping` are transient and only observable through
/// telemetry. `Error` is reserved for hosts that detect hardware faults.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceState {
    Idle,
    Starting,
    Running,
    Paused,
    Stopping,
    Error,
}

impl DeviceState {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            DeviceState::Idle => "IDLE",
            DeviceState::Starting => "STARTING",
            DeviceState::Running => "RUNNING",
            DeviceState::Paused => "PAUSED",
            DeviceState::Stopping => "STOPPING",
            DeviceState::Error => "ERROR",
        }
    }

    /// Running or paused.
    #[must_use]
    pub const fn is_engaged(self) -> bool {
        matches!(self, DeviceState::Running | DeviceState::Paused)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Longest parameter name echoed back in a rejection.
pub const MAX_PARAM_NAME: usize = 24;

/// Reasons a command was refused.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandRejection {
    IllegalTransition {
        action: &'static str,
        state: DeviceState,
    },
    InvalidZone(u8),
    SetpointOutOfRange {
        zone: u8,
        value: f32,
        min: f32,
        max: f32,
    },
    InvalidParameter(&'static str),
    UnknownParameter(heapless::String<MAX_PARAM_NAME>),
    UnknownTemplate,
    InvalidProgram(ProgramError),
    EmptyProtocol,
    NoSuchAlarm {
        index: usize,
        active: usize,
    },
    Unsupported(&'static str),
}

impl CommandRejection {
    /// Builds an [`CommandRejection::UnknownParameter`], truncating long names.
    #[must_use]
    pub fn unknown_parameter(name: &str) -> Self {
        let mut owned = heapless::String::new();
        for ch in name.chars() {
            if owned.push(ch).is_err() {
                break;
            }
        }
        CommandRejection::UnknownParameter(owned)
    }
}

impl fmt::Display for CommandRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandRejection::IllegalTransition { action, state } => {
                write!(f, "cannot {action} while {state}")
            }
            CommandRejection::InvalidZone(zone) => write!(f, "invalid zone {zone}"),
            CommandRejection::SetpointOutOfRange {
                zone,
                value,
                min,
                max,
            } => write!(
                f,
                "zone {zone} setpoint {value:.2} outside {min:.2}..={max:.2}"
            ),
            CommandRejection::InvalidParameter(name) => write!(f, "invalid value for {name}"),
            CommandRejection::UnknownParameter(name) => write!(f, "unknown parameter {name}"),
            CommandRejection::UnknownTemplate => f.write_str("unknown template"),
            CommandRejection::InvalidProgram(error) => write!(f, "invalid program: {error}"),
            CommandRejection::EmptyProtocol => f.write_str("protocol has no stages"),
            CommandRejection::NoSuchAlarm { index, active } => {
                write!(f, "no alarm at index {index} ({active} active)")
            }
            CommandRejection::Unsupported(action) => {
                write!(f, "{action} is not supported by this instrument")
            }
        }
    }
}

impl From<ProgramError> for CommandRejection {
    fn from(error: ProgramError) -> Self {
        CommandRejection::InvalidProgram(error)
    }
}

/// Lifecycle state plus uptime bookkeeping.
///
/// Uptime counts from the first entry into `Running` and resets whenever the
/// device returns to `Idle` or `Error`. Pausing does not stop it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DeviceLifecycle {
    state: DeviceState,
    running_since: Option<Millis>,
}

impl Default for DeviceLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceLifecycle {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: DeviceState::Idle,
            running_since: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> DeviceState {
        self.state
    }

    /// Moves to `to`, returning the previous state when it changed.
    pub fn transition(&mut self, to: DeviceState, now: Millis) -> Option<DeviceState> {
        let from = self.state;
        match to {
            DeviceState::Running if self.running_since.is_none() => {
                self.running_since = Some(now);
            }
            DeviceState::Idle | DeviceState::Error => self.running_since = None,
            _ => {}
        }
        self.state = to;
        (from != to).then_some(from)
    }

    #[must_use]
    pub fn uptime(&self, now: Millis) -> Duration {
        self.running_since
            .map_or(Duration::ZERO, |since| now.saturating_duration_since(since))
    }
}

/// State shared by every device implementation.
pub struct DeviceContext<P> {
    plant: P,
    lifecycle: DeviceLifecycle,
    telemetry: TelemetryRecorder<Millis>,
}

impl<P: Plant> DeviceContext<P> {
    #[must_use]
    pub const fn new(plant: P) -> Self {
        Self {
            plant,
            lifecycle: DeviceLifecycle::new(),
            telemetry: TelemetryRecorder::new(),
        }
    }

    #[must_use]
    pub const fn state(&self) -> DeviceState {
        self.lifecycle.state()
    }

    #[must_use]
    pub fn uptime(&self, now: Millis) -> Duration {
        self.lifecycle.uptime(now)
    }

    pub fn plant(&mut self) -> &mut P {
        &mut self.plant
    }

    #[must_use]
    pub const fn telemetry(&self) -> &TelemetryRecorder<Millis> {
        &self.telemetry
    }

    /// Changes state and records the transition.
    pub fn set_state(&mut self, to: DeviceState, now: Millis) {
        if let Some(from) = self.lifecycle.transition(to, now) {
            self.telemetry
                .record(ControlEvent::StateChanged { from, to }, now);
        }
    }

    pub fn record(&mut self, event: ControlEvent, now: Millis) {
        self.telemetry.record(event, now);
    }

    /// Records a refused command and hands the rejection back to the caller.
    pub fn refuse(
        &mut self,
        action: &'static str,
        rejection: CommandRejection,
        now: Millis,
    ) -> CommandRejection {
        self.record(ControlEvent::CommandRejected { action }, now);
        rejection
    }

    /// Refuses `action` unless the device is in one of `allowed`.
    pub fn require(
        &mut self,
        action: &'static str,
        allowed: &[DeviceState],
        now: Millis,
    ) -> Result<(), CommandRejection> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(self.refuse(
                action,
                CommandRejection::IllegalTransition { action, state },
                now,
            ))
        }
    }

    /// Applies a setpoint after checking the zone's accepted range.
    pub fn checked_setpoint(
        &mut self,
        zone: u8,
        value: f32,
        (min, max): (f32, f32),
        now: Millis,
    ) -> Result<(), CommandRejection> {
        if !(min..=max).contains(&value) {
            return Err(self.refuse(
                "setpoint",
                CommandRejection::SetpointOutOfRange {
                    zone,
                    value,
                    min,
                    max,
                },
                now,
            ));
        }
        self.plant.apply_setpoint(zone, value);
        self.record(ControlEvent::SetpointChanged { zone, value }, now);
        Ok(())
    }
}

/// Uniform command contract for every instrument.
pub trait Device {
    fn kind(&self) -> DeviceKind;

    fn state(&self) -> DeviceState;

    /// Configures and starts a run. Legal from `Idle`.
    fn start(&mut self, params: &StartParams<'_>, now: Millis) -> Result<(), CommandRejection>;

    /// Abandons the run immediately and returns the plant to ambient.
    fn stop(&mut self, now: Millis);

    /// Legal from `Running`.
    fn pause(&mut self, now: Millis) -> Result<(), CommandRejection>;

    /// Legal from `Paused`.
    fn resume(&mut self, now: Millis) -> Result<(), CommandRejection>;

    /// Skips to the next protocol stage.
    fn advance_stage(&mut self, now: Millis) -> Result<(), CommandRejection> {
        let _ = now;
        Err(CommandRejection::Unsupported("next"))
    }

    fn set_setpoint(&mut self, zone: u8, value: f32, now: Millis) -> Result<(), CommandRejection>;

    /// One control period.
    fn tick(&mut self, now: Millis);

    fn status(&mut self, now: Millis) -> DeviceStatus;

    fn alarms(&self) -> Option<&AlarmMonitor> {
        None
    }

    fn acknowledge_alarm(&mut self, index: usize, now: Millis) -> Result<(), CommandRejection> {
        let _ = (index, now);
        Err(CommandRejection::Unsupported("ack"))
    }

    /// Returns how many alarms were newly acknowledged.
    fn acknowledge_all(&mut self, now: Millis) -> Result<usize, CommandRejection> {
        let _ = now;
        Err(CommandRejection::Unsupported("ack"))
    }

    fn telemetry(&self) -> &TelemetryRecorder<Millis>;
}

/// Any of the supported instruments, selected at runtime.
#[allow(clippy::large_enum_variant)]
pub enum InstrumentDevice<P> {
    Pcr(PcrDevice<P>),
    Incubator(IncubatorDevice<P>),
    Dummy(DummyDevice<P>),
}

impl<P: Plant> InstrumentDevice<P> {
    #[must_use]
    pub fn new(kind: DeviceKind, plant: P) -> Self {
        match kind {
            DeviceKind::Pcr => InstrumentDevice::Pcr(PcrDevice::new(plant)),
            DeviceKind::Incubator => InstrumentDevice::Incubator(IncubatorDevice::new(plant)),
            DeviceKind::Dummy => InstrumentDevice::Dummy(DummyDevice::new(plant)),
        }
    }

    pub fn plant(&mut self) -> &mut P {
        match self {
            InstrumentDevice::Pcr(device) => device.plant(),
            InstrumentDevice::Incubator(device) => device.plant(),
            InstrumentDevice::Dummy(device) => device.plant(),
        }
    }
}

macro_rules! dispatch {
    ($self:expr, $device:ident => $body:expr) => {
        match $self {
            InstrumentDevice::Pcr($device) => $body,
            InstrumentDevice::Incubator($device) => $body,
            InstrumentDevice::Dummy($device) => $body,
        }
    };
}

impl<P: Plant> Device for InstrumentDevice<P> {
    fn kind(&self) -> DeviceKind {
        dispatch!(self, device => device.kind())
    }

    fn state(&self) -> DeviceState {
        dispatch!(self, device => device.state())
    }

    fn start(&mut self, params: &StartParams<'_>, now: Millis) -> Result<(), CommandRejection> {
        dispatch!(self, device => device.start(params, now))
    }

    fn stop(&mut self, now: Millis) {
        dispatch!(self, device => device.stop(now));
    }

    fn pause(&mut self, now: Millis) -> Result<(), CommandRejection> {
        dispatch!(self, device => device.pause(now))
    }

    fn resume(&mut self, now: Millis) -> Result<(), CommandRejection> {
        dispatch!(self, device => device.resume(now))
    }

    fn advance_stage(&mut self, now: Millis) -> Result<(), CommandRejection> {
        dispatch!(self, device => device.advance_stage(now))
    }

    fn set_setpoint(&mut self, zone: u8, value: f32, now: Millis) -> Result<(), CommandRejection> {
        dispatch!(self, device => device.set_setpoint(zone, value, now))
    }

    fn tick(&mut self, now: Millis) {
        dispatch!(self, device => device.tick(now));
    }

    fn status(&mut self, now: Millis) -> DeviceStatus {
        dispatch!(self, device => device.status(now))
    }

    fn alarms(&self) -> Option<&AlarmMonitor> {
        dispatch!(self, device => device.alarms())
    }

    fn acknowledge_alarm(&mut self, index: usize, now: Millis) -> Result<(), CommandRejection> {
        dispatch!(self, device => device.acknowledge_alarm(index, now))
    }

    fn acknowledge_all(&mut self, now: Millis) -> Result<usize, CommandRejection> {
        dispatch!(self, device => device.acknowledge_all(now))
    }

    fn telemetry(&self) -> &TelemetryRecorder<Millis> {
        dispatch!(self, device => device.telemetry())
    }
}
