//! PCR thermocycler: three block zones driven by a [`ThermalCycler`].

use heapless::Vec;

use super::params::StartParams;
use super::status::{
    Activity, DeviceStatus, GradientActivity, ThermalActivity, TouchdownActivity, ZoneStatus,
};
use super::{CommandRejection, Device, DeviceContext, DeviceKind, DeviceState};
use crate::environment::Plant;
use crate::telemetry::{ControlEvent, TelemetryRecorder};
use crate::thermal::{
    AMBIENT_TEMPERATURE, PhaseStep, PhaseTransition, ProgramType, SAFE_TEMPERATURE_RANGE,
    ThermalCycler, ThermalPhase, ThermalProgram,
};
use crate::timing::Millis;

pub const ZONE_NAMES: [&str; 3] = ["Denature", "Anneal", "Extend"];

/// Keys accepted by `start`.
pub const START_KEYS: [&str; 29] = [
    "programType",
    "cycles",
    "initialDenatureTemp",
    "initialDenatureTime",
    "denatureTemp",
    "denatureTime",
    "annealTemp",
    "annealTime",
    "extendTemp",
    "extendTime",
    "finalExtendTemp",
    "finalExtendTime",
    "holdTemp",
    "holdIndefinitely",
    "hotStart",
    "hotStartTemp",
    "hotStartTime",
    "twoStep",
    "annealExtendTemp",
    "annealExtendTime",
    "touchdown",
    "touchdownStart",
    "touchdownEnd",
    "touchdownStep",
    "touchdownCycles",
    "gradient",
    "gradientLow",
    "gradientHigh",
    "gradientPositions",
];

/// Builds a program from the defaults overridden by `params`.
pub fn program_from_params(params: &StartParams<'_>) -> Result<ThermalProgram, CommandRejection> {
    params.ensure_known(&START_KEYS)?;
    let mut program = ThermalProgram::default();

    if let Some(name) = params.text("programType")? {
        let kind = ProgramType::parse(name)
            .ok_or(CommandRejection::InvalidParameter("programType"))?;
        program.program_type = kind;
        match kind {
            ProgramType::Standard => {}
            ProgramType::Gradient => program.gradient.enabled = true,
            ProgramType::Touchdown => program.touchdown.enabled = true,
            ProgramType::TwoStep => program.two_step.enabled = true,
        }
    }

    if let Some(cycles) = params.count_u16("cycles")? {
        program.cycles = cycles;
    }
    override_step(
        params,
        &mut program.initial_denature,
        "initialDenatureTemp",
        "initialDenatureTime",
    )?;
    override_step(params, &mut program.denature, "denatureTemp", "denatureTime")?;
    override_step(params, &mut program.anneal, "annealTemp", "annealTime")?;
    override_step(params, &mut program.extend, "extendTemp", "extendTime")?;
    override_step(
        params,
        &mut program.final_extend,
        "finalExtendTemp",
        "finalExtendTime",
    )?;
    if let Some(hold) = params.number("holdTemp")? {
        program.hold_temperature = hold;
    }
    if let Some(forever) = params.flag("holdIndefinitely")? {
        program.hold_indefinitely = forever;
    }

    if let Some(enabled) = params.flag("hotStart")? {
        program.hot_start.enabled = enabled;
    }
    override_step(params, &mut program.hot_start.activation, "hotStartTemp", "hotStartTime")?;

    if let Some(enabled) = params.flag("twoStep")? {
        program.two_step.enabled = enabled;
    }
    override_step(
        params,
        &mut program.two_step.anneal_extend,
        "annealExtendTemp",
        "annealExtendTime",
    )?;

    let touchdown = &mut program.touchdown;
    if let Some(enabled) = params.flag("touchdown")? {
        touchdown.enabled = enabled;
    }
    if let Some(start) = params.number("touchdownStart")? {
        touchdown.start_temp = start;
    }
    if let Some(end) = params.number("touchdownEnd")? {
        touchdown.end_temp = end;
    }
    if let Some(step) = params.number("touchdownStep")? {
        touchdown.step_size = step;
    }
    if let Some(cycles) = params.count_u16("touchdownCycles")? {
        touchdown.touchdown_cycles = cycles;
    }

    let gradient = &mut program.gradient;
    if let Some(enabled) = params.flag("gradient")? {
        gradient.enabled = enabled;
    }
    if let Some(low) = params.number("gradientLow")? {
        gradient.temp_low = low;
    }
    if let Some(high) = params.number("gradientHigh")? {
        gradient.temp_high = high;
    }
    if let Some(positions) = params.count_u8("gradientPositions")? {
        gradient.positions = positions;
    }

    Ok(program)
}

fn override_step(
    params: &StartParams<'_>,
    step: &mut PhaseStep,
    temp_key: &'static str,
    time_key: &'static str,
) -> Result<(), CommandRejection> {
    if let Some(temperature) = params.number(temp_key)? {
        step.temperature = temperature;
    }
    if let Some(duration) = params.seconds(time_key)? {
        step.duration = duration;
    }
    Ok(())
}

pub struct PcrDevice<P> {
    context: DeviceContext<P>,
    cycler: ThermalCycler,
}

impl<P: Plant> PcrDevice<P> {
    #[must_use]
    pub fn new(plant: P) -> Self {
        Self {
            context: DeviceContext::new(plant),
            cycler: ThermalCycler::new(),
        }
    }

    #[must_use]
    pub const fn cycler(&self) -> &ThermalCycler {
        &self.cycler
    }

    pub fn plant(&mut self) -> &mut P {
        self.context.plant()
    }

    fn record_transition(&mut self, transition: PhaseTransition, now: Millis) {
        self.context.record(
            ControlEvent::PhaseEntered {
                phase: transition.to,
                cycle: transition.cycle,
            },
            now,
        );
    }

    fn drive_zones(&mut self, temperature: f32) {
        for (zone, _) in (0u8..).zip(ZONE_NAMES) {
            self.context.plant().apply_setpoint(zone, temperature);
        }
    }

    fn sync_zones(&mut self) {
        if self.cycler.is_running() {
            let target = self.cycler.target_temperature();
            self.drive_zones(target);
        }
    }
}

impl<P: Plant> Device for PcrDevice<P> {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Pcr
    }

    fn state(&self) -> DeviceState {
        self.context.state()
    }

    fn start(&mut self, params: &StartParams<'_>, now: Millis) -> Result<(), CommandRejection> {
        self.context.require("start", &[DeviceState::Idle], now)?;
        let program =
            program_from_params(params).map_err(|error| self.context.refuse("start", error, now))?;

        self.context.set_state(DeviceState::Starting, now);
        let warnings = match program.validate() {
            Ok(warnings) => warnings,
            Err(error) => {
                self.context.set_state(DeviceState::Idle, now);
                return Err(self.context.refuse("start", error.into(), now));
            }
        };
        for warning in warnings {
            self.context.record(ControlEvent::ProgramWarning(warning), now);
        }

        let transition = self.cycler.start(program, now);
        self.context.set_state(DeviceState::Running, now);
        self.record_transition(transition, now);
        self.sync_zones();
        Ok(())
    }

    fn stop(&mut self, now: Millis) {
        self.context.set_state(DeviceState::Stopping, now);
        self.cycler.stop();
        self.drive_zones(AMBIENT_TEMPERATURE);
        self.context.set_state(DeviceState::Idle, now);
    }

    fn pause(&mut self, now: Millis) -> Result<(), CommandRejection> {
        self.context.require("pause", &[DeviceState::Running], now)?;
        self.cycler.pause(now);
        self.context.set_state(DeviceState::Paused, now);
        Ok(())
    }

    fn resume(&mut self, now: Millis) -> Result<(), CommandRejection> {
        self.context.require("resume", &[DeviceState::Paused], now)?;
        self.cycler.resume(now);
        self.context.set_state(DeviceState::Running, now);
        Ok(())
    }

    fn set_setpoint(&mut self, zone: u8, value: f32, now: Millis) -> Result<(), CommandRejection> {
        if usize::from(zone) >= ZONE_NAMES.len() {
            return Err(self
                .context
                .refuse("setpoint", CommandRejection::InvalidZone(zone), now));
        }
        self.context
            .checked_setpoint(zone, value, SAFE_TEMPERATURE_RANGE, now)
    }

    fn tick(&mut self, now: Millis) {
        if self.context.state() != DeviceState::Running {
            return;
        }
        if let Some(transition) = self.cycler.update(now) {
            self.record_transition(transition, now);
            if transition.to == ThermalPhase::Complete {
                self.context.record(ControlEvent::ProgramComplete, now);
                self.context.set_state(DeviceState::Idle, now);
            }
        }
        self.sync_zones();
    }

    fn status(&mut self, now: Millis) -> DeviceStatus {
        let mut zones = Vec::new();
        for (zone, name) in (0u8..).zip(ZONE_NAMES) {
            let reading = self.context.plant().read(zone, now);
            let _ = zones.push(ZoneStatus {
                name,
                unit: "C",
                reading,
                setpoint: self.context.plant().setpoint(zone),
            });
        }

        let state = self.context.state();
        let activity = if state.is_engaged() {
            let cycler = &self.cycler;
            let phase = cycler.phase();
            #[allow(clippy::cast_precision_loss)]
            let stability =
                zones.iter().map(|zone| zone.error().abs()).sum::<f32>() / zones.len() as f32;
            Activity::Thermal(ThermalActivity {
                phase,
                cycle: cycler.cycle(),
                total_cycles: cycler.program().cycles,
                phase_remaining: cycler.phase_time_remaining(now),
                total_remaining: cycler.total_time_remaining(now),
                progress: cycler.progress(now),
                target: cycler.target_temperature(),
                anneal_temperature: matches!(
                    phase,
                    ThermalPhase::Anneal | ThermalPhase::AnnealExtend
                )
                .then(|| cycler.current_anneal_temperature()),
                stability,
                program_type: cycler.program().program_type,
                touchdown: TouchdownActivity::from_cycler(cycler),
                gradient: GradientActivity::from_cycler(cycler),
            })
        } else {
            Activity::Idle
        };

        DeviceStatus {
            kind: DeviceKind::Pcr,
            state,
            uptime: self.context.uptime(now),
            zones,
            activity,
            alarms: None,
        }
    }

    fn telemetry(&self) -> &TelemetryRecorder<Millis> {
        self.context.telemetry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ParamValue;
    use crate::environment::NoopPlant;

    fn params(entries: &[(&'static str, ParamValue<'static>)]) -> StartParams<'static> {
        let mut params = StartParams::new();
        for (key, value) in entries {
            params.push(key, *value).expect("capacity");
        }
        params
    }

    fn short_run() -> StartParams<'static> {
        params(&[
            ("cycles", ParamValue::Number(1.0)),
            ("initialDenatureTime", ParamValue::Number(1.0)),
            ("denatureTime", ParamValue::Number(1.0)),
            ("annealTime", ParamValue::Number(1.0)),
            ("extendTime", ParamValue::Number(1.0)),
            ("finalExtendTime", ParamValue::Number(1.0)),
        ])
    }

    #[test]
    fn parameters_override_defaults() {
        let program = program_from_params(&params(&[
            ("programType", ParamValue::Text("touchdown")),
            ("annealTemp", ParamValue::Number(58.5)),
            ("hotStart", ParamValue::Flag(true)),
        ]))
        .expect("valid parameters");
        assert!(program.touchdown.enabled);
        assert!(program.hot_start.enabled);
        assert!((program.anneal.temperature - 58.5).abs() < f32::EPSILON);
        assert_eq!(program.cycles, 35);
    }

    #[test]
    fn unknown_program_type_is_rejected() {
        assert_eq!(
            program_from_params(&params(&[("programType", ParamValue::Text("qpcr"))])),
            Err(CommandRejection::InvalidParameter("programType"))
        );
    }

    #[test]
    fn invalid_program_returns_to_idle() {
        let mut device = PcrDevice::new(NoopPlant::new());
        let result = device.start(&params(&[("cycles", ParamValue::Number(0.0))]), Millis(0));
        assert_eq!(
            result,
            Err(CommandRejection::InvalidProgram(
                crate::thermal::ProgramError::CyclesOutOfRange(0)
            ))
        );
        assert_eq!(device.state(), DeviceState::Idle);
    }

    #[test]
    fn run_drives_zones_and_completes() {
        let mut device = PcrDevice::new(NoopPlant::new());
        device.start(&short_run(), Millis(0)).expect("start");
        assert_eq!(device.state(), DeviceState::Running);
        assert_eq!(device.plant().commanded(1), Some(95.0));

        let mut now = Millis(0);
        while device.state() == DeviceState::Running && now < Millis::from_secs(60) {
            now = Millis(now.as_millis() + 100);
            device.tick(now);
        }
        assert_eq!(device.state(), DeviceState::Idle);
        assert_eq!(device.cycler().phase(), ThermalPhase::Complete);
        assert_eq!(device.plant().commanded(0), Some(4.0));
        assert!(
            device
                .telemetry()
                .oldest_first()
                .any(|record| record.event == ControlEvent::ProgramComplete)
        );
    }

    #[test]
    fn pause_requires_running() {
        let mut device = PcrDevice::new(NoopPlant::new());
        assert!(device.pause(Millis(0)).is_err());
        device.start(&short_run(), Millis(0)).expect("start");
        device.pause(Millis(500)).expect("pause");
        assert!(device.pause(Millis(600)).is_err());
        device.tick(Millis(5_000));
        assert_eq!(device.cycler().phase(), ThermalPhase::InitialDenature);
        device.resume(Millis(5_000)).expect("resume");
        device.tick(Millis(5_600));
        assert_eq!(device.cycler().phase(), ThermalPhase::Denature);
    }

    #[test]
    fn stop_returns_zones_to_ambient() {
        let mut device = PcrDevice::new(NoopPlant::new());
        device.start(&short_run(), Millis(0)).expect("start");
        device.stop(Millis(200));
        assert_eq!(device.state(), DeviceState::Idle);
        for zone in 0..3 {
            assert_eq!(device.plant().commanded(zone), Some(AMBIENT_TEMPERATURE));
        }
    }

    #[test]
    fn setpoints_are_range_checked() {
        let mut device = PcrDevice::new(NoopPlant::new());
        assert_eq!(
            device.set_setpoint(3, 60.0, Millis(0)),
            Err(CommandRejection::InvalidZone(3))
        );
        assert!(device.set_setpoint(0, 110.0, Millis(0)).is_err());
        device.set_setpoint(2, 72.0, Millis(0)).expect("in range");
        let status = device.status(Millis(0));
        assert!((status.zones[2].setpoint - 72.0).abs() < f32::EPSILON);
        assert_eq!(status.activity, Activity::Idle);
    }

    #[test]
    fn status_reports_anneal_temperature_while_annealing() {
        let mut device = PcrDevice::new(NoopPlant::new());
        device.start(&short_run(), Millis(0)).expect("start");
        device.tick(Millis(1_000));
        device.tick(Millis(2_000));
        let status = device.status(Millis(2_100));
        match status.activity {
            Activity::Thermal(thermal) => {
                assert_eq!(thermal.phase, ThermalPhase::Anneal);
                assert_eq!(thermal.anneal_temperature, Some(60.0));
                assert!(thermal.stability.abs() < f32::EPSILON);
            }
            other => panic!("expected thermal activity, got {other:?}"),
        }
    }

    #[test]
    fn status_reports_program_type_touchdown_and_gradient() {
        let mut device = PcrDevice::new(NoopPlant::new());
        let mut run = short_run();
        for (key, value) in [
            ("programType", ParamValue::Text("gradient")),
            ("touchdown", ParamValue::Flag(true)),
            ("touchdownStart", ParamValue::Number(65.0)),
            ("touchdownEnd", ParamValue::Number(60.0)),
            ("touchdownStep", ParamValue::Number(2.0)),
            ("touchdownCycles", ParamValue::Number(5.0)),
            ("gradientLow", ParamValue::Number(55.0)),
            ("gradientHigh", ParamValue::Number(65.0)),
            ("gradientPositions", ParamValue::Number(3.0)),
        ] {
            run.push(key, value).expect("capacity");
        }
        device.start(&run, Millis(0)).expect("start");

        let Activity::Thermal(thermal) = device.status(Millis(0)).activity else {
            panic!("expected thermal activity");
        };
        assert_eq!(thermal.program_type, ProgramType::Gradient);

        let touchdown = thermal.touchdown.expect("touchdown enabled");
        assert_eq!(touchdown.touchdown_cycles, 5);
        assert!((touchdown.step_size - 2.0).abs() < f32::EPSILON);
        assert!((touchdown.current_anneal - 65.0).abs() < f32::EPSILON);

        let gradient = thermal.gradient.expect("gradient enabled");
        assert_eq!(gradient.positions, 3);
        let expected = [55.0, 60.0, 65.0];
        assert_eq!(gradient.temperatures().len(), expected.len());
        for (actual, expected) in gradient.temperatures().iter().zip(expected) {
            assert!((actual - expected).abs() < 1e-4, "{actual} != {expected}");
        }
    }

    #[test]
    fn standard_status_omits_touchdown_and_gradient() {
        let mut device = PcrDevice::new(NoopPlant::new());
        device.start(&short_run(), Millis(0)).expect("start");
        let Activity::Thermal(thermal) = device.status(Millis(0)).activity else {
            panic!("expected thermal activity");
        };
        assert_eq!(thermal.program_type, ProgramType::Standard);
        assert!(thermal.touchdown.is_none());
        assert!(thermal.gradient.is_none());
    }
}
