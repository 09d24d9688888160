//! Cell-culture incubator: protocol sequencing, alarms and stability.

use core::time::Duration;

use heapless::Vec;

use super::params::StartParams;
use super::status::{Activity, AlarmSummary, DeviceStatus, ProtocolActivity, ZoneStatus};
use super::{CommandRejection, Device, DeviceContext, DeviceKind, DeviceState};
use crate::alarms::{AcknowledgeError, AlarmChange, AlarmMonitor};
use crate::environment::{Plant, Readings, StabilityChange, StabilityTracker, Variable};
use crate::protocol::templates;
use crate::protocol::{
    AlarmSeeds, EnvironmentProtocol, ProtocolSequencer, ProtocolStage, SequencerError,
    SequencerEvent, SequencerState,
};
use crate::telemetry::{ControlEvent, TelemetryRecorder};
use crate::timing::Millis;

/// Targets of a custom run when none are given.
pub const DEFAULT_TARGETS: Readings = Readings::new(37.0, 95.0, 5.0);

/// Accepted manual setpoints per zone (temperature, humidity, CO₂).
pub const ZONE_RANGES: [(f32, f32); 3] = [(4.0, 50.0), (0.0, 100.0), (0.0, 20.0)];

const CUSTOM_KEYS: [&str; 5] = ["temperature", "humidity", "co2Level", "duration", "rampTime"];

/// Keys accepted by `start`.
pub const START_KEYS: [&str; 11] = [
    "template",
    "temperature",
    "humidity",
    "co2Level",
    "duration",
    "rampTime",
    "tempAlarmHigh",
    "tempAlarmLow",
    "humidityAlarmLow",
    "co2AlarmHigh",
    "co2AlarmLow",
];

/// Builds the protocol described by `params`.
///
/// `template=<name>` selects a built-in protocol; otherwise a single custom
/// stage is assembled from the target keys. Alarm keys override the seeds in
/// both cases.
pub fn protocol_from_params(
    params: &StartParams<'_>,
) -> Result<EnvironmentProtocol, CommandRejection> {
    params.ensure_known(&START_KEYS)?;

    let mut protocol = if let Some(name) = params.text("template")? {
        if let Some(key) = CUSTOM_KEYS
            .into_iter()
            .find(|key| params.get(key).is_some())
        {
            return Err(CommandRejection::InvalidParameter(key));
        }
        templates::find(name)
            .ok_or(CommandRejection::UnknownTemplate)?
            .instantiate()
    } else {
        let mut targets = DEFAULT_TARGETS;
        for (variable, key) in Variable::ALL.into_iter().zip(CUSTOM_KEYS) {
            if let Some(value) = params.number(key)? {
                targets.set(variable, value);
            }
        }
        let duration = params.seconds("duration")?.unwrap_or(Duration::ZERO);
        let ramp = params.seconds("rampTime")?.unwrap_or(Duration::ZERO);
        let stage = ProtocolStage {
            name: "Custom",
            targets,
            duration,
            ramp_enabled: !ramp.is_zero(),
            ramp_duration: ramp,
        };
        EnvironmentProtocol::new("Custom", &[stage], AlarmSeeds::default())
    };

    let seeds = &mut protocol.seeds;
    for (key, seed) in [
        ("tempAlarmHigh", &mut seeds.temp_high),
        ("tempAlarmLow", &mut seeds.temp_low),
        ("humidityAlarmLow", &mut seeds.humidity_low),
        ("co2AlarmHigh", &mut seeds.co2_high),
        ("co2AlarmLow", &mut seeds.co2_low),
    ] {
        if let Some(value) = params.number(key)? {
            *seed = value;
        }
    }

    Ok(protocol)
}

fn stage_event(event: SequencerEvent) -> ControlEvent {
    let index_u8 = |index: usize| u8::try_from(index).unwrap_or(u8::MAX);
    match event {
        SequencerEvent::StageEntered {
            index,
            name,
            preheating,
        } => ControlEvent::StageEntered {
            index: index_u8(index),
            name,
            preheating,
        },
        SequencerEvent::PreheatComplete { index } => ControlEvent::PreheatComplete {
            index: index_u8(index),
        },
        SequencerEvent::ProtocolComplete => ControlEvent::ProtocolComplete,
    }
}

pub struct IncubatorDevice<P> {
    context: DeviceContext<P>,
    sequencer: ProtocolSequencer,
    alarms: AlarmMonitor,
    stability: StabilityTracker,
}

impl<P: Plant> IncubatorDevice<P> {
    #[must_use]
    pub fn new(plant: P) -> Self {
        Self {
            context: DeviceContext::new(plant),
            sequencer: ProtocolSequencer::new(),
            alarms: AlarmMonitor::default(),
            stability: StabilityTracker::new(),
        }
    }

    #[must_use]
    pub const fn sequencer(&self) -> &ProtocolSequencer {
        &self.sequencer
    }

    #[must_use]
    pub const fn stability(&self) -> &StabilityTracker {
        &self.stability
    }

    pub fn plant(&mut self) -> &mut P {
        self.context.plant()
    }

    /// Starts an already assembled protocol. Legal from `Idle`.
    pub fn start_protocol(
        &mut self,
        protocol: EnvironmentProtocol,
        now: Millis,
    ) -> Result<(), CommandRejection> {
        self.context.require("start", &[DeviceState::Idle], now)?;
        self.begin_protocol(protocol, now)
    }

    fn begin_protocol(
        &mut self,
        protocol: EnvironmentProtocol,
        now: Millis,
    ) -> Result<(), CommandRejection> {
        self.context.set_state(DeviceState::Starting, now);

        self.retire_alarms(now);
        self.alarms.set_thresholds(protocol.seeds.thresholds());
        self.stability.reset();

        match self.sequencer.start(protocol, now, self.context.plant()) {
            Ok(event) => {
                self.context.set_state(DeviceState::Running, now);
                self.context.record(stage_event(event), now);
                Ok(())
            }
            Err(SequencerError::EmptyProtocol) => {
                self.context.record(ControlEvent::ProtocolRejected, now);
                self.context.set_state(DeviceState::Idle, now);
                Err(self
                    .context
                    .refuse("start", CommandRejection::EmptyProtocol, now))
            }
        }
    }

    fn retire_alarms(&mut self, now: Millis) {
        for alarm in self.alarms.clear_all() {
            self.context
                .record(ControlEvent::AlarmCleared { kind: alarm.kind }, now);
        }
    }

    fn record_sequencer_event(&mut self, event: SequencerEvent, now: Millis) {
        self.context.record(stage_event(event), now);
        if event == SequencerEvent::ProtocolComplete {
            self.context.set_state(DeviceState::Idle, now);
        }
    }

    fn record_alarm_change(&mut self, change: AlarmChange, now: Millis) {
        let event = match change {
            AlarmChange::Raised(alarm) => ControlEvent::alarm_raised(&alarm),
            AlarmChange::SeverityChanged { alarm, previous } => {
                ControlEvent::AlarmSeverityChanged {
                    kind: alarm.kind,
                    from: previous,
                    to: alarm.severity,
                }
            }
            AlarmChange::Cleared(alarm) => ControlEvent::AlarmCleared { kind: alarm.kind },
        };
        self.context.record(event, now);
    }
}

impl<P: Plant> Device for IncubatorDevice<P> {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Incubator
    }

    fn state(&self) -> DeviceState {
        self.context.state()
    }

    fn start(&mut self, params: &StartParams<'_>, now: Millis) -> Result<(), CommandRejection> {
        self.context.require("start", &[DeviceState::Idle], now)?;
        let protocol = protocol_from_params(params)
            .map_err(|error| self.context.refuse("start", error, now))?;
        self.begin_protocol(protocol, now)
    }

    fn stop(&mut self, now: Millis) {
        self.context.set_state(DeviceState::Stopping, now);
        self.sequencer.stop();
        self.retire_alarms(now);
        self.stability.reset();
        for variable in Variable::ALL {
            self.sequencer.override_target(
                variable,
                Readings::AMBIENT.get(variable),
                now,
                self.context.plant(),
            );
        }
        self.context.set_state(DeviceState::Idle, now);
    }

    fn pause(&mut self, now: Millis) -> Result<(), CommandRejection> {
        self.context.require("pause", &[DeviceState::Running], now)?;
        self.sequencer.pause(now);
        self.context.set_state(DeviceState::Paused, now);
        Ok(())
    }

    fn resume(&mut self, now: Millis) -> Result<(), CommandRejection> {
        self.context.require("resume", &[DeviceState::Paused], now)?;
        self.sequencer.resume(now);
        self.context.set_state(DeviceState::Running, now);
        Ok(())
    }

    fn advance_stage(&mut self, now: Millis) -> Result<(), CommandRejection> {
        self.context.require("next", &[DeviceState::Running], now)?;
        if let Some(event) = self.sequencer.next_stage(now, self.context.plant()) {
            self.stability.reset();
            self.record_sequencer_event(event, now);
        }
        Ok(())
    }

    fn set_setpoint(&mut self, zone: u8, value: f32, now: Millis) -> Result<(), CommandRejection> {
        let (Some(variable), Some(&range)) = (
            Variable::from_zone(zone),
            ZONE_RANGES.get(usize::from(zone)),
        ) else {
            return Err(self
                .context
                .refuse("setpoint", CommandRejection::InvalidZone(zone), now));
        };
        self.context.checked_setpoint(zone, value, range, now)?;
        self.sequencer
            .override_target(variable, value, now, self.context.plant());
        self.stability.reset();
        Ok(())
    }

    fn tick(&mut self, now: Millis) {
        if self.context.state() != DeviceState::Running {
            return;
        }

        for event in self.sequencer.update(now, self.context.plant()) {
            if matches!(event, SequencerEvent::StageEntered { .. }) {
                self.stability.reset();
            }
            self.record_sequencer_event(event, now);
        }

        let readings = Readings::sample(self.context.plant(), now);
        let targets = self.sequencer.current_targets(now);

        if self.sequencer.state() == SequencerState::Running {
            for change in self.alarms.check_alarms(&readings, &targets, now) {
                self.record_alarm_change(change, now);
            }
        }

        match self.stability.update(&readings, &targets, now) {
            Some(StabilityChange::Achieved) => {
                self.context.record(ControlEvent::StabilityAchieved, now);
            }
            Some(StabilityChange::Lost) => self.context.record(ControlEvent::StabilityLost, now),
            None => {}
        }
    }

    fn status(&mut self, now: Millis) -> DeviceStatus {
        let mut zones = Vec::new();
        for variable in Variable::ALL {
            let zone = variable.zone();
            let reading = self.context.plant().read(zone, now);
            let _ = zones.push(ZoneStatus {
                name: variable.name(),
                unit: variable.unit(),
                reading,
                setpoint: self.context.plant().setpoint(zone),
            });
        }

        let state = self.context.state();
        let sequencer = &self.sequencer;
        let activity = match sequencer.protocol() {
            Some(protocol) if state.is_engaged() => Activity::Protocol(ProtocolActivity {
                protocol: protocol.name,
                state: sequencer.state(),
                stage_index: sequencer.current_stage_index(),
                stage_count: sequencer.stage_count(),
                stage: sequencer.current_stage().map(|stage| stage.name),
                stage_remaining: sequencer.stage_time_remaining(now),
                progress: sequencer.progress(now),
                stable_for: self.stability.stable_for(now),
            }),
            _ => Activity::Idle,
        };

        DeviceStatus {
            kind: DeviceKind::Incubator,
            state,
            uptime: self.context.uptime(now),
            zones,
            activity,
            alarms: Some(AlarmSummary::from_monitor(&self.alarms)),
        }
    }

    fn alarms(&self) -> Option<&AlarmMonitor> {
        Some(&self.alarms)
    }

    fn acknowledge_alarm(&mut self, index: usize, now: Millis) -> Result<(), CommandRejection> {
        match self.alarms.acknowledge(index) {
            Ok(_) => {
                self.context
                    .record(ControlEvent::AlarmsAcknowledged { count: 1 }, now);
                Ok(())
            }
            Err(AcknowledgeError::NoSuchAlarm { index, active }) => Err(self.context.refuse(
                "ack",
                CommandRejection::NoSuchAlarm { index, active },
                now,
            )),
        }
    }

    fn acknowledge_all(&mut self, now: Millis) -> Result<usize, CommandRejection> {
        let count = self.alarms.acknowledge_all();
        if count > 0 {
            let count = u8::try_from(count).unwrap_or(u8::MAX);
            self.context
                .record(ControlEvent::AlarmsAcknowledged { count }, now);
        }
        Ok(count)
    }

    fn telemetry(&self) -> &TelemetryRecorder<Millis> {
        self.context.telemetry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarms::{AlarmKind, Severity};
    use crate::device::ParamValue;
    use crate::environment::NoopPlant;

    /// Plant that reports fixed readings regardless of setpoints.
    #[derive(Default)]
    struct StuckPlant {
        readings: Readings,
        setpoints: [f32; 3],
    }

    impl Plant for StuckPlant {
        fn read(&mut self, zone: u8, _now: Millis) -> f32 {
            Variable::from_zone(zone).map_or(0.0, |variable| self.readings.get(variable))
        }

        fn apply_setpoint(&mut self, zone: u8, value: f32) {
            if let Some(slot) = self.setpoints.get_mut(usize::from(zone)) {
                *slot = value;
            }
        }

        fn setpoint(&self, zone: u8) -> f32 {
            self.setpoints.get(usize::from(zone)).copied().unwrap_or_default()
        }
    }

    fn params(entries: &[(&'static str, ParamValue<'static>)]) -> StartParams<'static> {
        let mut params = StartParams::new();
        for (key, value) in entries {
            params.push(key, *value).expect("capacity");
        }
        params
    }

    #[test]
    fn custom_protocol_uses_defaults_and_overrides() {
        let protocol = protocol_from_params(&params(&[
            ("temperature", ParamValue::Number(30.0)),
            ("rampTime", ParamValue::Number(60.0)),
            ("co2AlarmHigh", ParamValue::Number(6.0)),
        ]))
        .expect("valid");
        let stage = protocol.stages[0];
        assert_eq!(stage.targets, Readings::new(30.0, 95.0, 5.0));
        assert!(stage.ramp_enabled);
        assert!(stage.is_indefinite());
        assert!((protocol.seeds.co2_high - 6.0).abs() < f32::EPSILON);
    }

    #[test]
    fn template_cannot_mix_with_custom_targets() {
        assert_eq!(
            protocol_from_params(&params(&[
                ("template", ParamValue::Text("yeast")),
                ("humidity", ParamValue::Number(40.0)),
            ])),
            Err(CommandRejection::InvalidParameter("humidity"))
        );
        assert_eq!(
            protocol_from_params(&params(&[("template", ParamValue::Text("plasma"))])),
            Err(CommandRejection::UnknownTemplate)
        );
    }

    #[test]
    fn start_checks_the_state_once() {
        let rejections = |device: &IncubatorDevice<NoopPlant>| {
            device
                .telemetry()
                .oldest_first()
                .filter(|record| matches!(record.event, ControlEvent::CommandRejected { .. }))
                .count()
        };
        let mut device = IncubatorDevice::new(NoopPlant::new());
        device
            .start(&params(&[("template", ParamValue::Text("yeast"))]), Millis(0))
            .expect("idle device starts");
        assert_eq!(device.state(), DeviceState::Running);
        assert_eq!(rejections(&device), 0);

        let again = device.start(&params(&[("template", ParamValue::Text("yeast"))]), Millis(10));
        assert_eq!(
            again,
            Err(CommandRejection::IllegalTransition {
                action: "start",
                state: DeviceState::Running,
            })
        );
        assert_eq!(rejections(&device), 1);

        let protocol = protocol_from_params(&params(&[])).expect("defaults");
        assert!(device.start_protocol(protocol, Millis(20)).is_err());
        assert_eq!(rejections(&device), 2);
        assert_eq!(device.state(), DeviceState::Running);
    }

    #[test]
    fn empty_protocol_leaves_device_idle() {
        let mut device = IncubatorDevice::new(NoopPlant::new());
        let empty = EnvironmentProtocol::new("Empty", &[], AlarmSeeds::default());
        assert_eq!(
            device.start_protocol(empty, Millis(0)),
            Err(CommandRejection::EmptyProtocol)
        );
        assert_eq!(device.state(), DeviceState::Idle);
        assert_eq!(device.sequencer().state(), SequencerState::Idle);
    }

    #[test]
    fn template_run_completes_to_idle() {
        let mut device = IncubatorDevice::new(NoopPlant::new());
        let protocol = EnvironmentProtocol::new(
            "Short",
            &[
                ProtocolStage::hold("A", Readings::new(30.0, 60.0, 1.0), 2),
                ProtocolStage::hold("B", Readings::new(32.0, 60.0, 1.0), 2),
            ],
            AlarmSeeds::new(40.0, 20.0, 10.0, 10.0, 0.5),
        );
        device.start_protocol(protocol, Millis(0)).expect("start");
        for step in 1..=50 {
            device.tick(Millis(step * 100));
        }
        assert_eq!(device.state(), DeviceState::Idle);
        assert_eq!(device.sequencer().state(), SequencerState::Complete);
        assert_eq!(device.plant().commanded(0), Some(32.0));
    }

    #[test]
    fn sustained_deviation_raises_one_alarm() {
        let plant = StuckPlant {
            readings: Readings::new(39.5, 95.0, 5.0),
            ..StuckPlant::default()
        };
        let mut device = IncubatorDevice::new(plant);
        device
            .start(&params(&[("template", ParamValue::Text("mammalian"))]), Millis(0))
            .expect("start");
        // Skip the pre-heat stage so the sequencer is running.
        device.advance_stage(Millis(0)).expect("next");

        for step in 1..=5 {
            device.tick(Millis(step * 100));
        }
        let alarms = device.alarms().expect("incubator has alarms");
        assert_eq!(alarms.active_count(), 1);
        let alarm = alarms.active_alarms()[0];
        assert_eq!(alarm.kind, AlarmKind::TemperatureHigh);
        assert_eq!(alarm.severity, Severity::Critical);

        assert_eq!(device.acknowledge_all(Millis(600)), Ok(1));
        assert!(device.acknowledge_alarm(3, Millis(600)).is_err());

        device.stop(Millis(700));
        let alarms = device.alarms().expect("incubator has alarms");
        assert_eq!(alarms.active_count(), 0);
        assert_eq!(alarms.history_len(), 1);
        assert!((device.plant().setpoint(1) - 50.0).abs() < f32::EPSILON);
    }

    #[test]
    fn alarms_wait_for_preheat() {
        let plant = StuckPlant {
            readings: Readings::new(20.0, 95.0, 5.0),
            ..StuckPlant::default()
        };
        let mut device = IncubatorDevice::new(plant);
        device
            .start(&params(&[("template", ParamValue::Text("mammalian"))]), Millis(0))
            .expect("start");
        for step in 1..=10 {
            device.tick(Millis(step * 100));
        }
        assert_eq!(device.sequencer().state(), SequencerState::Preheating);
        assert_eq!(device.alarms().map(AlarmMonitor::active_count), Some(0));
    }

    #[test]
    fn manual_setpoint_resets_stability() {
        let mut device = IncubatorDevice::new(NoopPlant::new());
        device.start(&StartParams::new(), Millis(0)).expect("start");
        device.tick(Millis(100));
        assert_eq!(device.stability().stable_since(), Some(Millis(100)));

        assert!(device.set_setpoint(0, 55.0, Millis(150)).is_err());
        assert_eq!(
            device.set_setpoint(7, 1.0, Millis(150)),
            Err(CommandRejection::InvalidZone(7))
        );
        device.set_setpoint(0, 30.0, Millis(200)).expect("in range");
        assert_eq!(device.stability().stable_since(), None);
        let targets = device.sequencer().current_targets(Millis(300));
        assert!((targets.temperature - 30.0).abs() < f32::EPSILON);
    }

    #[test]
    fn status_reports_stage_progress() {
        let mut device = IncubatorDevice::new(NoopPlant::new());
        device
            .start(
                &params(&[("duration", ParamValue::Number(10.0))]),
                Millis(0),
            )
            .expect("start");
        device.tick(Millis(5_000));
        let status = device.status(Millis(5_000));
        match status.activity {
            Activity::Protocol(protocol) => {
                assert_eq!(protocol.protocol, "Custom");
                assert_eq!(protocol.stage, Some("Custom"));
                assert_eq!(protocol.stage_remaining, Some(Duration::from_secs(5)));
                assert!((protocol.progress - 50.0).abs() < 0.01);
                assert_eq!(protocol.stable_for, Some(Duration::ZERO));
            }
            other => panic!("expected protocol activity, got {other:?}"),
        }
        assert_eq!(status.alarms.map(|summary| summary.count), Some(0));
    }
}
