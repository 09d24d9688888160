//! Single-zone bench instrument used to exercise hosts without a process.

use heapless::Vec;

use super::params::StartParams;
use super::status::{Activity, DeviceStatus, ZoneStatus};
use super::{CommandRejection, Device, DeviceContext, DeviceKind, DeviceState};
use crate::environment::Plant;
use crate::telemetry::TelemetryRecorder;
use crate::thermal::AMBIENT_TEMPERATURE;
use crate::timing::Millis;

pub const SETPOINT_RANGE: (f32, f32) = (0.0, 100.0);

pub const START_KEYS: [&str; 1] = ["setpoint"];

pub struct DummyDevice<P> {
    context: DeviceContext<P>,
}

impl<P: Plant> DummyDevice<P> {
    #[must_use]
    pub fn new(plant: P) -> Self {
        Self {
            context: DeviceContext::new(plant),
        }
    }

    pub fn plant(&mut self) -> &mut P {
        self.context.plant()
    }
}

impl<P: Plant> Device for DummyDevice<P> {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Dummy
    }

    fn state(&self) -> DeviceState {
        self.context.state()
    }

    fn start(&mut self, params: &StartParams<'_>, now: Millis) -> Result<(), CommandRejection> {
        self.context.require("start", &[DeviceState::Idle], now)?;
        let setpoint = params
            .ensure_known(&START_KEYS)
            .and_then(|()| params.number("setpoint"))
            .map_err(|error| self.context.refuse("start", error, now))?;
        if let Some(value) = setpoint {
            self.context.checked_setpoint(0, value, SETPOINT_RANGE, now)?;
        }
        self.context.set_state(DeviceState::Running, now);
        Ok(())
    }

    fn stop(&mut self, now: Millis) {
        self.context.set_state(DeviceState::Stopping, now);
        self.context.plant().apply_setpoint(0, AMBIENT_TEMPERATURE);
        self.context.set_state(DeviceState::Idle, now);
    }

    fn pause(&mut self, now: Millis) -> Result<(), CommandRejection> {
        self.context.require("pause", &[DeviceState::Running], now)?;
        self.context.set_state(DeviceState::Paused, now);
        Ok(())
    }

    fn resume(&mut self, now: Millis) -> Result<(), CommandRejection> {
        self.context.require("resume", &[DeviceState::Paused], now)?;
        self.context.set_state(DeviceState::Running, now);
        Ok(())
    }

    fn set_setpoint(&mut self, zone: u8, value: f32, now: Millis) -> Result<(), CommandRejection> {
        if zone != 0 {
            return Err(self
                .context
                .refuse("setpoint", CommandRejection::InvalidZone(zone), now));
        }
        self.context.checked_setpoint(0, value, SETPOINT_RANGE, now)
    }

    fn tick(&mut self, _now: Millis) {}

    fn status(&mut self, now: Millis) -> DeviceStatus {
        let reading = self.context.plant().read(0, now);
        let mut zones = Vec::new();
        let _ = zones.push(ZoneStatus {
            name: "Temperature",
            unit: "C",
            reading,
            setpoint: self.context.plant().setpoint(0),
        });
        let state = self.context.state();
        DeviceStatus {
            kind: DeviceKind::Dummy,
            state,
            uptime: self.context.uptime(now),
            zones,
            activity: if state.is_engaged() {
                Activity::Manual
            } else {
                Activity::Idle
            },
            alarms: None,
        }
    }

    fn telemetry(&self) -> &TelemetryRecorder<Millis> {
        self.context.telemetry()
    }
}
