//! Environmental process variables and the plant seam.
//!
//! A [`Plant`] is the sensor/actuator side of an instrument: engines write
//! setpoints into it and read back the live process value per zone. Value
//! generation (physical or simulated) lives behind this trait.

use core::fmt;
use core::time::Duration;

use crate::timing::{Millis, duration_millis};

/// Controlled variables of an environmental chamber, in zone order.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Variable {
    Temperature,
    Humidity,
    Co2,
}

impl Variable {
    pub const ALL: [Variable; 3] = [Variable::Temperature, Variable::Humidity, Variable::Co2];

    #[must_use]
    pub const fn zone(self) -> u8 {
        match self {
            Variable::Temperature => 0,
            Variable::Humidity => 1,
            Variable::Co2 => 2,
        }
    }

    #[must_use]
    pub const fn from_zone(zone: u8) -> Option<Self> {
        match zone {
            0 => Some(Variable::Temperature),
            1 => Some(Variable::Humidity),
            2 => Some(Variable::Co2),
            _ => None,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Variable::Temperature => "temperature",
            Variable::Humidity => "humidity",
            Variable::Co2 => "co2",
        }
    }

    #[must_use]
    pub const fn unit(self) -> &'static str {
        match self {
            Variable::Temperature => "C",
            Variable::Humidity => "%RH",
            Variable::Co2 => "%",
        }
    }

    /// Deviation within which the variable counts as stable.
    #[must_use]
    pub const fn stability_threshold(self) -> f32 {
        match self {
            Variable::Temperature => 0.5,
            Variable::Humidity => 2.0,
            Variable::Co2 => 0.3,
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One value per environmental variable.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Readings {
    pub temperature: f32,
    pub humidity: f32,
    pub co2: f32,
}

impl Readings {
    /// Room conditions the chamber returns to when idle.
    pub const AMBIENT: Self = Self::new(25.0, 50.0, 0.04);

    #[must_use]
    pub const fn new(temperature: f32, humidity: f32, co2: f32) -> Self {
        Self {
            temperature,
            humidity,
            co2,
        }
    }

    #[must_use]
    pub const fn get(&self, variable: Variable) -> f32 {
        match variable {
            Variable::Temperature => self.temperature,
            Variable::Humidity => self.humidity,
            Variable::Co2 => self.co2,
        }
    }

    pub fn set(&mut self, variable: Variable, value: f32) {
        match variable {
            Variable::Temperature => self.temperature = value,
            Variable::Humidity => self.humidity = value,
            Variable::Co2 => self.co2 = value,
        }
    }

    /// Samples every variable from `plant`.
    pub fn sample<P: Plant + ?Sized>(plant: &mut P, now: Millis) -> Self {
        Self::new(
            plant.read(Variable::Temperature.zone(), now),
            plant.read(Variable::Humidity.zone(), now),
            plant.read(Variable::Co2.zone(), now),
        )
    }
}

/// Sensor/actuator abstraction consumed by the control engines.
pub trait Plant {
    /// Current process value of `zone`.
    fn read(&mut self, zone: u8, now: Millis) -> f32;

    /// Commands a new setpoint for `zone`.
    fn apply_setpoint(&mut self, zone: u8, value: f32);

    /// Last setpoint commanded for `zone`.
    fn setpoint(&self, zone: u8) -> f32;
}

impl<T: Plant + ?Sized> Plant for &mut T {
    fn read(&mut self, zone: u8, now: Millis) -> f32 {
        (**self).read(zone, now)
    }

    fn apply_setpoint(&mut self, zone: u8, value: f32) {
        (**self).apply_setpoint(zone, value);
    }

    fn setpoint(&self, zone: u8) -> f32 {
        (**self).setpoint(zone)
    }
}

/// Most zones a plant tracks.
pub const MAX_PLANT_ZONES: usize = 4;

/// Plant whose readings always equal the last commanded setpoint.
#[derive(Clone, Debug, Default)]
pub struct NoopPlant {
    setpoints: [f32; MAX_PLANT_ZONES],
}

impl NoopPlant {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            setpoints: [0.0; MAX_PLANT_ZONES],
        }
    }

    #[must_use]
    pub fn commanded(&self, zone: u8) -> Option<f32> {
        self.setpoints.get(usize::from(zone)).copied()
    }
}

impl Plant for NoopPlant {
    fn read(&mut self, zone: u8, _now: Millis) -> f32 {
        self.commanded(zone).unwrap_or_default()
    }

    fn apply_setpoint(&mut self, zone: u8, value: f32) {
        if let Some(slot) = self.setpoints.get_mut(usize::from(zone)) {
            *slot = value;
        }
    }

    fn setpoint(&self, zone: u8) -> f32 {
        self.commanded(zone).unwrap_or_default()
    }
}

/// Simulated plant where every zone approaches its setpoint with a
/// first-order lag.
///
/// Each read moves the value by `(setpoint - value) * min(1, dt / tau)`.
#[derive(Clone, Debug)]
pub struct FirstOrderPlant {
    values: [f32; MAX_PLANT_ZONES],
    setpoints: [f32; MAX_PLANT_ZONES],
    time_constants: [Duration; MAX_PLANT_ZONES],
    updated: [Millis; MAX_PLANT_ZONES],
}

impl FirstOrderPlant {
    /// Every zone starts settled at `initial` with the same time constant.
    #[must_use]
    pub const fn new(initial: [f32; MAX_PLANT_ZONES], time_constant: Duration) -> Self {
        Self {
            values: initial,
            setpoints: initial,
            time_constants: [time_constant; MAX_PLANT_ZONES],
            updated: [Millis::ZERO; MAX_PLANT_ZONES],
        }
    }

    /// Overrides the time constant of one zone.
    #[must_use]
    pub fn with_time_constant(mut self, zone: u8, time_constant: Duration) -> Self {
        if let Some(slot) = self.time_constants.get_mut(usize::from(zone)) {
            *slot = time_constant;
        }
        self
    }

    /// Forces the process value of `zone`, as a door opening or a sensor
    /// glitch would.
    pub fn disturb(&mut self, zone: u8, value: f32) {
        if let Some(slot) = self.values.get_mut(usize::from(zone)) {
            *slot = value;
        }
    }

    fn settle(&mut self, index: usize, now: Millis) {
        let dt = duration_millis(now.saturating_duration_since(self.updated[index]));
        self.updated[index] = self.updated[index].max(now);
        let tau = duration_millis(self.time_constants[index]);
        let error = self.setpoints[index] - self.values[index];
        if tau == 0 {
            self.values[index] = self.setpoints[index];
            return;
        }
        #[allow(clippy::cast_precision_loss)]
        let alpha = (dt as f32 / tau as f32).min(1.0);
        self.values[index] += error * alpha;
    }
}

impl Plant for FirstOrderPlant {
    fn read(&mut self, zone: u8, now: Millis) -> f32 {
        let index = usize::from(zone);
        if index >= MAX_PLANT_ZONES {
            return 0.0;
        }
        self.settle(index, now);
        self.values[index]
    }

    fn apply_setpoint(&mut self, zone: u8, value: f32) {
        if let Some(slot) = self.setpoints.get_mut(usize::from(zone)) {
            *slot = value;
        }
    }

    fn setpoint(&self, zone: u8) -> f32 {
        self.setpoints
            .get(usize::from(zone))
            .copied()
            .unwrap_or_default()
    }
}

/// Change in overall chamber stability.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StabilityChange {
    Achieved,
    Lost,
}

/// Tracks whether every variable sits within its stability threshold and
/// since when.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct StabilityTracker {
    stable_since: Option<Millis>,
}

impl StabilityTracker {
    #[must_use]
    pub const fn new() -> Self {
        Self { stable_since: None }
    }

    /// Whether a single variable is within its threshold of the target.
    #[must_use]
    pub fn is_stable(variable: Variable, reading: f32, target: f32) -> bool {
        (reading - target).abs() <= variable.stability_threshold()
    }

    pub fn update(
        &mut self,
        readings: &Readings,
        targets: &Readings,
        now: Millis,
    ) -> Option<StabilityChange> {
        let stable = Variable::ALL
            .iter()
            .all(|&var| Self::is_stable(var, readings.get(var), targets.get(var)));

        match (stable, self.stable_since) {
            (true, None) => {
                self.stable_since = Some(now);
                Some(StabilityChange::Achieved)
            }
            (false, Some(_)) => {
                self.stable_since = None;
                Some(StabilityChange::Lost)
            }
            _ => None,
        }
    }

    pub fn reset(&mut self) {
        self.stable_since = None;
    }

    #[must_use]
    pub const fn stable_since(&self) -> Option<Millis> {
        self.stable_since
    }

    /// How long the chamber has been continuously stable.
    #[must_use]
    pub fn stable_for(&self, now: Millis) -> Option<Duration> {
        self.stable_since
            .map(|since| now.saturating_duration_since(since))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zones_map_to_variables() {
        for variable in Variable::ALL {
            assert_eq!(Variable::from_zone(variable.zone()), Some(variable));
        }
        assert_eq!(Variable::from_zone(3), None);
    }

    #[test]
    fn noop_plant_echoes_setpoints() {
        let mut plant = NoopPlant::new();
        plant.apply_setpoint(1, 80.0);
        assert_eq!(plant.read(1, Millis::ZERO), 80.0);
        plant.apply_setpoint(9, 1.0);
        assert_eq!(plant.read(9, Millis::ZERO), 0.0);
    }

    #[test]
    fn stability_tracks_transitions() {
        let mut tracker = StabilityTracker::new();
        let target = Readings::new(37.0, 95.0, 5.0);

        let drifting = Readings::new(36.0, 95.0, 5.0);
        assert_eq!(tracker.update(&drifting, &target, Millis(0)), None);

        let settled = Readings::new(37.4, 93.5, 5.2);
        assert_eq!(
            tracker.update(&settled, &target, Millis(1_000)),
            Some(StabilityChange::Achieved)
        );
        assert_eq!(tracker.update(&settled, &target, Millis(2_000)), None);
        assert_eq!(
            tracker.stable_for(Millis(61_000)),
            Some(Duration::from_secs(60))
        );

        let co2_off = Readings::new(37.0, 95.0, 5.5);
        assert_eq!(
            tracker.update(&co2_off, &target, Millis(62_000)),
            Some(StabilityChange::Lost)
        );
        assert_eq!(tracker.stable_since(), None);
    }

    #[test]
    fn first_order_plant_lags_behind_setpoint() {
        let mut plant = FirstOrderPlant::new([25.0; MAX_PLANT_ZONES], Duration::from_secs(10));
        plant.apply_setpoint(0, 35.0);
        let early = plant.read(0, Millis::from_secs(1));
        assert!((early - 26.0).abs() < 1e-4);
        let later = plant.read(0, Millis::from_secs(30));
        assert!((later - 35.0).abs() < 1e-4);
        assert!((plant.read(1, Millis::from_secs(30)) - 25.0).abs() < 1e-4);
    }

    #[test]
    fn disturbance_relaxes_back_to_setpoint() {
        let mut plant = FirstOrderPlant::new([37.0; MAX_PLANT_ZONES], Duration::from_secs(20))
            .with_time_constant(1, Duration::ZERO);
        plant.disturb(0, 41.0);
        plant.disturb(1, 10.0);
        assert!(plant.read(0, Millis::ZERO) > 40.9);
        assert!((plant.read(1, Millis::ZERO) - 37.0).abs() < 1e-4);
        assert!(plant.read(0, Millis::from_secs(10)) < 41.0);
    }
}
