//! Debounced deviation alarms for environmental chambers.
//!
//! [`AlarmMonitor::check_alarms`] is called once per control tick with the
//! live readings. Each monitored condition keeps its own consecutive-violation
//! counter; an alarm is raised only after [`DEBOUNCE_COUNT`] violating checks in
//! a row and is cleared on the first in-range check. Cleared alarms move into a
//! bounded history ring.

use core::fmt;
use core::time::Duration;

use heapless::{HistoryBuf, OldestOrdered, Vec};

use crate::environment::{Readings, Variable};
use crate::timing::Millis;

/// Consecutive violating checks required before an alarm is raised.
pub const DEBOUNCE_COUNT: u8 = 3;

/// Default number of cleared alarms retained in history.
pub const DEFAULT_HISTORY_SIZE: usize = 100;

/// Upper bound on simultaneously active alarms (one per kind).
pub const MAX_ACTIVE_ALARMS: usize = 8;

/// Alarm categories. At most one alarm per kind is active at a time.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AlarmKind {
    TemperatureHigh,
    TemperatureLow,
    HumidityLow,
    Co2High,
    Co2Low,
    /// Reserved; never evaluated.
    DoorOpen,
    /// Reserved; never evaluated.
    PowerFailure,
    /// Reserved; never evaluated.
    SensorFault,
}

impl AlarmKind {
    /// Kinds evaluated by [`AlarmMonitor::check_alarms`], in evaluation order.
    pub const MONITORED: [AlarmKind; 5] = [
        AlarmKind::TemperatureHigh,
        AlarmKind::TemperatureLow,
        AlarmKind::HumidityLow,
        AlarmKind::Co2High,
        AlarmKind::Co2Low,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            AlarmKind::TemperatureHigh => "Temperature High",
            AlarmKind::TemperatureLow => "Temperature Low",
            AlarmKind::HumidityLow => "Humidity Low",
            AlarmKind::Co2High => "CO2 High",
            AlarmKind::Co2Low => "CO2 Low",
            AlarmKind::DoorOpen => "Door Open",
            AlarmKind::PowerFailure => "Power Failure",
            AlarmKind::SensorFault => "Sensor Fault",
        }
    }

    /// Process variable watched by this kind, if any.
    #[must_use]
    pub const fn variable(self) -> Option<Variable> {
        match self {
            AlarmKind::TemperatureHigh | AlarmKind::TemperatureLow => Some(Variable::Temperature),
            AlarmKind::HumidityLow => Some(Variable::Humidity),
            AlarmKind::Co2High | AlarmKind::Co2Low => Some(Variable::Co2),
            AlarmKind::DoorOpen | AlarmKind::PowerFailure | AlarmKind::SensorFault => None,
        }
    }

    const fn index(self) -> usize {
        match self {
            AlarmKind::TemperatureHigh => 0,
            AlarmKind::TemperatureLow => 1,
            AlarmKind::HumidityLow => 2,
            AlarmKind::Co2High => 3,
            AlarmKind::Co2Low => 4,
            AlarmKind::DoorOpen => 5,
            AlarmKind::PowerFailure => 6,
            AlarmKind::SensorFault => 7,
        }
    }

    const fn message(self, severity: Severity) -> &'static str {
        match (self, severity) {
            (AlarmKind::TemperatureHigh, Severity::Critical) => {
                "Critical: Temperature exceeds maximum"
            }
            (AlarmKind::TemperatureHigh, Severity::Warning) => {
                "Warning: Temperature above setpoint"
            }
            (AlarmKind::TemperatureLow, Severity::Critical) => "Critical: Temperature below minimum",
            (AlarmKind::TemperatureLow, Severity::Warning) => "Warning: Temperature below setpoint",
            (AlarmKind::HumidityLow, Severity::Critical) => "Critical: Humidity critically low",
            (AlarmKind::HumidityLow, Severity::Warning) => "Warning: Humidity below setpoint",
            (AlarmKind::Co2High, Severity::Critical) => "Critical: CO2 level too high",
            (AlarmKind::Co2High, Severity::Warning) => "Warning: CO2 level above setpoint",
            (AlarmKind::Co2Low, Severity::Critical) => "Critical: CO2 level too low",
            (AlarmKind::Co2Low, Severity::Warning) => "Warning: CO2 level below setpoint",
            (AlarmKind::DoorOpen, _) => "Door open",
            (AlarmKind::PowerFailure, _) => "Power failure",
            (AlarmKind::SensorFault, _) => "Sensor fault",
        }
    }
}

impl fmt::Display for AlarmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One alarm instance, active or historical.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Alarm {
    pub kind: AlarmKind,
    pub severity: Severity,
    pub message: &'static str,
    /// Seconds on the controller clock when raised or last updated.
    pub timestamp_s: u64,
    pub active: bool,
    pub acknowledged: bool,
    /// Observed value that tripped the alarm.
    pub value: f32,
    /// Bound that was crossed.
    pub threshold: f32,
    /// Observed value minus the target at the time of the check.
    pub deviation: f32,
}

/// Warning and critical bounds per variable.
///
/// Warning bounds sit inside the critical ones. The door-open timings are
/// carried for completeness but no check consumes them.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AlarmThresholds {
    pub temp_warning_high: f32,
    pub temp_warning_low: f32,
    pub temp_critical_high: f32,
    pub temp_critical_low: f32,
    pub humidity_warning_low: f32,
    pub humidity_critical_low: f32,
    pub co2_warning_high: f32,
    pub co2_warning_low: f32,
    pub co2_critical_high: f32,
    pub co2_critical_low: f32,
    pub door_open_warning: Duration,
    pub door_open_critical: Duration,
}

impl Default for AlarmThresholds {
    fn default() -> Self {
        Self {
            temp_warning_high: 38.0,
            temp_warning_low: 36.0,
            temp_critical_high: 39.0,
            temp_critical_low: 35.0,
            humidity_warning_low: 90.0,
            humidity_critical_low: 85.0,
            co2_warning_high: 5.3,
            co2_warning_low: 4.7,
            co2_critical_high: 5.5,
            co2_critical_low: 4.5,
            door_open_warning: Duration::from_secs(30),
            door_open_critical: Duration::from_secs(120),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Direction {
    Above,
    Below,
}

impl Direction {
    fn crosses(self, value: f32, bound: f32) -> bool {
        match self {
            Direction::Above => value > bound,
            Direction::Below => value < bound,
        }
    }
}

impl AlarmThresholds {
    /// `(direction, critical, warning)` for a monitored kind.
    fn bounds(&self, kind: AlarmKind) -> Option<(Direction, f32, f32)> {
        match kind {
            AlarmKind::TemperatureHigh => Some((
                Direction::Above,
                self.temp_critical_high,
                self.temp_warning_high,
            )),
            AlarmKind::TemperatureLow => Some((
                Direction::Below,
                self.temp_critical_low,
                self.temp_warning_low,
            )),
            AlarmKind::HumidityLow => Some((
                Direction::Below,
                self.humidity_critical_low,
                self.humidity_warning_low,
            )),
            AlarmKind::Co2High => Some((
                Direction::Above,
                self.co2_critical_high,
                self.co2_warning_high,
            )),
            AlarmKind::Co2Low => Some((
                Direction::Below,
                self.co2_critical_low,
                self.co2_warning_low,
            )),
            AlarmKind::DoorOpen | AlarmKind::PowerFailure | AlarmKind::SensorFault => None,
        }
    }
}

/// Change produced by a single [`AlarmMonitor::check_alarms`] call.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum AlarmChange {
    Raised(Alarm),
    /// An active alarm moved between warning and critical.
    SeverityChanged { alarm: Alarm, previous: Severity },
    Cleared(Alarm),
}

pub type AlarmChanges = Vec<AlarmChange, { AlarmKind::MONITORED.len() }>;

/// Errors returned by acknowledgement calls.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AcknowledgeError {
    NoSuchAlarm { index: usize, active: usize },
}

impl fmt::Display for AcknowledgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcknowledgeError::NoSuchAlarm { index, active } => {
                write!(f, "no active alarm at index {index} ({active} active)")
            }
        }
    }
}

/// Debounced alarm bookkeeping with a `HISTORY`-entry ring of cleared alarms.
pub struct AlarmMonitor<const HISTORY: usize = DEFAULT_HISTORY_SIZE> {
    thresholds: AlarmThresholds,
    active: Vec<Alarm, MAX_ACTIVE_ALARMS>,
    history: HistoryBuf<Alarm, HISTORY>,
    debounce: [u8; AlarmKind::MONITORED.len()],
}

impl<const HISTORY: usize> Default for AlarmMonitor<HISTORY> {
    fn default() -> Self {
        Self::new(AlarmThresholds::default())
    }
}

impl<const HISTORY: usize> AlarmMonitor<HISTORY> {
    #[must_use]
    pub const fn new(thresholds: AlarmThresholds) -> Self {
        Self {
            thresholds,
            active: Vec::new(),
            history: HistoryBuf::new(),
            debounce: [0; AlarmKind::MONITORED.len()],
        }
    }

    /// Replaces the bounds. Debounce counters and active alarms are kept.
    pub fn set_thresholds(&mut self, thresholds: AlarmThresholds) {
        self.thresholds = thresholds;
    }

    #[must_use]
    pub const fn thresholds(&self) -> &AlarmThresholds {
        &self.thresholds
    }

    /// Evaluates every monitored condition once and returns what changed.
    pub fn check_alarms(
        &mut self,
        current: &Readings,
        targets: &Readings,
        now: Millis,
    ) -> AlarmChanges {
        let mut changes = AlarmChanges::new();

        for kind in AlarmKind::MONITORED {
            let Some((direction, critical, warning)) = self.thresholds.bounds(kind) else {
                continue;
            };
            let Some(variable) = kind.variable() else {
                continue;
            };
            let value = current.get(variable);
            let deviation = value - targets.get(variable);

            let violation = if direction.crosses(value, critical) {
                Some((Severity::Critical, critical))
            } else if direction.crosses(value, warning) {
                Some((Severity::Warning, warning))
            } else {
                None
            };

            let change = match violation {
                Some((severity, threshold)) => {
                    let counter = &mut self.debounce[kind.index()];
                    *counter = counter.saturating_add(1);
                    if *counter >= DEBOUNCE_COUNT {
                        self.raise(kind, severity, value, threshold, deviation, now)
                    } else {
                        None
                    }
                }
                None => {
                    self.debounce[kind.index()] = 0;
                    self.clear(kind).map(AlarmChange::Cleared)
                }
            };

            if let Some(change) = change {
                // One slot per monitored kind, so this cannot overflow.
                let _ = changes.push(change);
            }
        }

        changes
    }

    fn raise(
        &mut self,
        kind: AlarmKind,
        severity: Severity,
        value: f32,
        threshold: f32,
        deviation: f32,
        now: Millis,
    ) -> Option<AlarmChange> {
        if let Some(existing) = self.active.iter_mut().find(|alarm| alarm.kind == kind) {
            let previous = existing.severity;
            existing.severity = severity;
            existing.message = kind.message(severity);
            existing.value = value;
            existing.threshold = threshold;
            existing.deviation = deviation;
            existing.timestamp_s = now.as_secs();
            return (previous != severity).then_some(AlarmChange::SeverityChanged {
                alarm: *existing,
                previous,
            });
        }

        let alarm = Alarm {
            kind,
            severity,
            message: kind.message(severity),
            timestamp_s: now.as_secs(),
            active: true,
            acknowledged: false,
            value,
            threshold,
            deviation,
        };
        self.active.push(alarm).ok()?;
        Some(AlarmChange::Raised(alarm))
    }

    fn clear(&mut self, kind: AlarmKind) -> Option<Alarm> {
        let index = self.active.iter().position(|alarm| alarm.kind == kind)?;
        let mut alarm = self.active.remove(index);
        alarm.active = false;
        self.history.write(alarm);
        Some(alarm)
    }

    /// Marks the active alarm at `index` as seen without clearing it.
    pub fn acknowledge(&mut self, index: usize) -> Result<&Alarm, AcknowledgeError> {
        let active = self.active.len();
        let alarm = self
            .active
            .get_mut(index)
            .ok_or(AcknowledgeError::NoSuchAlarm { index, active })?;
        alarm.acknowledged = true;
        Ok(alarm)
    }

    /// Acknowledges every active alarm and returns how many there were.
    pub fn acknowledge_all(&mut self) -> usize {
        for alarm in &mut self.active {
            alarm.acknowledged = true;
        }
        self.active.len()
    }

    #[must_use]
    pub fn active_alarms(&self) -> &[Alarm] {
        &self.active
    }

    /// Cleared alarms, oldest first.
    #[must_use]
    pub fn history(&self) -> OldestOrdered<'_, Alarm> {
        self.history.oldest_ordered()
    }

    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    #[must_use]
    pub fn has_active_alarms(&self) -> bool {
        !self.active.is_empty()
    }

    #[must_use]
    pub fn has_critical_alarms(&self) -> bool {
        self.active
            .iter()
            .any(|alarm| alarm.severity == Severity::Critical)
    }

    #[must_use]
    pub fn highest_severity(&self) -> Option<Severity> {
        self.active.iter().map(|alarm| alarm.severity).max()
    }

    /// Clears every active alarm into history and restarts debouncing.
    /// Returns the cleared alarms.
    pub fn clear_all(&mut self) -> Vec<Alarm, MAX_ACTIVE_ALARMS> {
        self.debounce = [0; AlarmKind::MONITORED.len()];
        let mut cleared = Vec::new();
        for alarm in &self.active {
            let retired = Alarm {
                active: false,
                ..*alarm
            };
            self.history.write(retired);
            let _ = cleared.push(retired);
        }
        self.active.clear();
        cleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: Readings = Readings::new(37.0, 95.0, 5.0);
    const NOMINAL: Readings = Readings::new(37.0, 95.0, 5.0);

    fn hot(temperature: f32) -> Readings {
        Readings::new(temperature, 95.0, 5.0)
    }

    #[test]
    fn three_critical_checks_raise_one_alarm() {
        let mut monitor: AlarmMonitor = AlarmMonitor::default();
        assert!(monitor.check_alarms(&hot(40.0), &TARGET, Millis(1_000)).is_empty());
        assert!(monitor.check_alarms(&hot(40.0), &TARGET, Millis(2_000)).is_empty());
        let changes = monitor.check_alarms(&hot(40.0), &TARGET, Millis(3_000));

        assert_eq!(changes.len(), 1);
        match changes[0] {
            AlarmChange::Raised(alarm) => {
                assert_eq!(alarm.kind, AlarmKind::TemperatureHigh);
                assert_eq!(alarm.severity, Severity::Critical);
                assert_eq!(alarm.message, "Critical: Temperature exceeds maximum");
                assert_eq!(alarm.threshold, 39.0);
                assert_eq!(alarm.timestamp_s, 3);
                assert!((alarm.deviation - 3.0).abs() < 1e-4);
            }
            _ => panic!("expected a raised alarm"),
        }
        assert_eq!(monitor.active_count(), 1);
        assert!(monitor.has_critical_alarms());

        let changes = monitor.check_alarms(&hot(40.5), &TARGET, Millis(4_000));
        assert!(changes.is_empty());
        assert_eq!(monitor.active_count(), 1);
        assert_eq!(monitor.active_alarms()[0].value, 40.5);
    }

    #[test]
    fn interrupted_violation_raises_nothing() {
        let mut monitor: AlarmMonitor = AlarmMonitor::default();
        monitor.check_alarms(&hot(40.0), &TARGET, Millis(0));
        monitor.check_alarms(&hot(40.0), &TARGET, Millis(100));
        monitor.check_alarms(&NOMINAL, &TARGET, Millis(200));
        monitor.check_alarms(&hot(40.0), &TARGET, Millis(300));
        assert_eq!(monitor.active_count(), 0);
    }

    #[test]
    fn warning_escalates_in_place() {
        let mut monitor: AlarmMonitor = AlarmMonitor::default();
        for tick in 0..3 {
            monitor.check_alarms(&hot(38.5), &TARGET, Millis(tick * 100));
        }
        assert_eq!(monitor.active_alarms()[0].severity, Severity::Warning);
        monitor.acknowledge(0).expect("alarm present");

        let changes = monitor.check_alarms(&hot(39.5), &TARGET, Millis(400));
        match changes.first() {
            Some(AlarmChange::SeverityChanged { alarm, previous }) => {
                assert_eq!(*previous, Severity::Warning);
                assert_eq!(alarm.severity, Severity::Critical);
                assert!(alarm.acknowledged);
            }
            other => panic!("expected escalation, got {other:?}"),
        }
        assert_eq!(monitor.active_count(), 1);
    }

    #[test]
    fn clearing_moves_alarm_to_history_immediately() {
        let mut monitor: AlarmMonitor = AlarmMonitor::default();
        let low_co2 = Readings::new(37.0, 95.0, 4.0);
        for tick in 0..3 {
            monitor.check_alarms(&low_co2, &TARGET, Millis(tick * 100));
        }
        assert_eq!(monitor.active_alarms()[0].kind, AlarmKind::Co2Low);

        let changes = monitor.check_alarms(&NOMINAL, &TARGET, Millis(400));
        assert!(matches!(changes.first(), Some(AlarmChange::Cleared(_))));
        assert_eq!(monitor.active_count(), 0);
        let cleared = monitor.history().next().expect("history entry");
        assert!(!cleared.active);
        assert_eq!(cleared.message, "Critical: CO2 level too low");
    }

    #[test]
    fn history_keeps_most_recent_entries() {
        let mut monitor: AlarmMonitor<10> = AlarmMonitor::default();
        let mut now = 0;
        for round in 0..15_u16 {
            let high = 40.0 + f32::from(round);
            for _ in 0..3 {
                monitor.check_alarms(&hot(high), &TARGET, Millis(now));
                now += 1_000;
            }
            monitor.check_alarms(&NOMINAL, &TARGET, Millis(now));
            now += 1_000;
        }

        assert_eq!(monitor.history_len(), 10);
        let first = monitor.history().next().expect("history entry");
        assert_eq!(first.value, 45.0);
        monitor.clear_history();
        assert_eq!(monitor.history_len(), 0);
    }

    #[test]
    fn clear_all_retires_active_alarms() {
        let mut monitor: AlarmMonitor = AlarmMonitor::default();
        for tick in 0..3 {
            monitor.check_alarms(&hot(38.5), &TARGET, Millis(tick));
        }
        let cleared = monitor.clear_all();
        assert_eq!(cleared.len(), 1);
        assert_eq!(monitor.active_count(), 0);
        assert_eq!(monitor.history_len(), 1);

        monitor.check_alarms(&hot(38.5), &TARGET, Millis(10));
        assert_eq!(monitor.active_count(), 0);
    }

    #[test]
    fn acknowledge_out_of_range_is_rejected() {
        let mut monitor: AlarmMonitor = AlarmMonitor::default();
        assert_eq!(
            monitor.acknowledge(0).map(|alarm| alarm.kind),
            Err(AcknowledgeError::NoSuchAlarm {
                index: 0,
                active: 0
            })
        );
        assert_eq!(monitor.acknowledge_all(), 0);
    }

    #[test]
    fn each_condition_debounces_independently() {
        let mut monitor: AlarmMonitor = AlarmMonitor::default();
        let dry_and_rich = Readings::new(37.0, 80.0, 5.4);
        for tick in 0..3 {
            monitor.check_alarms(&dry_and_rich, &TARGET, Millis(tick));
        }
        let kinds: Vec<AlarmKind, 8> = monitor.active_alarms().iter().map(|a| a.kind).collect();
        assert_eq!(kinds.as_slice(), &[AlarmKind::HumidityLow, AlarmKind::Co2High]);
        assert_eq!(monitor.highest_severity(), Some(Severity::Critical));
    }
}
