//! Control event catalog and the in-memory telemetry ring.
//!
//! Engines report what happened through return values; the device wrappers
//! translate those into [`ControlEvent`]s and record them here. Front-ends
//! drain new records by id: the firmware forwards them to `defmt`, the
//! emulator prints them and appends them to its transcript.

use core::fmt;
use core::time::Duration;

use heapless::{HistoryBuf, OldestOrdered};

use crate::alarms::{Alarm, AlarmKind, Severity};
use crate::device::DeviceState;
use crate::thermal::{ProgramWarning, ThermalPhase};

/// Monotonic identifier assigned to each record. Wraps on overflow.
pub type EventId = u32;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Log level a front-end should use for an event.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

/// Everything the control core reports.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlEvent {
    StateChanged {
        from: DeviceState,
        to: DeviceState,
    },
    PhaseEntered {
        phase: ThermalPhase,
        cycle: u16,
    },
    ProgramComplete,
    ProgramWarning(ProgramWarning),
    StageEntered {
        index: u8,
        name: &'static str,
        preheating: bool,
    },
    PreheatComplete {
        index: u8,
    },
    ProtocolComplete,
    /// A protocol without stages was supplied.
    ProtocolRejected,
    AlarmRaised {
        kind: AlarmKind,
        severity: Severity,
        value: f32,
        threshold: f32,
    },
    AlarmSeverityChanged {
        kind: AlarmKind,
        from: Severity,
        to: Severity,
    },
    AlarmCleared {
        kind: AlarmKind,
    },
    AlarmsAcknowledged {
        count: u8,
    },
    StabilityAchieved,
    StabilityLost,
    SetpointChanged {
        zone: u8,
        value: f32,
    },
    CommandRejected {
        action: &'static str,
    },
}

impl ControlEvent {
    #[must_use]
    pub fn alarm_raised(alarm: &Alarm) -> Self {
        ControlEvent::AlarmRaised {
            kind: alarm.kind,
            severity: alarm.severity,
            value: alarm.value,
            threshold: alarm.threshold,
        }
    }

    #[must_use]
    pub const fn level(&self) -> EventLevel {
        match self {
            ControlEvent::AlarmRaised {
                severity: Severity::Critical,
                ..
            }
            | ControlEvent::AlarmSeverityChanged {
                to: Severity::Critical,
                ..
            }
            | ControlEvent::StateChanged {
                to: DeviceState::Error,
                ..
            } => EventLevel::Error,
            ControlEvent::AlarmRaised { .. }
            | ControlEvent::AlarmSeverityChanged { .. }
            | ControlEvent::ProgramWarning(_)
            | ControlEvent::ProtocolRejected
            | ControlEvent::StabilityLost
            | ControlEvent::CommandRejected { .. } => EventLevel::Warn,
            _ => EventLevel::Info,
        }
    }
}

impl fmt::Display for ControlEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlEvent::StateChanged { from, to } => write!(f, "state {from} -> {to}"),
            ControlEvent::PhaseEntered { phase, cycle } => {
                write!(f, "phase {phase} cycle={cycle}")
            }
            ControlEvent::ProgramComplete => f.write_str("program complete"),
            ControlEvent::ProgramWarning(warning) => write!(f, "program warning: {warning}"),
            ControlEvent::StageEntered {
                index,
                name,
                preheating,
            } => {
                write!(f, "stage {} '{name}'", u16::from(*index) + 1)?;
                if *preheating {
                    f.write_str(" preheating")?;
                }
                Ok(())
            }
            ControlEvent::PreheatComplete { index } => {
                write!(f, "stage {} preheat complete", u16::from(*index) + 1)
            }
            ControlEvent::ProtocolComplete => f.write_str("protocol complete"),
            ControlEvent::ProtocolRejected => f.write_str("protocol has no stages"),
            ControlEvent::AlarmRaised {
                kind,
                severity,
                value,
                threshold,
            } => write!(
                f,
                "alarm {severity} {kind} value={value:.2} threshold={threshold:.2}"
            ),
            ControlEvent::AlarmSeverityChanged { kind, from, to } => {
                write!(f, "alarm {kind} {from} -> {to}")
            }
            ControlEvent::AlarmCleared { kind } => write!(f, "alarm cleared {kind}"),
            ControlEvent::AlarmsAcknowledged { count } => {
                write!(f, "{count} alarm(s) acknowledged")
            }
            ControlEvent::StabilityAchieved => f.write_str("environment stable"),
            ControlEvent::StabilityLost => f.write_str("environment unstable"),
            ControlEvent::SetpointChanged { zone, value } => {
                write!(f, "setpoint zone={zone} value={value:.2}")
            }
            ControlEvent::CommandRejected { action } => write!(f, "{action} rejected"),
        }
    }
}

/// Trait implemented by monotonic instant wrappers used for telemetry tracking.
pub trait TelemetryInstant: Copy {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TelemetryRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: ControlEvent,
    /// Time since the previous record, if any.
    pub since_previous: Option<Duration>,
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord<TInstant>, CAPACITY>;

/// Records control events into a fixed-size ring buffer.
pub struct TelemetryRecorder<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: TelemetryRing<TInstant, CAPACITY>,
    last_recorded_at: Option<TInstant>,
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> Default for TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: Copy + TelemetryInstant,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: Copy + TelemetryInstant,
{
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            last_recorded_at: None,
            next_event_id: 0,
        }
    }

    /// Appends an event and returns its id.
    pub fn record(&mut self, event: ControlEvent, timestamp: TInstant) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        let since_previous = self
            .last_recorded_at
            .map(|previous| timestamp.saturating_duration_since(previous));
        self.last_recorded_at = Some(timestamp);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            since_previous,
        });

        id
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    #[must_use]
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord<TInstant>> {
        self.ring.oldest_ordered()
    }

    /// Records with an id at or after `cursor`, oldest first.
    ///
    /// Pair with [`TelemetryRecorder::next_event_id`] to drain new events.
    pub fn since(&self, cursor: EventId) -> impl Iterator<Item = &TelemetryRecord<TInstant>> {
        let pending = self.next_event_id.wrapping_sub(cursor);
        self.ring
            .oldest_ordered()
            .filter(move |record| self.next_event_id.wrapping_sub(record.id) <= pending)
    }

    /// Id the next record will receive.
    #[must_use]
    pub const fn next_event_id(&self) -> EventId {
        self.next_event_id
    }

    /// Returns the most recent telemetry record, if available.
    #[must_use]
    pub fn latest(&self) -> Option<&TelemetryRecord<TInstant>> {
        self.ring.recent()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}
