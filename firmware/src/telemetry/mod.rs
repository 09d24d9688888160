//! Forwards control events from the core recorder to the log sinks.
//!
//! The device keeps its own telemetry ring; this module only remembers how
//! far it has read, mirrors new records to defmt at the event's level and
//! can render them as `EVT` lines for the REPL.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use core::fmt;

use instrument_core::telemetry::{EventId, TelemetryRecord, TelemetryRecorder};
use instrument_core::timing::Millis;

/// Read cursor into a device's telemetry ring.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TelemetryDrain {
    cursor: EventId,
}

impl TelemetryDrain {
    pub const fn new() -> Self {
        Self { cursor: 0 }
    }

    /// Hands every record newer than the cursor to `sink`, oldest first.
    ///
    /// Records that were overwritten before being drained are skipped.
    pub fn drain<const N: usize>(
        &mut self,
        recorder: &TelemetryRecorder<Millis, N>,
        mut sink: impl FnMut(&TelemetryRecord<Millis>),
    ) -> usize {
        let mut drained = 0;
        for record in recorder.since(self.cursor) {
            log_record(record);
            sink(record);
            drained += 1;
        }
        self.cursor = recorder.next_event_id();
        drained
    }
}

/// Renders a record as a REPL notification line.
pub fn write_event_line<W: fmt::Write>(
    writer: &mut W,
    record: &TelemetryRecord<Millis>,
) -> fmt::Result {
    write!(writer, "EVT t={} {}", record.timestamp, record.event)
}

#[cfg(target_os = "none")]
fn log_record(record: &TelemetryRecord<Millis>) {
    use instrument_core::telemetry::EventLevel;

    let at = record.timestamp.as_millis();
    let event = defmt::Display2Format(&record.event);
    match record.event.level() {
        EventLevel::Info => defmt::info!("telemetry t={}ms {}", at, event),
        EventLevel::Warn => defmt::warn!("telemetry t={}ms {}", at, event),
        EventLevel::Error => defmt::error!("telemetry t={}ms {}", at, event),
    }
}

#[cfg(not(target_os = "none"))]
fn log_record(_record: &TelemetryRecord<Millis>) {}
