#![allow(clippy::missing_errors_doc)]

//! Shared text surface for the REPL.
//!
//! [`StatusFormatter`] renders a [`DeviceStatus`] line by line and
//! [`write_response`] renders every other command outcome, so the firmware
//! and the emulator print identical text. Lines are separated with `\n`; the
//! transport decides on line endings.

use core::fmt;
use core::time::Duration;

use crate::alarms::Alarm;
use crate::device::status::{ProtocolActivity, ThermalActivity};
use crate::device::{Activity, Device, DeviceKind, DeviceStatus};
use crate::protocol::templates;

use super::catalog::{self, CommandTag};
use super::commands::{CommandError, CommandOutcome};
use super::grammar::{AlarmsCommand, HelpCommand};

/// Helper that renders a [`DeviceStatus`] into human-readable lines.
#[derive(Clone, Copy, Debug)]
pub struct StatusFormatter<'a> {
    status: &'a DeviceStatus,
}

impl<'a> StatusFormatter<'a> {
    #[must_use]
    pub const fn new(status: &'a DeviceStatus) -> Self {
        Self { status }
    }

    /// Writes the device line (e.g. `device pcr state=RUNNING uptime=12.0s`).
    pub fn write_device_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        write!(
            writer,
            "device {} state={} uptime=",
            self.status.kind.name(),
            self.status.state
        )?;
        write_duration(writer, Some(self.status.uptime))
    }

    /// Writes one zone line (e.g. `zone 0 Denature reading=94.80C setpoint=95.00C error=-0.20`).
    pub fn write_zone_line<W: fmt::Write>(&self, writer: &mut W, index: usize) -> fmt::Result {
        let Some(zone) = self.status.zones.get(index) else {
            return Ok(());
        };
        write!(
            writer,
            "zone {index} {} reading={:.2}{unit} setpoint={:.2}{unit} error={:+.2}",
            zone.name,
            zone.reading,
            zone.setpoint,
            zone.error(),
            unit = zone.unit,
        )
    }

    /// Writes the activity line describing run progress.
    pub fn write_activity_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        match &self.status.activity {
            Activity::Idle => writer.write_str("activity idle"),
            Activity::Manual => writer.write_str("activity manual"),
            Activity::Thermal(thermal) => write_thermal(writer, thermal),
            Activity::Protocol(protocol) => write_protocol(writer, protocol),
        }
    }

    /// Writes the alarm overview, if the instrument monitors alarms.
    pub fn write_alarm_summary_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let Some(summary) = &self.status.alarms else {
            return Ok(());
        };
        write!(writer, "alarms active={} highest=", summary.count)?;
        match summary.highest {
            Some(severity) => write!(writer, "{severity}"),
            None => writer.write_str("none"),
        }
    }

    /// Writes every status line, including one line per active alarm.
    pub fn write_all<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        self.write_device_line(writer)?;
        for index in 0..self.status.zones.len() {
            writer.write_char('\n')?;
            self.write_zone_line(writer, index)?;
        }
        writer.write_char('\n')?;
        self.write_activity_line(writer)?;
        if let Some(summary) = &self.status.alarms {
            writer.write_char('\n')?;
            self.write_alarm_summary_line(writer)?;
            for (index, alarm) in summary.alarms.iter().enumerate() {
                writer.write_char('\n')?;
                write_alarm_line(writer, index, alarm)?;
            }
        }
        Ok(())
    }
}

fn write_thermal<W: fmt::Write>(writer: &mut W, thermal: &ThermalActivity) -> fmt::Result {
    write!(
        writer,
        "thermal phase={} cycle={}/{} target={:.2}C",
        thermal.phase, thermal.cycle, thermal.total_cycles, thermal.target
    )?;
    if let Some(anneal) = thermal.anneal_temperature {
        write!(writer, " anneal={anneal:.2}C")?;
    }
    writer.write_str(" phase-left=")?;
    write_duration(writer, Some(thermal.phase_remaining))?;
    writer.write_str(" total-left=")?;
    write_duration(writer, Some(thermal.total_remaining))?;
    write!(
        writer,
        " progress={:.1}% stability={:.2}",
        thermal.progress, thermal.stability
    )?;

    write!(writer, "\nprogram type={}", thermal.program_type)?;
    if let Some(touchdown) = &thermal.touchdown {
        write!(
            writer,
            " touchdown={:.2}->{:.2}C step={:.2} cycles={} anneal-now={:.2}C",
            touchdown.start_temp,
            touchdown.end_temp,
            touchdown.step_size,
            touchdown.touchdown_cycles,
            touchdown.current_anneal
        )?;
    }
    if let Some(gradient) = &thermal.gradient {
        write!(
            writer,
            " gradient={:.2}..{:.2}C positions={} [",
            gradient.temp_low, gradient.temp_high, gradient.positions
        )?;
        for (index, temperature) in gradient.temperatures().iter().enumerate() {
            if index > 0 {
                writer.write_char(' ')?;
            }
            write!(writer, "{temperature:.2}")?;
        }
        writer.write_char(']')?;
    }
    Ok(())
}

fn write_protocol<W: fmt::Write>(writer: &mut W, protocol: &ProtocolActivity) -> fmt::Result {
    write!(
        writer,
        "protocol '{}' state={} stage={}/{}",
        protocol.protocol,
        protocol.state,
        protocol.stage_index + 1,
        protocol.stage_count
    )?;
    if let Some(stage) = protocol.stage {
        write!(writer, " '{stage}'")?;
    }
    writer.write_str(" stage-left=")?;
    match protocol.stage_remaining {
        Some(remaining) => write_duration(writer, Some(remaining))?,
        None => writer.write_str("indefinite")?,
    }
    write!(writer, " progress={:.1}% stable=", protocol.progress)?;
    write_duration(writer, protocol.stable_for)
}

/// Writes one alarm line (e.g. `[0] CRITICAL Temperature High value=40.00 threshold=39.00 ...`).
pub fn write_alarm_line<W: fmt::Write>(writer: &mut W, index: usize, alarm: &Alarm) -> fmt::Result {
    write!(
        writer,
        "[{index}] {} {} value={:.2} threshold={:.2} deviation={:+.2} at={}s",
        alarm.severity, alarm.kind, alarm.value, alarm.threshold, alarm.deviation, alarm.timestamp_s
    )?;
    if alarm.acknowledged {
        writer.write_str(" acked")?;
    }
    if !alarm.active {
        writer.write_str(" cleared")?;
    }
    Ok(())
}

/// Renders a successful command outcome.
pub fn write_response<W: fmt::Write, D: Device>(
    writer: &mut W,
    outcome: &CommandOutcome<'_>,
    device: &D,
) -> fmt::Result {
    match outcome {
        CommandOutcome::Started(kind) => write!(writer, "OK start {}", kind.name()),
        CommandOutcome::Stopped => writer.write_str("OK stop"),
        CommandOutcome::Paused => writer.write_str("OK pause"),
        CommandOutcome::Resumed => writer.write_str("OK resume"),
        CommandOutcome::StageAdvanced => writer.write_str("OK next"),
        CommandOutcome::SetpointApplied { zone, value } => {
            write!(writer, "OK setpoint zone={zone} value={value:.2}")
        }
        CommandOutcome::Status(status) => StatusFormatter::new(status).write_all(writer),
        CommandOutcome::Alarms(which) => write_alarms(writer, *which, device),
        CommandOutcome::Acknowledged(count) => write!(writer, "OK ack count={count}"),
        CommandOutcome::Templates => write_templates(writer),
        CommandOutcome::Advance(duration) => {
            writer.write_str("OK advance ")?;
            write_duration(writer, Some(*duration))
        }
        CommandOutcome::Help(help) => write_help(writer, help, device.kind()),
    }
}

/// Renders a failed command.
pub fn write_error<W: fmt::Write>(writer: &mut W, error: &CommandError<'_>) -> fmt::Result {
    write!(writer, "ERR {error}")
}

fn write_alarms<W: fmt::Write, D: Device>(
    writer: &mut W,
    which: AlarmsCommand,
    device: &D,
) -> fmt::Result {
    let Some(monitor) = device.alarms() else {
        return writer.write_str("alarms unsupported");
    };
    match which {
        AlarmsCommand::Active => {
            let active = monitor.active_alarms();
            write!(writer, "alarms active={}", active.len())?;
            for (index, alarm) in active.iter().enumerate() {
                writer.write_char('\n')?;
                write_alarm_line(writer, index, alarm)?;
            }
        }
        AlarmsCommand::History => {
            write!(writer, "alarms history={}", monitor.history_len())?;
            for (index, alarm) in monitor.history().enumerate() {
                writer.write_char('\n')?;
                write_alarm_line(writer, index, alarm)?;
            }
        }
    }
    Ok(())
}

fn write_templates<W: fmt::Write>(writer: &mut W) -> fmt::Result {
    writer.write_str("templates")?;
    for template in templates::templates() {
        let protocol = template.instantiate();
        write!(
            writer,
            "\n{} '{}' stages={} scheduled=",
            template.key,
            template.name,
            template.stages.len()
        )?;
        write_duration(writer, Some(protocol.scheduled_duration()))?;
        if template.stages.last().is_some_and(|stage| stage.is_indefinite()) {
            writer.write_str(" then hold")?;
        }
    }
    Ok(())
}

fn write_help<W: fmt::Write>(
    writer: &mut W,
    help: &HelpCommand<'_>,
    kind: DeviceKind,
) -> fmt::Result {
    let Some(topic) = help.topic else {
        write!(writer, "commands for {}:", kind.label())?;
        for spec in catalog::commands() {
            write!(writer, "\n  {:<24}{}", spec.usage, spec.summary)?;
        }
        return Ok(());
    };

    let Some(spec) = catalog::find(topic) else {
        return write!(writer, "ERR unknown help topic '{topic}'");
    };
    write!(writer, "{}\n  {}", spec.usage, spec.summary)?;
    if spec.tag == CommandTag::Start {
        writer.write_str("\n  keys:")?;
        for key in kind.start_keys() {
            write!(writer, " {key}")?;
        }
    }
    Ok(())
}

/// Writes a compact duration: `1h02m03s`, `4m05s`, `12.3s`, `250ms` or `n/a`.
pub fn write_duration<W: fmt::Write>(writer: &mut W, duration: Option<Duration>) -> fmt::Result {
    let Some(value) = duration else {
        return writer.write_str("n/a");
    };
    let seconds = value.as_secs();
    if seconds >= 3_600 {
        write!(
            writer,
            "{}h{:02}m{:02}s",
            seconds / 3_600,
            (seconds % 3_600) / 60,
            seconds % 60
        )
    } else if seconds >= 60 {
        write!(writer, "{}m{:02}s", seconds / 60, seconds % 60)
    } else if seconds >= 1 {
        write!(writer, "{seconds}.{}s", value.subsec_millis() / 100)
    } else {
        write!(writer, "{}ms", value.subsec_millis())
    }
}

#[cfg(test)]
mod tests {
    use heapless::String;

    use super::*;
    use crate::device::{DeviceState, InstrumentDevice};
    use crate::environment::NoopPlant;
    use crate::repl::commands::CommandExecutor;
    use crate::timing::Millis;

    type Text = String<1024>;

    fn render(duration: Option<Duration>) -> Text {
        let mut out = Text::new();
        write_duration(&mut out, duration).expect("formatting");
        out
    }

    fn respond(executor: &mut CommandExecutor<InstrumentDevice<NoopPlant>>, line: &str) -> Text {
        let mut out = Text::new();
        let written = match executor.execute(line, Millis(0)) {
            Ok(outcome) => write_response(&mut out, &outcome, executor.device()),
            Err(error) => write_error(&mut out, &error),
        };
        written.expect("formatting");
        out
    }

    #[test]
    fn durations_pick_the_coarsest_useful_unit() {
        assert_eq!(render(None), "n/a");
        assert_eq!(render(Some(Duration::from_millis(250))), "250ms");
        assert_eq!(render(Some(Duration::from_millis(12_345))), "12.3s");
        assert_eq!(render(Some(Duration::from_secs(245))), "4m05s");
        assert_eq!(render(Some(Duration::from_secs(3_723))), "1h02m03s");
    }

    #[test]
    fn status_lists_every_zone() {
        let mut executor = CommandExecutor::new(InstrumentDevice::new(
            DeviceKind::Pcr,
            NoopPlant::new(),
        ));
        let text = respond(&mut executor, "status");
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("device pcr state=IDLE uptime=0ms"));
        assert!(lines.next().is_some_and(|line| line.starts_with("zone 0 Denature")));
        assert!(lines.next().is_some_and(|line| line.starts_with("zone 1 Anneal")));
        assert!(lines.next().is_some_and(|line| line.starts_with("zone 2 Extend")));
        assert_eq!(lines.next(), Some("activity idle"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn incubator_status_includes_alarm_summary() {
        let mut executor = CommandExecutor::new(InstrumentDevice::new(
            DeviceKind::Incubator,
            NoopPlant::new(),
        ));
        respond(&mut executor, "start template=mammalian");
        assert_eq!(executor.device().state(), DeviceState::Running);
        let text = respond(&mut executor, "status");
        assert!(text.contains("protocol 'Mammalian Cell Culture'"));
        assert!(text.contains("alarms active=0 highest=none"));
    }

    #[test]
    fn errors_are_prefixed() {
        let mut executor = CommandExecutor::new(InstrumentDevice::new(
            DeviceKind::Dummy,
            NoopPlant::new(),
        ));
        assert!(respond(&mut executor, "resume").starts_with("ERR "));
        assert!(respond(&mut executor, "bogus").starts_with("ERR parse error"));
    }

    #[test]
    fn help_lists_start_keys_for_the_device() {
        let mut executor = CommandExecutor::new(InstrumentDevice::new(
            DeviceKind::Dummy,
            NoopPlant::new(),
        ));
        let text = respond(&mut executor, "help start");
        assert!(text.ends_with("keys: setpoint"));
        let overview = respond(&mut executor, "help");
        assert_eq!(overview.lines().count(), catalog::commands().len() + 1);
    }

    #[test]
    fn templates_list_every_builtin() {
        let mut executor = CommandExecutor::new(InstrumentDevice::new(
            DeviceKind::Incubator,
            NoopPlant::new(),
        ));
        let text = respond(&mut executor, "templates");
        assert_eq!(text.lines().count(), templates::templates().len() + 1);
        assert!(text.contains("mammalian 'Mammalian Cell Culture'"));
    }
}
