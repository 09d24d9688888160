use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use instrument_core::device::{CommandRejection, Device, DeviceKind, InstrumentDevice};
use instrument_core::environment::FirstOrderPlant;
use instrument_core::repl::commands::CommandOutcome;
use instrument_core::repl::{CommandError, CommandExecutor, render_reply};
use instrument_core::telemetry::{EventId, EventLevel, TelemetryRecord};
use instrument_core::timing::Millis;

/// Control loop period of the simulated clock.
pub const TICK: Duration = Duration::from_millis(100);

/// Longest span a single `advance` may simulate.
pub const MAX_ADVANCE: Duration = Duration::from_secs(24 * 60 * 60);

/// One line printed back to the operator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OutputLine {
    Reply(String),
    Event { level: EventLevel, text: String },
}

impl OutputLine {
    pub fn text(&self) -> &str {
        match self {
            OutputLine::Reply(text) | OutputLine::Event { text, .. } => text,
        }
    }
}

pub struct Session {
    executor: CommandExecutor<InstrumentDevice<FirstOrderPlant>>,
    clock: Millis,
    cursor: EventId,
    transcript: Option<TranscriptLogger>,
}

impl Session {
    pub fn new(kind: DeviceKind) -> Self {
        let device = InstrumentDevice::new(kind, plant_for(kind));
        Self {
            executor: CommandExecutor::new(device),
            clock: Millis::ZERO,
            cursor: 0,
            transcript: None,
        }
    }

    /// Mirrors every exchange into a transcript file at `path`.
    pub fn with_transcript(mut self, path: &Path) -> io::Result<Self> {
        let kind = self.executor.device().kind();
        self.transcript = Some(TranscriptLogger::new(path, kind)?);
        Ok(self)
    }

    pub fn kind(&self) -> DeviceKind {
        self.executor.device().kind()
    }

    pub fn now(&self) -> Millis {
        self.clock
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<OutputLine>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        self.log(TranscriptRole::Host, trimmed)?;

        let mut result = self.executor.execute(trimmed, self.clock);
        if matches!(result, Ok(CommandOutcome::Advance(duration)) if duration > MAX_ADVANCE) {
            result = Err(CommandError::Rejected(CommandRejection::InvalidParameter(
                "advance (at most 24h per command)",
            )));
        }
        let advance_by = match result {
            Ok(CommandOutcome::Advance(duration)) => Some(duration),
            _ => None,
        };
        let reply = render_reply(&result, self.executor.device());

        if let Some(duration) = advance_by {
            self.advance(duration);
        }

        let mut lines: Vec<OutputLine> = reply
            .lines()
            .map(|line| OutputLine::Reply(line.to_string()))
            .collect();
        if advance_by.is_some() {
            lines.push(OutputLine::Reply(format!("clock t={}", self.clock)));
        }
        lines.extend(self.drain_events());

        for line in &lines {
            let role = match line {
                OutputLine::Reply(_) => TranscriptRole::Emulator,
                OutputLine::Event { .. } => TranscriptRole::Event,
            };
            self.log(role, line.text())?;
        }
        Ok(lines)
    }

    /// Steps the simulated clock in control ticks. A trailing partial tick
    /// is still delivered so the clock lands exactly on the target.
    pub fn advance(&mut self, duration: Duration) {
        let target = self.clock + duration;
        while self.clock < target {
            self.clock = (self.clock + TICK).min(target);
            self.executor.device_mut().tick(self.clock);
        }
    }

    fn drain_events(&mut self) -> Vec<OutputLine> {
        let telemetry = self.executor.device().telemetry();
        let lines = telemetry.since(self.cursor).map(describe_event).collect();
        self.cursor = telemetry.next_event_id();
        lines
    }

    fn log(&mut self, role: TranscriptRole, line: &str) -> io::Result<()> {
        match self.transcript.as_mut() {
            Some(transcript) => transcript.append_line(self.clock, role, line),
            None => Ok(()),
        }
    }
}

/// Simulated plant dynamics per instrument.
fn plant_for(kind: DeviceKind) -> FirstOrderPlant {
    match kind {
        DeviceKind::Pcr => FirstOrderPlant::new([25.0, 25.0, 25.0, 0.0], Duration::from_secs(2)),
        DeviceKind::Incubator => {
            FirstOrderPlant::new([25.0, 50.0, 0.04, 0.0], Duration::from_secs(60))
                .with_time_constant(1, Duration::from_secs(30))
        }
        DeviceKind::Dummy => FirstOrderPlant::new([0.0; 4], Duration::from_secs(5)),
    }
}

fn describe_event(record: &TelemetryRecord<Millis>) -> OutputLine {
    OutputLine::Event {
        level: record.event.level(),
        text: format!("[t={}] {}", record.timestamp, record.event),
    }
}

struct TranscriptLogger {
    writer: BufWriter<fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path, kind: DeviceKind) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };

        writeln!(logger.writer, "# Instrument emulator transcript: {}", kind.label())?;
        writeln!(
            logger.writer,
            "# Timestamps are milliseconds on the simulated controller clock"
        )?;
        writeln!(logger.writer)?;
        logger.writer.flush()?;
        Ok(logger)
    }

    fn append_line(&mut self, now: Millis, role: TranscriptRole, line: &str) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>9} ms] {} {}",
            now.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

#[derive(Clone, Copy)]
enum TranscriptRole {
    Host,
    Emulator,
    Event,
}

impl TranscriptRole {
    fn prefix(self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
            TranscriptRole::Event => "EVT *",
        }
    }
}
