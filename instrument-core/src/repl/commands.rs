//! High-level REPL command dispatcher.
//!
//! This module glues parsed commands to a [`Device`]. It stays `no_std`
//! friendly so the firmware and emulator crates share one implementation; the
//! front-ends only differ in how they render outcomes and drive the clock.

use core::fmt;
use core::time::Duration;

use crate::device::{CommandRejection, Device, DeviceKind, DeviceStatus};
use crate::timing::Millis;

use super::grammar::{self, AckCommand, AlarmsCommand, Command, HelpCommand};

/// Command execution successes.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandOutcome<'a> {
    Started(DeviceKind),
    Stopped,
    Paused,
    Resumed,
    StageAdvanced,
    SetpointApplied { zone: u8, value: f32 },
    Status(DeviceStatus),
    /// Render the requested alarm list from the device monitor.
    Alarms(AlarmsCommand),
    Acknowledged(usize),
    Templates,
    /// Clock control belongs to the host; the executor only validates it.
    Advance(Duration),
    Help(HelpCommand<'a>),
}

/// Errors surfaced while executing a command.
#[derive(Debug, PartialEq)]
pub enum CommandError<'a> {
    Parse(grammar::ParseError<'a>),
    Rejected(CommandRejection),
}

impl<'a> From<grammar::ParseError<'a>> for CommandError<'a> {
    fn from(error: grammar::ParseError<'a>) -> Self {
        Self::Parse(error)
    }
}

impl From<CommandRejection> for CommandError<'_> {
    fn from(error: CommandRejection) -> Self {
        Self::Rejected(error)
    }
}

impl fmt::Display for CommandError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Parse(error) => write!(f, "parse error: {error}"),
            CommandError::Rejected(rejection) => rejection.fmt(f),
        }
    }
}

pub type CommandResult<'a> = Result<CommandOutcome<'a>, CommandError<'a>>;

/// Dispatches REPL commands to a device.
pub struct CommandExecutor<D> {
    device: D,
}

impl<D: Device> CommandExecutor<D> {
    #[must_use]
    pub const fn new(device: D) -> Self {
        Self { device }
    }

    #[must_use]
    pub const fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    #[must_use]
    pub fn into_device(self) -> D {
        self.device
    }

    /// Parses and executes a single REPL line.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Parse`] for malformed input and
    /// [`CommandError::Rejected`] when the device refuses the command.
    pub fn execute<'a>(&mut self, line: &'a str, now: Millis) -> CommandResult<'a> {
        let command = grammar::parse(line)?;
        self.dispatch(command, now)
    }

    /// Executes an already parsed command.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Rejected`] when the device refuses the command.
    pub fn dispatch<'a>(&mut self, command: Command<'a>, now: Millis) -> CommandResult<'a> {
        let outcome = match command {
            Command::Start(params) => {
                self.device.start(&params, now)?;
                CommandOutcome::Started(self.device.kind())
            }
            Command::Stop => {
                self.device.stop(now);
                CommandOutcome::Stopped
            }
            Command::Pause => {
                self.device.pause(now)?;
                CommandOutcome::Paused
            }
            Command::Resume => {
                self.device.resume(now)?;
                CommandOutcome::Resumed
            }
            Command::Next => {
                self.device.advance_stage(now)?;
                CommandOutcome::StageAdvanced
            }
            Command::Setpoint { zone, value } => {
                self.device.set_setpoint(zone, value, now)?;
                CommandOutcome::SetpointApplied { zone, value }
            }
            Command::Status => CommandOutcome::Status(self.device.status(now)),
            Command::Alarms(which) => {
                if self.device.alarms().is_none() {
                    return Err(CommandRejection::Unsupported("alarms").into());
                }
                CommandOutcome::Alarms(which)
            }
            Command::Ack(AckCommand::All) => {
                CommandOutcome::Acknowledged(self.device.acknowledge_all(now)?)
            }
            Command::Ack(AckCommand::Index(index)) => {
                self.device.acknowledge_alarm(index, now)?;
                CommandOutcome::Acknowledged(1)
            }
            Command::Templates => CommandOutcome::Templates,
            Command::Advance(duration) => CommandOutcome::Advance(duration),
            Command::Help(help) => CommandOutcome::Help(help),
        };
        Ok(outcome)
    }
}
