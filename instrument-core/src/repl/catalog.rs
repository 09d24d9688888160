//! Shared REPL grammar specification expressed as an applicative AST.
//!
//! The parser and the `help` output interpret the same structure, so keywords,
//! value layouts and usage strings stay in sync.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandTag {
    Start,
    Stop,
    Pause,
    Resume,
    Next,
    Setpoint,
    Status,
    Alarms,
    Ack,
    Templates,
    Advance,
    Help,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChoiceTag {
    AlarmsHistory,
    AckAll,
}

/// Where a parsed value lands in the command being built.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueSlot {
    Zone,
    SetpointValue,
    AlarmIndex,
    AdvanceBy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueSpec {
    /// `150ms`, `30s`, `5m`, `2h`.
    Duration,
    /// Unsigned integer no larger than `max`.
    Integer { max: u32 },
    /// Integer or decimal literal.
    Number,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub tag: CommandTag,
    pub grammar: &'static Node,
    pub usage: &'static str,
    pub summary: &'static str,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Node {
    End,
    /// At most one keyword from `choices`.
    OptionalChoice { choices: &'static [ChoiceBranch] },
    Value {
        spec: ValueSpec,
        slot: ValueSlot,
        label: &'static str,
        optional: bool,
        next: &'static Node,
    },
    /// Zero or more `key=value` pairs.
    Assignments,
    Topic { next: &'static Node },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChoiceBranch {
    pub keyword: &'static str,
    pub tag: ChoiceTag,
    pub next: &'static Node,
}

const END: Node = Node::End;

const START_GRAMMAR: Node = Node::Assignments;

const SETPOINT_VALUE: Node = Node::Value {
    spec: ValueSpec::Number,
    slot: ValueSlot::SetpointValue,
    label: "setpoint value",
    optional: false,
    next: &END,
};

const SETPOINT_GRAMMAR: Node = Node::Value {
    spec: ValueSpec::Integer {
        max: u8::MAX as u32,
    },
    slot: ValueSlot::Zone,
    label: "zone",
    optional: false,
    next: &SETPOINT_VALUE,
};

const ALARMS_CHOICES: [ChoiceBranch; 1] = [ChoiceBranch {
    keyword: "history",
    tag: ChoiceTag::AlarmsHistory,
    next: &END,
}];

const ALARMS_GRAMMAR: Node = Node::OptionalChoice {
    choices: &ALARMS_CHOICES,
};

const ACK_CHOICES: [ChoiceBranch; 1] = [ChoiceBranch {
    keyword: "all",
    tag: ChoiceTag::AckAll,
    next: &END,
}];

const ACK_ALL: Node = Node::OptionalChoice {
    choices: &ACK_CHOICES,
};

const ACK_GRAMMAR: Node = Node::Value {
    spec: ValueSpec::Integer {
        max: u16::MAX as u32,
    },
    slot: ValueSlot::AlarmIndex,
    label: "alarm index",
    optional: true,
    next: &ACK_ALL,
};

const ADVANCE_GRAMMAR: Node = Node::Value {
    spec: ValueSpec::Duration,
    slot: ValueSlot::AdvanceBy,
    label: "duration",
    optional: false,
    next: &END,
};

const HELP_GRAMMAR: Node = Node::Topic { next: &END };

const COMMANDS: [CommandSpec; 12] = [
    CommandSpec {
        name: "start",
        tag: CommandTag::Start,
        grammar: &START_GRAMMAR,
        usage: "start [key=value ...]",
        summary: "configure and start a run",
    },
    CommandSpec {
        name: "stop",
        tag: CommandTag::Stop,
        grammar: &END,
        usage: "stop",
        summary: "abort the run and return to ambient",
    },
    CommandSpec {
        name: "pause",
        tag: CommandTag::Pause,
        grammar: &END,
        usage: "pause",
        summary: "freeze phase and stage timers",
    },
    CommandSpec {
        name: "resume",
        tag: CommandTag::Resume,
        grammar: &END,
        usage: "resume",
        summary: "continue a paused run",
    },
    CommandSpec {
        name: "next",
        tag: CommandTag::Next,
        grammar: &END,
        usage: "next",
        summary: "skip to the next protocol stage",
    },
    CommandSpec {
        name: "setpoint",
        tag: CommandTag::Setpoint,
        grammar: &SETPOINT_GRAMMAR,
        usage: "setpoint <zone> <value>",
        summary: "override one zone setpoint",
    },
    CommandSpec {
        name: "status",
        tag: CommandTag::Status,
        grammar: &END,
        usage: "status",
        summary: "show readings, progress and alarms",
    },
    CommandSpec {
        name: "alarms",
        tag: CommandTag::Alarms,
        grammar: &ALARMS_GRAMMAR,
        usage: "alarms [history]",
        summary: "list active or cleared alarms",
    },
    CommandSpec {
        name: "ack",
        tag: CommandTag::Ack,
        grammar: &ACK_GRAMMAR,
        usage: "ack [all | <index>]",
        summary: "acknowledge active alarms",
    },
    CommandSpec {
        name: "templates",
        tag: CommandTag::Templates,
        grammar: &END,
        usage: "templates",
        summary: "list built-in incubator protocols",
    },
    CommandSpec {
        name: "advance",
        tag: CommandTag::Advance,
        grammar: &ADVANCE_GRAMMAR,
        usage: "advance <duration>",
        summary: "advance the simulated clock (ms, s, m, h)",
    },
    CommandSpec {
        name: "help",
        tag: CommandTag::Help,
        grammar: &HELP_GRAMMAR,
        usage: "help [command]",
        summary: "describe commands",
    },
];

/// Returns the full command catalog.
#[must_use]
pub const fn commands() -> &'static [CommandSpec] {
    &COMMANDS
}

/// Finds a command by name (case insensitive).
#[must_use]
pub fn find(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|command| command.name.eq_ignore_ascii_case(name))
}
