#![allow(clippy::module_name_repetitions)]

//! Lexer and parser for the instrument REPL.
//!
//! The lexer uses `regal` to produce a bounded token stream, while the parser
//! walks the static catalog with `winnow` combinators over those tokens to
//! build structured command values. Nothing here allocates.

use super::catalog::{self, ChoiceBranch, ChoiceTag, CommandTag, Node, ValueSlot, ValueSpec};
use core::fmt;
use core::ops::Range;
use core::time::Duration;

use heapless::Vec as HeaplessVec;
use regal::IncrementalError;
use regal::TokenCache;
use regal_macros::RegalLexer;
#[allow(deprecated)]
use winnow::error::ErrorKind;
use winnow::error::{ErrMode, ParserError};
use winnow::prelude::*;
use winnow::stream::Stream;

use crate::device::{MAX_PARAMS, ParamValue, StartParams};

/// Maximum number of tokens produced per REPL line.
///
/// Sized for a `start` line carrying [`MAX_PARAMS`] assignments (three
/// tokens each) plus the command word and end of line.
pub const MAX_TOKENS: usize = 3 * MAX_PARAMS + 8;
const MAX_CACHE_RECORDS: usize = MAX_TOKENS * 2;

/// Lexical token kinds recognized by the REPL grammar.
#[derive(RegalLexer, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TokenKind {
    /// Duration literal ending in `ms`, `s`, `m` or `h`.
    #[regex(r"[0-9]+(?:ms|s|m|h)", priority = 2)]
    Duration,
    /// Decimal literal with an optional sign.
    #[regex(r"-?[0-9]+\.[0-9]+")]
    Decimal,
    /// Unsuffixed integer literal with an optional sign.
    #[regex(r"-?[0-9]+")]
    Integer,
    /// Identifier or keyword (case-insensitive match performed later).
    #[regex(r"[A-Za-z][A-Za-z0-9_-]*")]
    Ident,
    /// Equals sign for key/value assignments.
    #[token("=")]
    Equals,
    /// Inline whitespace is ignored.
    #[regex(r"[ \t]+", skip)]
    Whitespace,
    /// End-of-line token (`\r`, `\n`, or `\r\n`).
    #[token("\r\n")]
    #[token("\n")]
    #[token("\r")]
    Eol,
    /// Pseudo variant used when the lexer encounters unsupported input.
    #[default]
    #[regex(r".", priority = 1024)]
    Error,
}

/// Token emitted by the lexer with a byte span back into the source line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub lexeme: &'a str,
    pub span: Range<usize>,
}

pub type TokenBuffer<'a> = HeaplessVec<Token<'a>, MAX_TOKENS>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LexError {
    /// Input produced more tokens than the static buffer allows.
    TooManyTokens { processed: usize },
    /// Underlying lexer reported an unrecoverable error.
    Engine,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::TooManyTokens { processed } => {
                write!(f, "token buffer exhausted after {processed} items")
            }
            LexError::Engine => write!(f, "lexer engine error"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrammarErrorKind<'a> {
    UnexpectedToken {
        expected: &'static str,
        found: Option<TokenKind>,
        span: Range<usize>,
    },
    UnexpectedEnd {
        expected: &'static str,
    },
    InvalidInteger {
        span: Range<usize>,
    },
    InvalidNumber {
        span: Range<usize>,
    },
    InvalidDuration {
        span: Range<usize>,
    },
    InvalidToken {
        span: Range<usize>,
        lexeme: &'a str,
    },
    TooManyParameters {
        limit: usize,
    },
}

impl fmt::Display for GrammarErrorKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarErrorKind::UnexpectedToken {
                expected,
                found,
                span,
            } => write!(f, "expected {expected}, found {found:?} at {span:?}"),
            GrammarErrorKind::UnexpectedEnd { expected } => {
                write!(f, "unexpected end of input, expected {expected}")
            }
            GrammarErrorKind::InvalidInteger { span } => {
                write!(f, "invalid integer literal at {span:?}")
            }
            GrammarErrorKind::InvalidNumber { span } => {
                write!(f, "invalid number literal at {span:?}")
            }
            GrammarErrorKind::InvalidDuration { span } => {
                write!(f, "invalid duration literal at {span:?}")
            }
            GrammarErrorKind::InvalidToken { span, lexeme } => {
                write!(f, "unsupported token `{lexeme}` at {span:?}")
            }
            GrammarErrorKind::TooManyParameters { limit } => {
                write!(f, "more than {limit} parameters")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrammarError<'a> {
    pub kind: GrammarErrorKind<'a>,
}

impl fmt::Display for GrammarError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

impl<'a> GrammarError<'a> {
    fn unexpected(expected: &'static str, token: Option<&Token<'a>>) -> Self {
        GrammarError {
            kind: match token {
                Some(tok) => GrammarErrorKind::UnexpectedToken {
                    expected,
                    found: Some(tok.kind),
                    span: tok.span.clone(),
                },
                None => GrammarErrorKind::UnexpectedEnd { expected },
            },
        }
    }

    fn invalid_integer(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::InvalidInteger {
                span: token.span.clone(),
            },
        }
    }

    fn invalid_number(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::InvalidNumber {
                span: token.span.clone(),
            },
        }
    }

    fn invalid_duration(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::InvalidDuration {
                span: token.span.clone(),
            },
        }
    }

    fn invalid_token(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::InvalidToken {
                span: token.span.clone(),
                lexeme: token.lexeme,
            },
        }
    }

    fn too_many_parameters() -> Self {
        GrammarError {
            kind: GrammarErrorKind::TooManyParameters { limit: MAX_PARAMS },
        }
    }
}

type Input<'src, 'slice> = &'slice [Token<'src>];

#[allow(deprecated)]
impl<'src, 'slice> ParserError<Input<'src, 'slice>> for GrammarError<'src>
where
    'src: 'slice,
{
    fn from_error_kind(input: &Input<'src, 'slice>, _kind: ErrorKind) -> Self {
        GrammarError::unexpected("token", input.first())
    }

    fn append(
        self,
        _input: &Input<'src, 'slice>,
        _token_start: &<Input<'src, 'slice> as Stream>::Checkpoint,
        _kind: ErrorKind,
    ) -> Self {
        self
    }

    fn or(self, other: Self) -> Self {
        other
    }
}

/// Combined lex/parse error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError<'a> {
    Lex(LexError),
    Grammar(GrammarError<'a>),
}

impl fmt::Display for ParseError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Lex(err) => err.fmt(f),
            ParseError::Grammar(err) => err.fmt(f),
        }
    }
}

/// Structured commands produced by the parser.
#[derive(Clone, Debug, PartialEq)]
pub enum Command<'a> {
    Start(StartParams<'a>),
    Stop,
    Pause,
    Resume,
    Next,
    Setpoint { zone: u8, value: f32 },
    Status,
    Alarms(AlarmsCommand),
    Ack(AckCommand),
    Templates,
    Advance(Duration),
    Help(HelpCommand<'a>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlarmsCommand {
    Active,
    History,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckCommand {
    All,
    Index(usize),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HelpCommand<'a> {
    pub topic: Option<&'a str>,
}

pub(crate) fn parse_tokens_partial<'src, 'slice>(
    tokens: &'slice [Token<'src>],
) -> Result<(Command<'src>, &'slice [Token<'src>]), GrammarError<'src>>
where
    'src: 'slice,
{
    let mut input = tokens;
    match command().parse_next(&mut input) {
        Ok(cmd) => Ok((cmd, input)),
        Err(ErrMode::Backtrack(err) | ErrMode::Cut(err)) => Err(err),
        Err(ErrMode::Incomplete(_)) => Err(GrammarError::unexpected("token", input.first())),
    }
}

/// Tokenize the provided line.
///
/// # Errors
///
/// Returns [`LexError::TooManyTokens`] when the line does not fit the token buffer.
pub fn lex(line: &str) -> Result<TokenBuffer<'_>, LexError> {
    let compiled = TokenKind::lexer();
    let mut cache: TokenCache<TokenKind, MAX_CACHE_RECORDS> = TokenCache::new();
    let partial = cache
        .rebuild(compiled, line)
        .map_err(map_incremental_error)?;
    let mut buffer = TokenBuffer::new();

    for record in cache.tokens() {
        if record.skipped {
            continue;
        }

        let span = record.start..record.end;
        let lexeme = &line[span.clone()];
        if buffer
            .push(Token {
                kind: record.token,
                lexeme,
                span,
            })
            .is_err()
        {
            return Err(LexError::TooManyTokens {
                processed: buffer.len() + 1,
            });
        }
    }

    if let Some(partial) = partial.filter(|partial| !partial.fragment.is_empty()) {
        let start = partial.start;
        let end = start + partial.fragment.len();
        if buffer
            .push(Token {
                kind: TokenKind::Error,
                lexeme: partial.fragment,
                span: start..end,
            })
            .is_err()
        {
            return Err(LexError::TooManyTokens {
                processed: buffer.len() + 1,
            });
        }
    }

    Ok(buffer)
}

fn map_incremental_error(error: IncrementalError) -> LexError {
    match error {
        IncrementalError::TokenOverflow => LexError::TooManyTokens {
            processed: MAX_TOKENS,
        },
        _ => LexError::Engine,
    }
}

/// Parse a REPL command from the provided line.
///
/// # Errors
///
/// Returns a [`ParseError`] describing the first token the grammar rejects.
pub fn parse(line: &str) -> Result<Command<'_>, ParseError<'_>> {
    let tokens = lex(line).map_err(ParseError::Lex)?;

    if let Some(token) = tokens.iter().find(|token| token.kind == TokenKind::Error) {
        return Err(ParseError::Grammar(GrammarError::invalid_token(token)));
    }

    let (command, mut rest) =
        parse_tokens_partial(tokens.as_slice()).map_err(ParseError::Grammar)?;

    while let Some((token, remaining)) = rest.split_first() {
        if token.kind == TokenKind::Eol {
            rest = remaining;
        } else {
            return Err(ParseError::Grammar(GrammarError::unexpected(
                "end of command",
                Some(token),
            )));
        }
    }

    Ok(command)
}

fn command<'src, 'slice>() -> impl Parser<Input<'src, 'slice>, Command<'src>, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let snapshot = *input;
        let command_token = expect_kind(TokenKind::Ident, "command keyword").parse_next(input)?;

        if let Some(spec) = catalog::find(command_token.lexeme) {
            let mut state = CommandState::new(spec.tag);
            parse_node(spec.grammar, input, &mut state)?;
            state.finish()
        } else {
            *input = snapshot;
            Err(ErrMode::Backtrack(GrammarError::unexpected(
                "command keyword",
                Some(&command_token),
            )))
        }
    }
}

fn parse_node<'src, 'slice>(
    node: &'static Node,
    input: &mut Input<'src, 'slice>,
    state: &mut CommandState<'src>,
) -> Result<(), ErrMode<GrammarError<'src>>>
where
    'src: 'slice,
{
    match node {
        Node::End => Ok(()),
        Node::OptionalChoice { choices } => parse_optional_choice(input, choices, state),
        Node::Value {
            spec,
            slot,
            label,
            optional,
            next,
        } => {
            parse_slot(input, *spec, *slot, label, *optional, state)?;
            parse_node(next, input, state)
        }
        Node::Assignments => parse_assignments(input, state),
        Node::Topic { next } => {
            parse_topic(input, state)?;
            parse_node(next, input, state)
        }
    }
}

fn parse_optional_choice<'src, 'slice>(
    input: &mut Input<'src, 'slice>,
    choices: &'static [ChoiceBranch],
    state: &mut CommandState<'src>,
) -> Result<(), ErrMode<GrammarError<'src>>>
where
    'src: 'slice,
{
    match input.split_first() {
        Some((token, rest)) if token.kind == TokenKind::Ident => {
            if let Some(branch) = find_choice(choices, token.lexeme) {
                *input = rest;
                state.apply_choice(branch.tag)?;
                parse_node(branch.next, input, state)
            } else {
                Err(ErrMode::Backtrack(GrammarError::unexpected(
                    choice_expected_label(choices),
                    Some(token),
                )))
            }
        }
        Some((token, _)) if token.kind != TokenKind::Eol => Err(ErrMode::Backtrack(
            GrammarError::unexpected(choice_expected_label(choices), Some(token)),
        )),
        _ => Ok(()),
    }
}

fn parse_slot<'src, 'slice>(
    input: &mut Input<'src, 'slice>,
    spec: ValueSpec,
    slot: ValueSlot,
    label: &'static str,
    optional: bool,
    state: &mut CommandState<'src>,
) -> Result<(), ErrMode<GrammarError<'src>>>
where
    'src: 'slice,
{
    match input.split_first() {
        Some((token, rest)) if accepts(spec, token.kind) => {
            *input = rest;
            let value = parse_value(token, spec).map_err(ErrMode::Cut)?;
            state.apply_value(slot, value)
        }
        _ if optional => Ok(()),
        Some((token, _)) => Err(ErrMode::Backtrack(GrammarError::unexpected(
            label,
            Some(token),
        ))),
        None => Err(ErrMode::Backtrack(GrammarError::unexpected(label, None))),
    }
}

fn parse_assignments<'src, 'slice>(
    input: &mut Input<'src, 'slice>,
    state: &mut CommandState<'src>,
) -> Result<(), ErrMode<GrammarError<'src>>>
where
    'src: 'slice,
{
    loop {
        let tokens: &'slice [Token<'src>] = *input;
        match tokens {
            [key, equals, value, rest @ ..]
                if key.kind == TokenKind::Ident && equals.kind == TokenKind::Equals =>
            {
                let parsed = assignment_value(value).map_err(ErrMode::Cut)?;
                state.push_assignment(key.lexeme, parsed)?;
                *input = rest;
            }
            [key, equals, ..] if key.kind == TokenKind::Ident => {
                return Err(ErrMode::Backtrack(GrammarError::unexpected(
                    "=",
                    Some(equals),
                )));
            }
            [key] if key.kind == TokenKind::Ident => {
                return Err(ErrMode::Backtrack(GrammarError::unexpected("=", None)));
            }
            [token, ..] if token.kind != TokenKind::Eol => {
                return Err(ErrMode::Backtrack(GrammarError::unexpected(
                    "key=value",
                    Some(token),
                )));
            }
            _ => return Ok(()),
        }
    }
}

fn assignment_value<'src>(token: &Token<'src>) -> Result<ParamValue<'src>, GrammarError<'src>> {
    match token.kind {
        TokenKind::Integer | TokenKind::Decimal => parse_number(token).map(ParamValue::Number),
        TokenKind::Duration => {
            parse_duration(token).map(|duration| ParamValue::Number(duration.as_secs_f32()))
        }
        TokenKind::Ident => Ok(ParamValue::from_word(token.lexeme)),
        _ => Err(GrammarError::unexpected("value", Some(token))),
    }
}

fn parse_topic<'src, 'slice>(
    input: &mut Input<'src, 'slice>,
    state: &mut CommandState<'src>,
) -> Result<(), ErrMode<GrammarError<'src>>>
where
    'src: 'slice,
{
    match input.split_first() {
        Some((token, rest)) if token.kind == TokenKind::Ident => {
            state.set_topic(token.lexeme);
            *input = rest;
            Ok(())
        }
        Some((token, _)) if token.kind != TokenKind::Eol => Err(ErrMode::Backtrack(
            GrammarError::unexpected("identifier", Some(token)),
        )),
        _ => Ok(()),
    }
}

fn accepts(spec: ValueSpec, kind: TokenKind) -> bool {
    match spec {
        ValueSpec::Duration => kind == TokenKind::Duration,
        ValueSpec::Integer { .. } => kind == TokenKind::Integer,
        ValueSpec::Number => matches!(kind, TokenKind::Integer | TokenKind::Decimal),
    }
}

fn parse_value<'a>(token: &Token<'a>, spec: ValueSpec) -> Result<SlotValue, GrammarError<'a>> {
    match spec {
        ValueSpec::Duration => parse_duration(token).map(SlotValue::Duration),
        ValueSpec::Integer { max } => parse_integer(token, max).map(SlotValue::Integer),
        ValueSpec::Number => parse_number(token).map(SlotValue::Number),
    }
}

fn find_choice(choices: &'static [ChoiceBranch], lexeme: &str) -> Option<&'static ChoiceBranch> {
    choices
        .iter()
        .find(|choice| choice.keyword.eq_ignore_ascii_case(lexeme))
}

fn choice_expected_label(choices: &'static [ChoiceBranch]) -> &'static str {
    choices.first().map_or("keyword", |choice| choice.keyword)
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum SlotValue {
    Duration(Duration),
    Integer(u32),
    Number(f32),
}

enum CommandState<'a> {
    Start { params: StartParams<'a> },
    Fixed(Command<'a>),
    Setpoint { zone: Option<u8>, value: Option<f32> },
    Alarms { history: bool },
    Ack { index: Option<usize> },
    Advance { by: Option<Duration> },
    Help { topic: Option<&'a str> },
}

impl<'a> CommandState<'a> {
    fn new(tag: CommandTag) -> Self {
        match tag {
            CommandTag::Start => CommandState::Start {
                params: StartParams::new(),
            },
            CommandTag::Stop => CommandState::Fixed(Command::Stop),
            CommandTag::Pause => CommandState::Fixed(Command::Pause),
            CommandTag::Resume => CommandState::Fixed(Command::Resume),
            CommandTag::Next => CommandState::Fixed(Command::Next),
            CommandTag::Status => CommandState::Fixed(Command::Status),
            CommandTag::Templates => CommandState::Fixed(Command::Templates),
            CommandTag::Setpoint => CommandState::Setpoint {
                zone: None,
                value: None,
            },
            CommandTag::Alarms => CommandState::Alarms { history: false },
            CommandTag::Ack => CommandState::Ack { index: None },
            CommandTag::Advance => CommandState::Advance { by: None },
            CommandTag::Help => CommandState::Help { topic: None },
        }
    }

    fn apply_choice(&mut self, tag: ChoiceTag) -> Result<(), ErrMode<GrammarError<'a>>> {
        match (self, tag) {
            (CommandState::Alarms { history }, ChoiceTag::AlarmsHistory) => {
                *history = true;
                Ok(())
            }
            (CommandState::Ack { index: None }, ChoiceTag::AckAll) => Ok(()),
            (CommandState::Ack { index: Some(_) }, ChoiceTag::AckAll) => Err(ErrMode::Backtrack(
                GrammarError::unexpected("end of command", None),
            )),
            _ => Err(ErrMode::Backtrack(GrammarError::unexpected("choice", None))),
        }
    }

    fn apply_value(
        &mut self,
        slot: ValueSlot,
        value: SlotValue,
    ) -> Result<(), ErrMode<GrammarError<'a>>> {
        match (self, slot, value) {
            (CommandState::Setpoint { zone, .. }, ValueSlot::Zone, SlotValue::Integer(raw)) => {
                let parsed = u8::try_from(raw)
                    .map_err(|_| ErrMode::Cut(GrammarError::unexpected("zone", None)))?;
                *zone = Some(parsed);
                Ok(())
            }
            (
                CommandState::Setpoint { value: slot, .. },
                ValueSlot::SetpointValue,
                SlotValue::Number(number),
            ) => {
                *slot = Some(number);
                Ok(())
            }
            (CommandState::Ack { index }, ValueSlot::AlarmIndex, SlotValue::Integer(raw)) => {
                let parsed = usize::try_from(raw)
                    .map_err(|_| ErrMode::Cut(GrammarError::unexpected("alarm index", None)))?;
                *index = Some(parsed);
                Ok(())
            }
            (CommandState::Advance { by }, ValueSlot::AdvanceBy, SlotValue::Duration(duration)) => {
                *by = Some(duration);
                Ok(())
            }
            _ => Err(ErrMode::Backtrack(GrammarError::unexpected("value", None))),
        }
    }

    fn push_assignment(
        &mut self,
        key: &'a str,
        value: ParamValue<'a>,
    ) -> Result<(), ErrMode<GrammarError<'a>>> {
        match self {
            CommandState::Start { params } => params
                .push(key, value)
                .map_err(|_| ErrMode::Cut(GrammarError::too_many_parameters())),
            _ => Err(ErrMode::Backtrack(GrammarError::unexpected(
                "end of command",
                None,
            ))),
        }
    }

    fn set_topic(&mut self, topic: &'a str) {
        if let CommandState::Help { topic: slot } = self {
            *slot = Some(topic);
        }
    }

    fn finish(self) -> Result<Command<'a>, ErrMode<GrammarError<'a>>> {
        match self {
            CommandState::Start { params } => Ok(Command::Start(params)),
            CommandState::Fixed(command) => Ok(command),
            CommandState::Setpoint {
                zone: Some(zone),
                value: Some(value),
            } => Ok(Command::Setpoint { zone, value }),
            CommandState::Setpoint { .. } => Err(ErrMode::Backtrack(GrammarError::unexpected(
                "setpoint value",
                None,
            ))),
            CommandState::Alarms { history } => Ok(Command::Alarms(if history {
                AlarmsCommand::History
            } else {
                AlarmsCommand::Active
            })),
            CommandState::Ack { index } => Ok(Command::Ack(
                index.map_or(AckCommand::All, AckCommand::Index),
            )),
            CommandState::Advance { by: Some(duration) } => Ok(Command::Advance(duration)),
            CommandState::Advance { by: None } => Err(ErrMode::Backtrack(
                GrammarError::unexpected("duration", None),
            )),
            CommandState::Help { topic } => Ok(Command::Help(HelpCommand { topic })),
        }
    }
}

fn expect_kind<'src, 'slice>(
    kind: TokenKind,
    label: &'static str,
) -> impl Parser<Input<'src, 'slice>, Token<'src>, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| match input.split_first() {
        Some((token, rest)) if token.kind == kind => {
            *input = rest;
            Ok(token.clone())
        }
        Some((token, _)) => Err(ErrMode::Backtrack(GrammarError::unexpected(
            label,
            Some(token),
        ))),
        None => Err(ErrMode::Backtrack(GrammarError::unexpected(label, None))),
    }
}

fn parse_integer<'a>(token: &Token<'a>, max: u32) -> Result<u32, GrammarError<'a>> {
    token
        .lexeme
        .parse::<u32>()
        .ok()
        .filter(|value| *value <= max)
        .ok_or_else(|| GrammarError::invalid_integer(token))
}

fn parse_number<'a>(token: &Token<'a>) -> Result<f32, GrammarError<'a>> {
    token
        .lexeme
        .parse::<f32>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| GrammarError::invalid_number(token))
}

fn parse_duration<'a>(token: &Token<'a>) -> Result<Duration, GrammarError<'a>> {
    let text = token.lexeme;
    let (digits, scale_ms) = if let Some(rest) = text.strip_suffix("ms") {
        (rest, 1)
    } else if let Some(rest) = text.strip_suffix('s') {
        (rest, 1_000)
    } else if let Some(rest) = text.strip_suffix('m') {
        (rest, 60_000)
    } else if let Some(rest) = text.strip_suffix('h') {
        (rest, 3_600_000)
    } else {
        return Err(GrammarError::invalid_duration(token));
    };
    let count = digits
        .parse::<u32>()
        .map_err(|_| GrammarError::invalid_duration(token))?;
    Ok(Duration::from_millis(u64::from(count) * scale_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(input: &str) -> Command<'_> {
        parse(input).expect("command should parse")
    }

    #[test]
    fn parses_bare_commands() {
        assert_eq!(parse_ok("stop"), Command::Stop);
        assert_eq!(parse_ok("pause"), Command::Pause);
        assert_eq!(parse_ok("resume\r\n"), Command::Resume);
        assert_eq!(parse_ok("next"), Command::Next);
        assert_eq!(parse_ok("status"), Command::Status);
        assert_eq!(parse_ok("templates"), Command::Templates);
    }

    #[test]
    fn parses_start_assignments() {
        match parse_ok("start cycles=30 annealTemp=58.5 hotStart=on denatureTime=45s") {
            Command::Start(params) => {
                assert_eq!(params.len(), 4);
                assert_eq!(params.get("cycles"), Some(ParamValue::Number(30.0)));
                assert_eq!(params.get("annealtemp"), Some(ParamValue::Number(58.5)));
                assert_eq!(params.get("hotStart"), Some(ParamValue::Flag(true)));
                assert_eq!(params.get("denatureTime"), Some(ParamValue::Number(45.0)));
            }
            other => panic!("expected start, got {other:?}"),
        }
    }

    fn start_line(assignments: usize) -> heapless::String<512> {
        use core::fmt::Write as _;
        let mut line = heapless::String::new();
        line.push_str("start").expect("capacity");
        for index in 0..assignments {
            write!(line, " key{index}=1").expect("capacity");
        }
        line
    }

    #[test]
    fn start_accepts_the_full_parameter_budget() {
        let line = start_line(MAX_PARAMS);
        match parse_ok(&line) {
            Command::Start(params) => assert_eq!(params.len(), MAX_PARAMS),
            other => panic!("expected start, got {other:?}"),
        }

        let line = start_line(MAX_PARAMS + 1);
        assert!(matches!(
            parse(&line),
            Err(ParseError::Grammar(GrammarError {
                kind: GrammarErrorKind::TooManyParameters { limit: MAX_PARAMS }
            }))
        ));
    }

    #[test]
    fn start_without_parameters_is_empty() {
        match parse_ok("start") {
            Command::Start(params) => assert!(params.is_empty()),
            other => panic!("expected start, got {other:?}"),
        }
    }

    #[test]
    fn start_accepts_template_names() {
        match parse_ok("start template=mammalian") {
            Command::Start(params) => {
                assert_eq!(params.get("template"), Some(ParamValue::Text("mammalian")));
            }
            other => panic!("expected start, got {other:?}"),
        }
    }

    #[test]
    fn start_rejects_dangling_key() {
        match parse("start cycles") {
            Err(ParseError::Grammar(GrammarError {
                kind: GrammarErrorKind::UnexpectedEnd { expected: "=" },
            })) => {}
            other => panic!("expected missing '=', got {other:?}"),
        }
    }

    #[test]
    fn parses_setpoint_with_decimal_and_negative_values() {
        match parse_ok("setpoint 1 60.5") {
            Command::Setpoint { zone: 1, value } => assert!((value - 60.5).abs() < f32::EPSILON),
            other => panic!("expected setpoint, got {other:?}"),
        }
        match parse_ok("setpoint 0 -2") {
            Command::Setpoint { zone: 0, value } => assert!((value + 2.0).abs() < f32::EPSILON),
            other => panic!("expected setpoint, got {other:?}"),
        }
    }

    #[test]
    fn setpoint_requires_both_arguments() {
        match parse("setpoint 1") {
            Err(ParseError::Grammar(GrammarError {
                kind: GrammarErrorKind::UnexpectedEnd { expected },
            })) => assert_eq!(expected, "setpoint value"),
            other => panic!("expected missing value, got {other:?}"),
        }
    }

    #[test]
    fn setpoint_rejects_zone_overflow() {
        match parse("setpoint 300 20") {
            Err(ParseError::Grammar(err)) => {
                assert!(matches!(err.kind, GrammarErrorKind::InvalidInteger { .. }));
            }
            other => panic!("expected invalid integer, got {other:?}"),
        }
    }

    #[test]
    fn parses_alarm_commands() {
        assert_eq!(parse_ok("alarms"), Command::Alarms(AlarmsCommand::Active));
        assert_eq!(
            parse_ok("alarms history"),
            Command::Alarms(AlarmsCommand::History)
        );
        assert_eq!(parse_ok("ack"), Command::Ack(AckCommand::All));
        assert_eq!(parse_ok("ack all"), Command::Ack(AckCommand::All));
        assert_eq!(parse_ok("ack 2"), Command::Ack(AckCommand::Index(2)));
    }

    #[test]
    fn ack_rejects_index_with_all() {
        assert!(parse("ack 1 all").is_err());
    }

    #[test]
    fn parses_advance_units() {
        assert_eq!(
            parse_ok("advance 150ms"),
            Command::Advance(Duration::from_millis(150))
        );
        assert_eq!(
            parse_ok("advance 30s"),
            Command::Advance(Duration::from_secs(30))
        );
        assert_eq!(
            parse_ok("advance 5m"),
            Command::Advance(Duration::from_secs(300))
        );
        assert_eq!(
            parse_ok("advance 2h"),
            Command::Advance(Duration::from_secs(7_200))
        );
    }

    #[test]
    fn advance_requires_suffix() {
        assert!(parse("advance 30").is_err());
    }

    #[test]
    fn parses_help_topic() {
        assert_eq!(
            parse_ok("help setpoint"),
            Command::Help(HelpCommand {
                topic: Some("setpoint"),
            })
        );
        assert_eq!(parse_ok("help"), Command::Help(HelpCommand { topic: None }));
    }

    #[test]
    fn rejects_invalid_token() {
        match parse("stop$") {
            Err(ParseError::Grammar(err)) => {
                assert!(matches!(err.kind, GrammarErrorKind::InvalidToken { .. }));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_command() {
        match parse("reboot now") {
            Err(ParseError::Grammar(GrammarError {
                kind: GrammarErrorKind::UnexpectedToken { expected, .. },
            })) => assert_eq!(expected, "command keyword"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn rejects_trailing_arguments() {
        assert!(parse("status now").is_err());
    }

    #[test]
    fn supports_case_insensitive_keywords() {
        assert_eq!(parse_ok("StAtUs"), Command::Status);
        assert_eq!(
            parse_ok("ALARMS History"),
            Command::Alarms(AlarmsCommand::History)
        );
    }

    #[test]
    fn lexer_emits_error_token_for_unknown_symbol() {
        let tokens = lex("status$").expect("lexing should succeed");
        let last = tokens.last().expect("expected at least one token");
        assert_eq!(last.kind, TokenKind::Error);
        assert_eq!(last.lexeme, "$");
    }

    #[test]
    fn lexer_prefers_duration_over_integer() {
        let tokens = lex("advance 10ms").expect("lexing should succeed");
        let kinds: heapless::Vec<TokenKind, 4> = tokens.iter().map(|token| token.kind).collect();
        assert_eq!(kinds.as_slice(), &[TokenKind::Ident, TokenKind::Duration]);
    }
}
