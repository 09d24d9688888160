//! `key=value` start parameters.
//!
//! Operators configure a run with flat assignments such as
//! `start cycles=30 annealTemp=58.5 hotStart=on`. Values are untyped until a
//! device asks for them; keys match case-insensitively.

use core::time::Duration;

use heapless::Vec;

use super::CommandRejection;

/// Maximum number of assignments accepted by one `start`.
///
/// Room for every PCR start key plus a few repeats.
pub const MAX_PARAMS: usize = 32;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ParamValue<'a> {
    Number(f32),
    Flag(bool),
    Text(&'a str),
}

impl<'a> ParamValue<'a> {
    /// Interprets a bare word: `true/false/on/off/yes/no` become flags.
    #[must_use]
    pub fn from_word(word: &'a str) -> Self {
        const TRUE: [&str; 3] = ["true", "on", "yes"];
        const FALSE: [&str; 3] = ["false", "off", "no"];
        if TRUE.iter().any(|t| t.eq_ignore_ascii_case(word)) {
            ParamValue::Flag(true)
        } else if FALSE.iter().any(|f| f.eq_ignore_ascii_case(word)) {
            ParamValue::Flag(false)
        } else {
            ParamValue::Text(word)
        }
    }
}

/// Ordered list of start assignments.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StartParams<'a> {
    entries: Vec<(&'a str, ParamValue<'a>), MAX_PARAMS>,
}

impl<'a> StartParams<'a> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Adds an assignment. Later assignments override earlier ones.
    pub fn push(&mut self, key: &'a str, value: ParamValue<'a>) -> Result<(), CommandRejection> {
        self.entries
            .push((key, value))
            .map_err(|_| CommandRejection::InvalidParameter("too many parameters"))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(&'a str, ParamValue<'a>)> {
        self.entries.iter()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<ParamValue<'a>> {
        self.entries
            .iter()
            .rev()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| *value)
    }

    /// Rejects the first key not listed in `known`.
    pub fn ensure_known(&self, known: &[&str]) -> Result<(), CommandRejection> {
        match self
            .entries
            .iter()
            .find(|(name, _)| !known.iter().any(|k| k.eq_ignore_ascii_case(name)))
        {
            Some((name, _)) => Err(CommandRejection::unknown_parameter(name)),
            None => Ok(()),
        }
    }

    pub fn number(&self, key: &'static str) -> Result<Option<f32>, CommandRejection> {
        match self.get(key) {
            None => Ok(None),
            Some(ParamValue::Number(value)) if value.is_finite() => Ok(Some(value)),
            Some(_) => Err(CommandRejection::InvalidParameter(key)),
        }
    }

    pub fn flag(&self, key: &'static str) -> Result<Option<bool>, CommandRejection> {
        match self.get(key) {
            None => Ok(None),
            Some(ParamValue::Flag(value)) => Ok(Some(value)),
            Some(ParamValue::Number(value)) if value == 0.0 || value == 1.0 => {
                Ok(Some(value == 1.0))
            }
            Some(_) => Err(CommandRejection::InvalidParameter(key)),
        }
    }

    pub fn text(&self, key: &'static str) -> Result<Option<&'a str>, CommandRejection> {
        match self.get(key) {
            None => Ok(None),
            Some(ParamValue::Text(value)) => Ok(Some(value)),
            Some(_) => Err(CommandRejection::InvalidParameter(key)),
        }
    }

    /// Non-negative whole seconds.
    pub fn seconds(&self, key: &'static str) -> Result<Option<Duration>, CommandRejection> {
        match self.number(key)? {
            None => Ok(None),
            Some(value) if value >= 0.0 && value <= 604_800.0 => {
                Ok(Some(Duration::from_millis(whole(value * 1_000.0))))
            }
            Some(_) => Err(CommandRejection::InvalidParameter(key)),
        }
    }

    pub fn count_u16(&self, key: &'static str) -> Result<Option<u16>, CommandRejection> {
        match self.number(key)? {
            None => Ok(None),
            Some(value) if is_whole(value) && value <= f32::from(u16::MAX) => {
                u16::try_from(whole(value))
                    .map(Some)
                    .map_err(|_| CommandRejection::InvalidParameter(key))
            }
            Some(_) => Err(CommandRejection::InvalidParameter(key)),
        }
    }

    pub fn count_u8(&self, key: &'static str) -> Result<Option<u8>, CommandRejection> {
        match self.count_u16(key)? {
            None => Ok(None),
            Some(value) => u8::try_from(value)
                .map(Some)
                .map_err(|_| CommandRejection::InvalidParameter(key)),
        }
    }
}

fn is_whole(value: f32) -> bool {
    value >= 0.0 && value - (whole(value) as f32) == 0.0
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn whole(value: f32) -> u64 {
    value as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(entries: &[(&'static str, ParamValue<'static>)]) -> StartParams<'static> {
        let mut params = StartParams::new();
        for (key, value) in entries {
            params.push(key, *value).expect("capacity");
        }
        params
    }

    #[test]
    fn lookups_are_case_insensitive_and_last_wins() {
        let params = params(&[
            ("Cycles", ParamValue::Number(30.0)),
            ("cycles", ParamValue::Number(25.0)),
        ]);
        assert_eq!(params.count_u16("cycles"), Ok(Some(25)));
        assert_eq!(params.number("annealTemp"), Ok(None));
    }

    #[test]
    fn words_become_flags_or_text() {
        assert_eq!(ParamValue::from_word("ON"), ParamValue::Flag(true));
        assert_eq!(ParamValue::from_word("no"), ParamValue::Flag(false));
        assert_eq!(ParamValue::from_word("yeast"), ParamValue::Text("yeast"));
    }

    #[test]
    fn type_mismatches_are_rejected() {
        let params = params(&[
            ("cycles", ParamValue::Number(2.5)),
            ("hotStart", ParamValue::Text("maybe")),
            ("denatureTime", ParamValue::Number(-1.0)),
        ]);
        assert_eq!(
            params.count_u16("cycles"),
            Err(CommandRejection::InvalidParameter("cycles"))
        );
        assert_eq!(
            params.flag("hotStart"),
            Err(CommandRejection::InvalidParameter("hotStart"))
        );
        assert_eq!(
            params.seconds("denatureTime"),
            Err(CommandRejection::InvalidParameter("denatureTime"))
        );
    }

    #[test]
    fn unknown_keys_are_reported() {
        let params = params(&[("cylces", ParamValue::Number(3.0))]);
        match params.ensure_known(&["cycles"]) {
            Err(CommandRejection::UnknownParameter(name)) => assert_eq!(name.as_str(), "cylces"),
            other => panic!("expected unknown parameter, got {other:?}"),
        }
    }

    #[test]
    fn seconds_accept_fractions() {
        let params = params(&[("annealTime", ParamValue::Number(1.5))]);
        assert_eq!(
            params.seconds("annealTime"),
            Ok(Some(Duration::from_millis(1_500)))
        );
    }
}
