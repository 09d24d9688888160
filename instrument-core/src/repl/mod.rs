//! REPL tooling shared between firmware and emulator targets.
//!
//! The grammar lives in [`grammar`] and is implemented with a token/parse
//! pipeline that stays compatible with `no_std`. [`commands`] routes parsed
//! commands to a device and [`status`] renders the replies.

pub mod catalog;
pub mod commands;
pub mod grammar;
pub mod status;

pub use commands::{CommandError, CommandExecutor, CommandOutcome};
pub use status::{write_error, write_response};

/// Renders the reply to one executed line into an owned string.
#[cfg(feature = "alloc")]
#[must_use]
pub fn render_reply<D: crate::device::Device>(
    result: &commands::CommandResult<'_>,
    device: &D,
) -> alloc::string::String {
    let mut text = alloc::string::String::new();
    // Writing into a `String` cannot fail.
    let _ = match result {
        Ok(outcome) => write_response(&mut text, outcome, device),
        Err(error) => write_error(&mut text, error),
    };
    text
}
