//! Operator REPL over the USB CDC port.
//!
//! Bytes arrive in USB packets and are assembled into lines here; complete
//! lines are executed against the shared [`CommandExecutor`] and the reply is
//! cut back into packets with `\r\n` line endings.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use core::fmt::Write as _;
use core::str;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::{Sender, TrySendError};
use heapless::{String, Vec};
use instrument_core::device::{CommandRejection, Device};
use instrument_core::repl::{
    CommandError, CommandExecutor, CommandOutcome, write_error, write_response,
};
use instrument_core::timing::Millis;

use crate::config::MAX_LINE_LEN;

/// Payload size of one USB full-speed bulk packet.
pub const REPL_FRAME_SIZE: usize = 64;

/// Capacity of a rendered reply.
pub const REPLY_CAPACITY: usize = 2_048;

/// Chunk of bytes exchanged with the USB task.
pub type ReplFrame = Vec<u8, REPL_FRAME_SIZE>;

/// Rendered reply text.
pub type Reply = String<REPLY_CAPACITY>;

const TRUNCATED: &str = "\n(truncated)";

/// Result of feeding one byte to the [`LineAssembler`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LineStatus {
    Pending,
    /// A complete line is available from [`LineAssembler::line`].
    Ready,
    /// The line exceeded the buffer and was discarded.
    Overflowed,
    /// The line was not valid UTF-8 and was discarded.
    InvalidUtf8,
}

/// Collects bytes until CR or LF, honouring backspace.
pub struct LineAssembler {
    buffer: Vec<u8, MAX_LINE_LEN>,
    overflowed: bool,
    ready: bool,
}

impl LineAssembler {
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            overflowed: false,
            ready: false,
        }
    }

    pub fn push(&mut self, byte: u8) -> LineStatus {
        if self.ready {
            self.clear();
        }

        match byte {
            b'\r' | b'\n' => self.finish(),
            0x08 | 0x7f => {
                self.buffer.pop();
                LineStatus::Pending
            }
            value => {
                if self.buffer.push(value).is_err() {
                    self.overflowed = true;
                }
                LineStatus::Pending
            }
        }
    }

    fn finish(&mut self) -> LineStatus {
        if self.overflowed {
            self.clear();
            return LineStatus::Overflowed;
        }
        if self.buffer.iter().all(u8::is_ascii_whitespace) {
            self.clear();
            return LineStatus::Pending;
        }
        if str::from_utf8(&self.buffer).is_err() {
            self.clear();
            return LineStatus::InvalidUtf8;
        }
        self.ready = true;
        LineStatus::Ready
    }

    /// The completed line after [`LineStatus::Ready`].
    pub fn line(&self) -> Option<&str> {
        if self.ready {
            str::from_utf8(&self.buffer).ok()
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.overflowed = false;
        self.ready = false;
    }
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Executes `line` and renders the reply into `reply`.
///
/// The simulated clock belongs to the emulator, so `advance` is refused.
pub fn respond<D: Device>(
    executor: &mut CommandExecutor<D>,
    line: &str,
    now: Millis,
    reply: &mut Reply,
) {
    reply.clear();
    let written = match executor.execute(line, now) {
        Ok(CommandOutcome::Advance(_)) => write_error(
            reply,
            &CommandError::Rejected(CommandRejection::Unsupported("advance")),
        ),
        Ok(outcome) => write_response(reply, &outcome, executor.device()),
        Err(error) => write_error(reply, &error),
    };
    if written.is_err() {
        mark_truncated(reply);
    }
}

/// Renders the reply for a line the assembler had to drop.
pub fn reject_line(status: LineStatus, reply: &mut Reply) {
    reply.clear();
    let message = match status {
        LineStatus::Overflowed => "ERR line too long",
        LineStatus::InvalidUtf8 => "ERR invalid utf-8",
        LineStatus::Pending | LineStatus::Ready => return,
    };
    let _ = reply.push_str(message);
}

fn mark_truncated(reply: &mut Reply) {
    let mut keep = REPLY_CAPACITY - TRUNCATED.len();
    while keep > 0 && !reply.is_char_boundary(keep) {
        keep -= 1;
    }
    if keep < reply.len() {
        reply.truncate(keep);
    }
    let _ = reply.write_str(TRUNCATED);
}

/// Splits `text` into USB frames, terminating every line with `\r\n`.
pub fn frames(text: &str) -> Frames<'_> {
    Frames {
        bytes: text.bytes(),
        pending_lf: false,
        done: false,
    }
}

/// Iterator returned by [`frames`].
pub struct Frames<'a> {
    bytes: str::Bytes<'a>,
    pending_lf: bool,
    done: bool,
}

impl Iterator for Frames<'_> {
    type Item = ReplFrame;

    fn next(&mut self) -> Option<ReplFrame> {
        let mut frame = ReplFrame::new();
        while !frame.is_full() {
            let byte = if self.pending_lf {
                self.pending_lf = false;
                b'\n'
            } else {
                match self.bytes.next() {
                    Some(b'\n') => {
                        self.pending_lf = true;
                        b'\r'
                    }
                    Some(byte) => byte,
                    None if !self.done => {
                        self.done = true;
                        self.pending_lf = true;
                        b'\r'
                    }
                    None => break,
                }
            };
            // Loop condition guarantees room.
            let _ = frame.push(byte);
        }
        (!frame.is_empty()).then_some(frame)
    }
}

/// Queues `text` for the USB task without waiting for room.
///
/// Once a frame does not fit, the rest of the text is dropped so the host
/// never sees a line with a hole in it. Returns the number of frames lost.
pub fn enqueue_text<M: RawMutex, const N: usize>(
    queue: &Sender<'_, M, ReplFrame, N>,
    text: &str,
) -> usize {
    let mut pending = frames(text);
    while let Some(frame) = pending.next() {
        if let Err(TrySendError::Full(_)) = queue.try_send(frame) {
            return 1 + pending.count();
        }
    }
    0
}
