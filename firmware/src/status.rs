#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Shared status storage for the firmware target.
//!
//! Lightweight atomics track heater outputs, the control loop heartbeat and
//! the REPL link so tasks can observe each other without sharing the device.

use portable_atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

/// Bitmask of energised heater channels (1 == on).
static HEATER_MASK: AtomicU8 = AtomicU8::new(0);
/// Controller clock of the last completed control tick, in milliseconds.
static LAST_TICK_MS: AtomicU64 = AtomicU64::new(0);
/// Whether a host holds the REPL port open (DTR asserted).
static REPL_ATTACHED: AtomicBool = AtomicBool::new(false);

fn bit_for(index: usize) -> u8 {
    u8::try_from(index)
        .ok()
        .and_then(|index| 1u8.checked_shl(u32::from(index)))
        .unwrap_or(0)
}

/// Records the output level of one heater channel.
pub fn record_heater(index: usize, on: bool) {
    let bit = bit_for(index);
    if on {
        HEATER_MASK.fetch_or(bit, Ordering::Relaxed);
    } else {
        HEATER_MASK.fetch_and(!bit, Ordering::Relaxed);
    }
}

pub fn heater_mask() -> u8 {
    HEATER_MASK.load(Ordering::Relaxed)
}

pub fn record_tick(now_ms: u64) {
    LAST_TICK_MS.store(now_ms, Ordering::Relaxed);
}

pub fn last_tick_ms() -> u64 {
    LAST_TICK_MS.load(Ordering::Relaxed)
}

pub fn set_repl_attached(attached: bool) {
    REPL_ATTACHED.store(attached, Ordering::Relaxed);
}

pub fn repl_attached() -> bool {
    REPL_ATTACHED.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heater_bits_track_each_channel() {
        record_heater(0, true);
        record_heater(2, true);
        assert_eq!(heater_mask() & 0b101, 0b101);
        record_heater(0, false);
        assert_eq!(heater_mask() & 0b101, 0b100);
        record_heater(2, false);

        record_heater(9, true);
        assert_eq!(heater_mask() & 0b101, 0);
    }
}
