#![no_std]

#[cfg(feature = "alloc")]
extern crate alloc;

// Process-control core for the lab instrument family.
//
// The engines (thermal cycling, protocol sequencing, ramps and alarms) are
// tick-driven and allocation-free so the same code runs in the MCU firmware
// and in the host emulator. Hosts supply a monotonic clock and a `Plant`.

pub mod alarms;
pub mod device;
pub mod environment;
pub mod protocol;
pub mod ramp;
pub mod repl;
pub mod telemetry;
pub mod thermal;
pub mod timing;
