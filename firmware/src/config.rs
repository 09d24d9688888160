//! Build-time configuration for the instrument firmware.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use core::time::Duration;

use instrument_core::device::DeviceKind;

/// Instrument personality flashed onto this board.
///
/// The reference board carries three heater channels with TMP36 sensors,
/// which matches the PCR block layout.
pub const DEVICE_KIND: DeviceKind = DeviceKind::Pcr;

/// Control loop period.
pub const CONTROL_PERIOD: Duration = Duration::from_millis(100);

/// Half-width of the heater hysteresis band in degrees Celsius.
pub const HEATER_BAND_C: f32 = 0.5;

/// Heaters are forced off at or above this block temperature.
pub const HEATER_CUTOFF_C: f32 = 105.0;

/// Longest REPL line accepted, excluding the terminator.
///
/// Long enough for a `start` line setting every PCR key.
pub const MAX_LINE_LEN: usize = 640;

/// Whether control events are echoed to the REPL in addition to defmt.
pub const ECHO_EVENTS: bool = true;

/// USB identity advertised to the host.
pub const USB_VID: u16 = 0x1209;
pub const USB_PID: u16 = 0x0001;
pub const USB_MANUFACTURER: &str = "Lab Instruments";
pub const USB_PRODUCT: &str = "Instrument Controller";
