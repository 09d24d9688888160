//! Board-level sensing and actuation.
//!
//! The conversions and the heater switch are plain arithmetic so they are
//! unit tested on the host; the ADC and GPIO glue in [`heater`] only builds
//! for the MCU.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

#[cfg(target_os = "none")]
pub mod heater;

/// Full-scale reading of the 12-bit ADC.
pub const ADC_FULL_SCALE: u32 = 4_095;

/// Supply voltage at which the factory VREFINT calibration was taken.
pub const VREFINT_CAL_MV: u32 = 3_000;

/// Analog supply voltage derived from a VREFINT conversion.
///
/// Returns `None` for a zero reading, which only happens with a dead ADC.
#[must_use]
pub fn vdda_millivolts(calibration: u16, vrefint_raw: u16) -> Option<u32> {
    if vrefint_raw == 0 {
        return None;
    }
    Some(VREFINT_CAL_MV * u32::from(calibration) / u32::from(vrefint_raw))
}

/// Converts a raw channel conversion to millivolts at the given supply.
#[must_use]
pub fn channel_millivolts(raw: u16, vdda_mv: u32) -> u32 {
    u32::from(raw) * vdda_mv / ADC_FULL_SCALE
}

/// TMP36 transfer function: 500 mV offset, 10 mV per degree.
#[must_use]
pub fn tmp36_celsius(millivolts: u32) -> f32 {
    #[allow(clippy::cast_precision_loss)]
    let mv = millivolts as f32;
    (mv - 500.0) / 10.0
}

/// Bang-bang heater control with a symmetric dead band around the setpoint.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HysteresisSwitch {
    band: f32,
    on: bool,
}

impl HysteresisSwitch {
    #[must_use]
    pub const fn new(band: f32) -> Self {
        Self { band, on: false }
    }

    #[must_use]
    pub const fn is_on(&self) -> bool {
        self.on
    }

    /// Updates the output for the latest reading and returns it.
    pub fn update(&mut self, reading: f32, setpoint: f32) -> bool {
        if reading <= setpoint - self.band {
            self.on = true;
        } else if reading >= setpoint + self.band {
            self.on = false;
        }
        self.on
    }

    pub fn force_off(&mut self) {
        self.on = false;
    }
}
