//! ADC-sensed heater channels exposed to the control core as a [`Plant`].

use core::ptr;

use embassy_stm32::adc::{Adc, AnyAdcChannel, SampleTime, VrefInt};
use embassy_stm32::gpio::Output;
use embassy_stm32::peripherals::ADC1;
use instrument_core::environment::Plant;
use instrument_core::timing::Millis;

use super::{HysteresisSwitch, channel_millivolts, tmp36_celsius, vdda_millivolts};
use crate::config::HEATER_CUTOFF_C;
use crate::status;

/// Heater channels populated on the board.
pub const HEATER_ZONES: usize = 3;

/// Factory-programmed VREFINT calibration constant sampled at 3.0 V.
const VREFINT_CAL_ADDR: *const u16 = 0x1FFF_75AA as *const u16;

fn read_vrefint_calibration() -> u16 {
    // SAFETY: fixed, always-readable address in the system memory area.
    unsafe { ptr::read_volatile(VREFINT_CAL_ADDR) }
}

/// One TMP36 input paired with its heater output.
pub struct HeaterZone<'d> {
    sensor: AnyAdcChannel<ADC1>,
    output: Output<'d>,
    switch: HysteresisSwitch,
    setpoint: f32,
    reading: Option<f32>,
}

impl<'d> HeaterZone<'d> {
    pub fn new(sensor: AnyAdcChannel<ADC1>, output: Output<'d>, band: f32) -> Self {
        Self {
            sensor,
            output,
            switch: HysteresisSwitch::new(band),
            setpoint: 0.0,
            reading: None,
        }
    }
}

pub struct HeaterPlant<'d> {
    adc: Adc<'d, ADC1>,
    vrefint: VrefInt,
    calibration: u16,
    zones: [HeaterZone<'d>; HEATER_ZONES],
}

impl<'d> HeaterPlant<'d> {
    pub fn new(mut adc: Adc<'d, ADC1>, zones: [HeaterZone<'d>; HEATER_ZONES]) -> Self {
        adc.set_sample_time(SampleTime::CYCLES160_5);
        let vrefint = adc.enable_vrefint();
        Self {
            adc,
            vrefint,
            calibration: read_vrefint_calibration(),
            zones,
        }
    }

    fn sample(&mut self, index: usize) -> Option<f32> {
        let vrefint_raw = self.adc.blocking_read(&mut self.vrefint);
        let vdda = vdda_millivolts(self.calibration, vrefint_raw)?;
        let zone = self.zones.get_mut(index)?;
        let raw = self.adc.blocking_read(&mut zone.sensor);
        let celsius = tmp36_celsius(channel_millivolts(raw, vdda));
        zone.reading = Some(celsius);
        Some(celsius)
    }

    /// Samples every channel and drives the heaters toward their setpoints.
    ///
    /// A channel without a valid reading, or at the cutoff, is switched off.
    pub fn regulate(&mut self) {
        for index in 0..HEATER_ZONES {
            let reading = self.sample(index);
            let zone = &mut self.zones[index];
            let on = match reading {
                Some(reading) if reading < HEATER_CUTOFF_C => {
                    zone.switch.update(reading, zone.setpoint)
                }
                _ => {
                    zone.switch.force_off();
                    false
                }
            };
            if on {
                zone.output.set_high();
            } else {
                zone.output.set_low();
            }
            status::record_heater(index, on);
        }
    }
}

impl Plant for HeaterPlant<'_> {
    fn read(&mut self, zone: u8, _now: Millis) -> f32 {
        let index = usize::from(zone);
        if index >= HEATER_ZONES {
            return 0.0;
        }
        self.sample(index)
            .or(self.zones[index].reading)
            .unwrap_or_default()
    }

    fn apply_setpoint(&mut self, zone: u8, value: f32) {
        if let Some(zone) = self.zones.get_mut(usize::from(zone)) {
            zone.setpoint = value;
        }
    }

    fn setpoint(&self, zone: u8) -> f32 {
        self.zones
            .get(usize::from(zone))
            .map_or(0.0, |zone| zone.setpoint)
    }
}
