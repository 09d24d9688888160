use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::adc::{Adc, AdcChannel};
use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use embassy_sync::channel::Channel;
use instrument_core::device::InstrumentDevice;
use instrument_core::repl::CommandExecutor;
use static_cell::StaticCell;

use crate::config::{self, HEATER_BAND_C};
use crate::hw::heater::{HeaterPlant, HeaterZone};
use crate::repl::ReplFrame;
use crate::usb::UsbDeviceStorage;

mod control_task;
mod usb_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

const REPL_RX_DEPTH: usize = 4;
const REPL_TX_DEPTH: usize = 16;

pub(super) static REPL_RX_QUEUE: Channel<ThreadModeRawMutex, ReplFrame, REPL_RX_DEPTH> =
    Channel::new();
pub(super) static REPL_TX_QUEUE: Channel<ThreadModeRawMutex, ReplFrame, REPL_TX_DEPTH> =
    Channel::new();
pub(super) static USB_STORAGE: StaticCell<UsbDeviceStorage> = StaticCell::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        ADC1,
        PA0,
        PA1,
        PA4,
        PB3,
        PB4,
        PB5,
        USB,
        PA11,
        PA12,
        ..
    } = hal::init(config);

    let zones = [
        HeaterZone::new(
            PA0.degrade_adc(),
            Output::new(PB3, Level::Low, Speed::Low),
            HEATER_BAND_C,
        ),
        HeaterZone::new(
            PA1.degrade_adc(),
            Output::new(PB4, Level::Low, Speed::Low),
            HEATER_BAND_C,
        ),
        HeaterZone::new(
            PA4.degrade_adc(),
            Output::new(PB5, Level::Low, Speed::Low),
            HEATER_BAND_C,
        ),
    ];
    let plant = HeaterPlant::new(Adc::new(ADC1), zones);
    let executor = CommandExecutor::new(InstrumentDevice::new(config::DEVICE_KIND, plant));

    defmt::info!(
        "instrument firmware up: {}",
        config::DEVICE_KIND.label()
    );

    spawner
        .spawn(usb_task::run(USB, PA12, PA11))
        .expect("failed to spawn USB task");

    spawner
        .spawn(control_task::run(executor))
        .expect("failed to spawn control task");

    core::future::pending::<()>().await;
}
