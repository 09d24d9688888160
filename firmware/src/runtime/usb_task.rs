use embassy_futures::join::join;
use embassy_futures::select::{Either3, select3};
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_usb::class::cdc_acm::{ControlChanged, Receiver, Sender};
use embassy_usb::driver::{Driver, EndpointError};

use super::{REPL_RX_QUEUE, REPL_TX_QUEUE, USB_STORAGE};
use crate::repl::{REPL_FRAME_SIZE, ReplFrame};
use crate::status;
use crate::usb::{self, UsbDeviceStorage};

embassy_stm32::bind_interrupts!(struct UsbIrqs {
    USB_UCPD1_2 => embassy_stm32::usb::InterruptHandler<hal::peripherals::USB>;
});

#[embassy_executor::task]
pub async fn run(
    usb: Peri<'static, hal::peripherals::USB>,
    dp: Peri<'static, hal::peripherals::PA12>,
    dm: Peri<'static, hal::peripherals::PA11>,
) -> ! {
    let storage = USB_STORAGE.init(UsbDeviceStorage::new());
    let driver = embassy_stm32::usb::Driver::new(usb, UsbIrqs, dp, dm);
    let (mut device, port) = usb::build(driver, storage);

    join(
        device.run(),
        run_repl_interface(port.sender, port.receiver, port.control),
    )
    .await;
    loop {
        core::future::pending::<()>().await;
    }
}

async fn run_repl_interface<D: Driver<'static>>(
    mut sender: Sender<'static, D>,
    mut receiver: Receiver<'static, D>,
    control: ControlChanged<'static>,
) -> ! {
    let rx_queue = REPL_RX_QUEUE.sender();
    let tx_queue = REPL_TX_QUEUE.receiver();
    let mut ingress = [0u8; REPL_FRAME_SIZE];
    let mut pending_tx: Option<ReplFrame> = None;

    loop {
        join(receiver.wait_connection(), sender.wait_connection()).await;
        wait_for_dtr(&control, &sender).await;
        pending_tx.take();
        while tx_queue.try_receive().is_ok() {}
        status::set_repl_attached(true);

        defmt::info!("usb: REPL interface connected");

        loop {
            match select3(
                receiver.read_packet(&mut ingress),
                async {
                    let frame = match pending_tx.take() {
                        Some(frame) => frame,
                        None => tx_queue.receive().await,
                    };
                    let result = sender.write_packet(&frame).await;
                    if result.is_err() {
                        pending_tx = Some(frame);
                    }
                    result
                },
                control.control_changed(),
            )
            .await
            {
                Either3::First(Ok(0)) | Either3::Second(Ok(())) => {}
                Either3::First(Ok(count)) => {
                    let mut frame = ReplFrame::new();
                    if frame.extend_from_slice(&ingress[..count]).is_err() {
                        defmt::warn!("usb: dropping REPL packet len={} (overflow)", count);
                        continue;
                    }
                    rx_queue.send(frame).await;
                }
                Either3::First(Err(EndpointError::Disabled))
                | Either3::Second(Err(EndpointError::Disabled)) => {
                    defmt::warn!("usb: REPL interface disabled");
                    break;
                }
                Either3::First(Err(_)) => defmt::warn!("usb: REPL read error"),
                Either3::Second(Err(_)) => defmt::warn!("usb: REPL write error"),
                Either3::Third(()) => {
                    if !sender.dtr() {
                        defmt::warn!("usb: REPL host dropped DTR");
                        break;
                    }
                }
            }
        }

        status::set_repl_attached(false);
    }
}

async fn wait_for_dtr<D: Driver<'static>>(
    control: &ControlChanged<'static>,
    sender: &Sender<'static, D>,
) {
    while !sender.dtr() {
        control.control_changed().await;
    }
}
