use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Instant, Ticker};
use heapless::{String, Vec};
use instrument_core::device::{Device, InstrumentDevice};
use instrument_core::repl::CommandExecutor;
use instrument_core::telemetry::TelemetryRecord;
use instrument_core::timing::{Millis, duration_millis};

use super::{REPL_RX_QUEUE, REPL_TX_QUEUE};
use crate::config::{CONTROL_PERIOD, ECHO_EVENTS};
use crate::hw::heater::HeaterPlant;
use crate::repl::{
    LineAssembler, LineStatus, Reply, ReplFrame, enqueue_text, reject_line, respond,
};
use crate::status;
use crate::telemetry::{TelemetryDrain, write_event_line};

/// Records echoed to the REPL per pass; older ones still reach defmt.
const ECHO_BATCH: usize = 16;
const EVENT_LINE_LEN: usize = 160;

type Executor = CommandExecutor<InstrumentDevice<HeaterPlant<'static>>>;

#[embassy_executor::task]
pub async fn run(mut executor: Executor) -> ! {
    let mut ticker = Ticker::every(Duration::from_millis(duration_millis(CONTROL_PERIOD)));
    let mut assembler = LineAssembler::new();
    let mut drain = TelemetryDrain::new();
    let mut reply = Reply::new();
    let rx_queue = REPL_RX_QUEUE.receiver();

    loop {
        match select(ticker.next(), rx_queue.receive()).await {
            Either::First(()) => {
                let now = now();
                let device = executor.device_mut();
                device.tick(now);
                device.plant().regulate();
                status::record_tick(now.as_millis());
            }
            Either::Second(frame) => {
                handle_frame(&mut executor, &mut assembler, &mut reply, &frame);
            }
        }

        echo_events(&executor, &mut drain);
    }
}

fn handle_frame(
    executor: &mut Executor,
    assembler: &mut LineAssembler,
    reply: &mut Reply,
    frame: &ReplFrame,
) {
    for &byte in frame {
        match assembler.push(byte) {
            LineStatus::Pending => continue,
            LineStatus::Ready => {
                let Some(line) = assembler.line() else {
                    continue;
                };
                defmt::debug!("repl: {}", line);
                respond(executor, line, now(), reply);
            }
            status => reject_line(status, reply),
        }
        send_text(reply);
    }
}

fn echo_events(executor: &Executor, drain: &mut TelemetryDrain) {
    let mut batch: Vec<TelemetryRecord<Millis>, ECHO_BATCH> = Vec::new();
    drain.drain(executor.device().telemetry(), |record| {
        let _ = batch.push(*record);
    });

    if !ECHO_EVENTS || !status::repl_attached() {
        return;
    }

    let mut line: String<EVENT_LINE_LEN> = String::new();
    for record in &batch {
        line.clear();
        if write_event_line(&mut line, record).is_err() {
            defmt::warn!("repl: event line truncated id={}", record.id);
        }
        send_text(&line);
    }
}

/// Never waits on the console: output is dropped while no host holds DTR
/// or while the USB task is not draining the queue.
fn send_text(text: &str) {
    if !status::repl_attached() {
        return;
    }
    let dropped = enqueue_text(&REPL_TX_QUEUE.sender(), text);
    if dropped > 0 {
        defmt::warn!("repl: tx queue full, dropped {} frames", dropped);
    }
}

fn now() -> Millis {
    Millis(Instant::now().as_millis())
}
