use std::io;
use std::path::Path;

#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use instrument_core::device::DeviceKind;
use session::Session;

const PCR_SCRIPT: &[&str] = &[
    "help start",
    "start cycles=3 initialDenatureTime=30s denatureTime=10 annealTime=10 extendTime=15 finalExtendTime=30",
    "advance 45s",
    "status",
    "pause",
    "advance 5s",
    "resume",
    "advance 2m",
    "status",
];

const INCUBATOR_SCRIPT: &[&str] = &[
    "templates",
    "start template=mammalian",
    "advance 15m",
    "status",
    "advance 20m",
    "setpoint 0 39.5",
    "advance 2m",
    "alarms",
    "ack all",
    "setpoint 0 37",
    "advance 5m",
    "alarms history",
    "stop",
];

const DUMMY_SCRIPT: &[&str] = &[
    "start setpoint=42",
    "advance 30s",
    "status",
    "setpoint 0 150",
    "stop",
];

fn main() -> io::Result<()> {
    record(DeviceKind::Pcr, PCR_SCRIPT)?;
    record(DeviceKind::Incubator, INCUBATOR_SCRIPT)?;
    record(DeviceKind::Dummy, DUMMY_SCRIPT)?;
    Ok(())
}

fn record(kind: DeviceKind, script: &[&str]) -> io::Result<()> {
    let path = Path::new("transcripts").join(format!("{}.log", kind.name()));
    let mut session = Session::new(kind).with_transcript(&path)?;
    for line in script {
        session.handle_command(line)?;
    }
    println!("wrote {}", path.display());
    Ok(())
}
