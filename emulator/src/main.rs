mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use crossterm::style::Stylize;
use instrument_core::device::DeviceKind;
use instrument_core::telemetry::EventLevel;

use session::{OutputLine, Session};

const USAGE: &str =
    "Usage: instrument-emulator [--device <pcr|incubator|dummy>] [--transcript <path>]";

struct Options {
    device: DeviceKind,
    transcript: Option<PathBuf>,
}

fn main() -> io::Result<()> {
    let options = parse_options(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let mut session = Session::new(options.device);
    if let Some(path) = options.transcript.as_deref() {
        session = session.with_transcript(path)?;
    }

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut line = String::new();

    writeln!(
        writer,
        "{} emulator ready. Type `help` for commands or `exit` to quit.",
        session.kind().label()
    )?;

    loop {
        line.clear();
        write!(writer, "[{}] > ", session.now())?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        for output in session.handle_command(trimmed)? {
            match output {
                OutputLine::Reply(text) => writeln!(writer, "{text}")?,
                OutputLine::Event { level, text } => {
                    let styled = match level {
                        EventLevel::Info => text.dark_grey(),
                        EventLevel::Warn => text.yellow(),
                        EventLevel::Error => text.red().bold(),
                    };
                    writeln!(writer, "{styled}")?;
                }
            }
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_options(mut args: impl Iterator<Item = String>) -> Result<Options, String> {
    let mut options = Options {
        device: DeviceKind::Pcr,
        transcript: None,
    };

    while let Some(arg) = args.next() {
        if let Some(value) = arg.strip_prefix("--device=") {
            options.device = parse_device(value)?;
        } else if arg == "--device" {
            let value = args.next().ok_or("Expected value after --device")?;
            options.device = parse_device(&value)?;
        } else if let Some(value) = arg.strip_prefix("--transcript=") {
            options.transcript = Some(PathBuf::from(value));
        } else if arg == "--transcript" {
            let value = args.next().ok_or("Expected value after --transcript")?;
            options.transcript = Some(PathBuf::from(value));
        } else {
            options.device = parse_device(&arg)?;
        }
    }

    Ok(options)
}

fn parse_device(tag: &str) -> Result<DeviceKind, String> {
    DeviceKind::parse(tag).ok_or_else(|| format!("Unknown device `{tag}`"))
}
