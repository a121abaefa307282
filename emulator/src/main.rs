mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use bms_core::sequencer::CurrentSensorConfig;
use session::{Session, SessionOptions};

const USAGE: &str = "Usage: bms-emulator [--transcript <path>] [--no-current-sensor] \
[--triggered-sensor] [--no-interlock] [--no-contactors] [--no-isoguard] [--deep-discharge]";

fn main() -> io::Result<()> {
    let options = parse_options(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut session = Session::new(&options)?;
    let mut line = String::new();

    writeln!(
        writer,
        "BMS sequencer emulator ready. Type `help` for commands or `exit` to quit."
    )?;
    for banner in session.banner() {
        writeln!(writer, "{banner}")?;
    }

    loop {
        line.clear();
        write!(writer, "> ")?;
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

        for response in session.handle_command(trimmed)? {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_options(mut args: impl Iterator<Item = String>) -> Result<SessionOptions, String> {
    let mut options = SessionOptions::default();

    while let Some(arg) = args.next() {
        let config = options.config;
        match arg.as_str() {
            "--transcript" => {
                let path = args
                    .next()
                    .ok_or_else(|| "Expected a path after --transcript".to_string())?;
                options.transcript = Some(PathBuf::from(path));
            }
            "--no-current-sensor" => options.config = config.with_current_sensor(None),
            "--triggered-sensor" => {
                options.config = config.with_current_sensor(Some(CurrentSensorConfig::TRIGGERED));
            }
            "--no-interlock" => options.config = config.with_interlock(false),
            "--no-contactors" => options.config = config.with_contactors(false),
            "--no-isoguard" => options.config = config.with_isoguard(false),
            "--deep-discharge" => options.deep_discharge = true,
            other => {
                if let Some(path) = other.strip_prefix("--transcript=") {
                    options.transcript = Some(PathBuf::from(path));
                } else {
                    return Err(format!("Unknown option `{other}`"));
                }
            }
        }
    }

    Ok(options)
}
