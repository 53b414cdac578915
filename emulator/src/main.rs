mod plant;
mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use session::Session;

fn main() -> io::Result<()> {
    let log_path = parse_log_path().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("Usage: valve-emulator [--log <path>]");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut session = Session::new(&log_path)?;
    let mut line = String::new();

    writeln!(
        writer,
        "Mixing-valve emulator ready. Type `help` for commands or `exit` to quit."
    )?;

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

        let responses = session.handle_command(trimmed)?;
        for response in responses {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_log_path() -> Result<PathBuf, String> {
    let mut args = env::args().skip(1);
    match args.next() {
        None => Ok(PathBuf::from("emulator-session.log")),
        Some(arg) => {
            if let Some(value) = arg.strip_prefix("--log=") {
                Ok(PathBuf::from(value))
            } else if arg == "--log" {
                args.next()
                    .map(PathBuf::from)
                    .ok_or_else(|| "Expected value after --log".to_string())
            } else {
                Err(format!("Unknown argument `{arg}`"))
            }
        }
    }
}
