use std::io;
use std::path::Path;

#[path = "../plant.rs"]
mod plant;

#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use session::Session;

// Replays the canonical control flows and leaves their transcripts behind,
// so a tuning change can be diffed against the previous behavior.

fn main() -> io::Result<()> {
    record_startup()?;
    record_shutdown()?;
    record_blind()?;
    Ok(())
}

fn drive(session: &mut Session, lines: &[&str]) -> io::Result<()> {
    for line in lines {
        let _ = session.handle_command(line)?;
    }
    Ok(())
}

const STARTUP: &[&str] = &[
    "target 155",
    "ready",
    "tick 90",
    "hp preparing",
    "tick 90",
    "hp on",
    "lwt 151",
    "ewt 140",
    "tick 120",
];

fn record_startup() -> io::Result<()> {
    let mut session = Session::new(Path::new("emulator-startup.log"))?;
    drive(&mut session, STARTUP)?;
    drive(&mut session, &["status"])
}

fn record_shutdown() -> io::Result<()> {
    let mut session = Session::new(Path::new("emulator-shutdown.log"))?;
    drive(&mut session, STARTUP)?;
    drive(&mut session, &["hp off", "tick 120", "status"])
}

fn record_blind() -> io::Result<()> {
    let mut session = Session::new(Path::new("emulator-blind.log"))?;
    drive(&mut session, STARTUP)?;
    drive(&mut session, &["lwt none", "tick 5", "status"])
}
