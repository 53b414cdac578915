//! Interactive emulator session.
//!
//! Wires the shared controller logic to the simulated plant and a host-side
//! valve model, advancing simulated time one second per `tick`. Every line
//! in and out is appended to a transcript log so a control run can be
//! replayed when tuning.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use controller_core::console::{self, ConsoleCommand, HELP_TOPICS, ReadingChannel, StatusSnapshot};
use controller_core::controller::{Action, Actions, LwtController};
use controller_core::motion::{MotionState, ValveDirection};
use controller_core::movement::{
    self, HOMING_OVERDRIVE_PERCENT, MoveKind, MoveRequest, MoveToken, PositionEstimate,
};
use controller_core::telemetry::{
    EventId, TelemetryInstant, TelemetryPayload, TelemetryRecord, TelemetryRecorder,
    TelemetryEventKind,
};
use core::time::Duration;

use crate::plant::PlantSim;

/// Simulated monotonic clock, microseconds since session start.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct SimInstant(u64);

impl SimInstant {
    fn seconds(self) -> u64 {
        self.0 / 1_000_000
    }
}

impl TelemetryInstant for SimInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

/// Longest simulated stretch a single `tick` command may cover.
const MAX_TICK_SECONDS: u32 = 3_600;

enum ActiveKind {
    Position { target_pct: f32 },
    Homing { remaining_seconds: f32 },
    Nudge {
        direction: ValveDirection,
        remaining_seconds: f32,
    },
}

struct ActiveMove {
    token: MoveToken,
    kind: ActiveKind,
    rate_pct_per_second: f32,
}

/// Host-side valve model executing controller movement actions against
/// simulated drive timing.
struct HostValve {
    position: PositionEstimate,
    state: MotionState,
    active: Option<ActiveMove>,
}

impl HostValve {
    fn new() -> Self {
        Self {
            position: PositionEstimate::new(0.0),
            state: MotionState::FullySend,
            active: None,
        }
    }

    fn position(&self) -> f32 {
        self.position.get()
    }

    fn set_position(&mut self, value: f32) {
        self.position.set(value);
        self.state = movement::resting_state_for(self.position.get());
    }

    fn begin(&mut self, request: MoveRequest, travel_seconds: f32) {
        let rate = 100.0 / travel_seconds;
        let (kind, direction) = match request.kind {
            MoveKind::Position { target_time_pct } => {
                let Some(direction) = movement::MovementPlan::to_position(
                    target_time_pct,
                    travel_seconds,
                )
                .direction_from(self.position.get()) else {
                    // Already on target; the move completes on the next step.
                    self.active = Some(ActiveMove {
                        token: request.token,
                        kind: ActiveKind::Position {
                            target_pct: target_time_pct,
                        },
                        rate_pct_per_second: rate,
                    });
                    return;
                };
                (
                    ActiveKind::Position {
                        target_pct: target_time_pct,
                    },
                    direction,
                )
            }
            MoveKind::Home => (
                ActiveKind::Homing {
                    remaining_seconds: travel_seconds * (100.0 + HOMING_OVERDRIVE_PERCENT) / 100.0,
                },
                ValveDirection::LessKeep,
            ),
            MoveKind::Nudge {
                direction,
                drive_for,
            } => (
                ActiveKind::Nudge {
                    direction,
                    remaining_seconds: drive_for.as_secs_f32(),
                },
                direction,
            ),
        };

        self.state = match direction {
            ValveDirection::MoreKeep => MotionState::KeepingMore,
            ValveDirection::LessKeep => MotionState::KeepingLess,
        };
        self.active = Some(ActiveMove {
            token: request.token,
            kind,
            rate_pct_per_second: rate,
        });
    }

    /// Advances the drive by `dt` seconds. Returns the completed move token.
    fn step(&mut self, dt: f32) -> Option<MoveToken> {
        let active = self.active.as_mut()?;
        let travel = active.rate_pct_per_second * dt;

        let finished = match &mut active.kind {
            ActiveKind::Position { target_pct } => {
                let remaining = *target_pct - self.position.get();
                if remaining.abs() <= travel {
                    self.position.set(*target_pct);
                    true
                } else {
                    let delta = if remaining > 0.0 { travel } else { -travel };
                    self.position.advance(delta);
                    false
                }
            }
            ActiveKind::Homing { remaining_seconds } => {
                *remaining_seconds -= dt;
                self.position.advance(-travel);
                if *remaining_seconds <= 0.0 {
                    self.position.set(0.0);
                    true
                } else {
                    false
                }
            }
            ActiveKind::Nudge {
                direction,
                remaining_seconds,
            } => {
                *remaining_seconds -= dt;
                let delta = match direction {
                    ValveDirection::MoreKeep => travel,
                    ValveDirection::LessKeep => -travel,
                };
                self.position.advance(delta);
                *remaining_seconds <= 0.0
            }
        };

        if finished {
            let token = active.token;
            self.active = None;
            self.state = movement::resting_state_for(self.position.get());
            Some(token)
        } else {
            None
        }
    }
}

enum TranscriptRole {
    Host,
    Controller,
}

impl TranscriptRole {
    fn tag(&self) -> &'static str {
        match self {
            TranscriptRole::Host => ">>",
            TranscriptRole::Controller => "<<",
        }
    }
}

struct TranscriptLogger {
    writer: BufWriter<File>,
}

impl TranscriptLogger {
    fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "# mixing-valve emulator transcript")?;
        Ok(Self { writer })
    }

    fn append_line(&mut self, sim_seconds: u64, role: &TranscriptRole, text: &str) -> io::Result<()> {
        writeln!(self.writer, "[t+{sim_seconds:>6}s] {} {text}", role.tag())?;
        self.writer.flush()
    }
}

pub struct Session {
    controller: LwtController<SimInstant>,
    telemetry: TelemetryRecorder<SimInstant>,
    plant: PlantSim,
    valve: HostValve,
    clock_us: u64,
    reported: Option<EventId>,
    transcript: TranscriptLogger,
}

impl Session {
    pub fn new(log_path: &Path) -> io::Result<Self> {
        Ok(Self {
            controller: LwtController::new(Default::default(), Default::default()),
            telemetry: TelemetryRecorder::new(),
            plant: PlantSim::new(),
            valve: HostValve::new(),
            clock_us: 0,
            reported: None,
            transcript: TranscriptLogger::new(log_path)?,
        })
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let seconds = self.now().seconds();
        self.transcript
            .append_line(seconds, &TranscriptRole::Host, trimmed)?;

        let responses = self.dispatch(trimmed);
        for response in &responses {
            self.transcript
                .append_line(self.now().seconds(), &TranscriptRole::Controller, response)?;
        }

        Ok(responses)
    }

    fn dispatch(&mut self, line: &str) -> Vec<String> {
        if let Some(rest) = line.strip_prefix("tick") {
            let rest = rest.trim();
            let count = if rest.is_empty() {
                Ok(1)
            } else {
                rest.parse::<u32>().map_err(|_| ())
            };
            return match count {
                Ok(count) if (1..=MAX_TICK_SECONDS).contains(&count) => self.run_seconds(count),
                _ => vec![format!("ERR tick takes 1-{MAX_TICK_SECONDS} seconds")],
            };
        }

        match console::parse_line(line) {
            Ok(ConsoleCommand::Status) => vec![self.status_line()],
            Ok(ConsoleCommand::Help) => {
                let mut lines: Vec<String> =
                    HELP_TOPICS.iter().map(|(_, text)| (*text).to_string()).collect();
                lines.push(format!("tick [n]                  - advance 1-{MAX_TICK_SECONDS} simulated seconds"));
                lines
            }
            Ok(ConsoleCommand::Reading { channel, value }) => {
                self.apply_reading(channel, value);
                Vec::new()
            }
            Ok(command) => {
                if let ConsoleCommand::HeatPump(state) = command {
                    self.plant.heat_pump = state;
                }

                let Some(mapped) = command.as_controller_command(self.controller.settings())
                else {
                    return vec!["ERR unsupported".to_string()];
                };

                let now = self.now();
                let position = self.valve.position();
                let actions =
                    self.controller
                        .handle_command(mapped, now, position, &mut self.telemetry);
                self.execute(&actions);
                self.drain_telemetry()
            }
            Err(failure) => vec![format!("ERR syntax {failure}")],
        }
    }

    fn apply_reading(&mut self, channel: ReadingChannel, value: Option<f32>) {
        match channel {
            ReadingChannel::Lwt => {
                self.plant.lwt_available = value.is_some();
                if let Some(value) = value {
                    self.plant.lwt = value;
                }
            }
            ReadingChannel::Ewt => {
                self.plant.ewt_available = value.is_some();
                if let Some(value) = value {
                    self.plant.ewt = value;
                }
            }
            ReadingChannel::Cold => {
                self.plant.cold_available = value.is_some();
                if let Some(value) = value {
                    self.plant.cold = value;
                }
            }
        }
    }

    fn run_seconds(&mut self, count: u32) -> Vec<String> {
        for _ in 0..count {
            self.clock_us += 1_000_000;

            let keep_fraction = self
                .controller
                .curve()
                .flow_from_time(self.valve.position())
                / 100.0;
            self.plant.step(1.0, keep_fraction);

            if let Some(token) = self.valve.step(1.0) {
                let now = self.now();
                let actions = self
                    .controller
                    .movement_completed(token, now, &mut self.telemetry);
                self.execute(&actions);
            }

            let now = self.now();
            let readings = self.plant.readings();
            let position = self.valve.position();
            let actions = self
                .controller
                .tick(now, position, &readings, &mut self.telemetry);
            self.execute(&actions);
        }

        self.drain_telemetry()
    }

    fn execute(&mut self, actions: &Actions) {
        for action in actions {
            match *action {
                Action::Move(request) => {
                    let travel = self.controller.settings().travel_seconds;
                    self.valve.begin(request, travel);
                }
                Action::AcceptPosition(value) => self.valve.set_position(value),
            }
        }
    }

    fn status_line(&self) -> String {
        let snapshot = StatusSnapshot {
            control_state: self.controller.state(),
            valve_state: self.valve.state,
            time_pct: self.valve.position(),
            flow_pct: self
                .controller
                .curve()
                .flow_from_time(self.valve.position()),
            target_lwt: self.controller.target_lwt(),
            moving: self.controller.movement_in_flight(),
        };
        format!("{snapshot} lwt={:.1} ewt={:.1} lift={:.1}", self.plant.lwt, self.plant.ewt, self.plant.lift)
    }

    fn drain_telemetry(&mut self) -> Vec<String> {
        let mut lines = Vec::new();

        for record in self.telemetry.oldest_first() {
            if let Some(seen) = self.reported
                && record.id <= seen
            {
                continue;
            }
            self.reported = Some(record.id);

            if record.event == TelemetryEventKind::Watchdog {
                continue;
            }

            lines.push(render_record(record));
        }

        lines
    }

    fn now(&self) -> SimInstant {
        SimInstant(self.clock_us)
    }
}

fn render_record(record: &TelemetryRecord<SimInstant>) -> String {
    let seconds = record.timestamp.seconds();

    match record.details {
        TelemetryPayload::Control(details) => format!(
            "[t+{seconds:>6}s] control-state: {} -> {} ({})",
            details.from, details.to, details.cause
        ),
        TelemetryPayload::Valve(details) => match details.drove_for {
            Some(drove_for) => format!(
                "[t+{seconds:>6}s] valve: {} -> {} after {:.1}s drive",
                details.from,
                details.to,
                drove_for.as_secs_f32()
            ),
            None => format!(
                "[t+{seconds:>6}s] valve: {} -> {}",
                details.from, details.to
            ),
        },
        TelemetryPayload::Position(details) => format!(
            "[t+{seconds:>6}s] position: {:.1}% keep (flow {:.1}%)",
            details.time_pct, details.flow_pct
        ),
        TelemetryPayload::Move(details) => format!(
            "[t+{seconds:>6}s] {}: token={} target={:.1}%",
            record.event, details.token, details.target_pct
        ),
        TelemetryPayload::Pid(details) => format!(
            "[t+{seconds:>6}s] pid: error={:+.2} p={:+.2} i={:+.2} d={:+.2} -> {:.1}%",
            details.error,
            details.proportional,
            details.integral,
            details.derivative,
            details.commanded_time_pct
        ),
        TelemetryPayload::None => format!("[t+{seconds:>6}s] {}", record.event),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_log() -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("valve-emulator-test-{}.log", std::process::id()));
        path
    }

    fn drive(session: &mut Session, line: &str) -> Vec<String> {
        session.handle_command(line).expect("transcript writable")
    }

    #[test]
    fn full_startup_reaches_closed_loop_control() {
        let mut session = Session::new(&temp_log()).expect("session starts");

        drive(&mut session, "target 155");
        drive(&mut session, "ready");

        // Homing takes t1 plus overdrive.
        let lines = drive(&mut session, "tick 90");
        assert!(
            lines.iter().any(|line| line.contains("-> dormant")),
            "homing should park the loop dormant: {lines:?}"
        );

        drive(&mut session, "hp preparing");
        let lines = drive(&mut session, "tick 90");
        assert!(
            lines.iter().any(|line| line.contains("-> hover")),
            "valve should reach the hover position: {lines:?}"
        );

        // Warm the loop to within the entry band, then let the controller
        // notice on its own as the lift ramps.
        drive(&mut session, "hp on");
        drive(&mut session, "lwt 151");
        drive(&mut session, "ewt 140");
        let lines = drive(&mut session, "tick 60");
        assert!(
            lines.iter().any(|line| line.contains("-> active")),
            "controller should hand over to closed-loop control: {lines:?}"
        );
    }

    #[test]
    fn heat_pump_off_parks_the_valve() {
        let mut session = Session::new(&temp_log()).expect("session starts");

        drive(&mut session, "target 155");
        drive(&mut session, "ready");
        drive(&mut session, "tick 90");
        drive(&mut session, "hp preparing");
        drive(&mut session, "tick 90");

        let lines = drive(&mut session, "hp off");
        assert!(
            lines
                .iter()
                .any(|line| line.contains("-> moving-to-full-send")),
            "shutdown must fail safe: {lines:?}"
        );

        let lines = drive(&mut session, "tick 120");
        assert!(
            lines.iter().any(|line| line.contains("-> dormant")),
            "reaching 0 % keep parks the loop: {lines:?}"
        );
    }

    #[test]
    fn status_reports_position_and_states() {
        let mut session = Session::new(&temp_log()).expect("session starts");
        let lines = drive(&mut session, "status");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("state=initializing"));
        assert!(lines[0].contains("position=0.0%"));
    }
}
