//! Line grammar for the supervisory link and the maintenance console.
//!
//! The supervisor speaks a lowercase, line-oriented protocol: one command per
//! line, fields separated by spaces. The same grammar backs the UART link on
//! the firmware and the interactive emulator session, so both fronts accept
//! exactly the same input. Parsing uses `winnow` combinators directly over
//! `&str`; commands remain short and bounded.

use core::fmt;

use winnow::Parser;
use winnow::combinator::alt;
use winnow::error::ContextError;
use winnow::token::take_while;

use crate::controller::{ControllerCommand, HeatPumpState};
use crate::motion::{MotionState, ValveDirection};
use crate::pid::{ControlSettings, PidGains};
use crate::strategy::ControlState;

/// Temperature channels the supervisor can inject readings for.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReadingChannel {
    Lwt,
    Ewt,
    Cold,
}

/// Structured commands produced by the parser.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ConsoleCommand {
    /// `ready` — actuators wired, start the homing run.
    Ready,
    /// `target <°F>`
    TargetLwt(f32),
    /// `position <pct>`
    TargetPosition(f32),
    /// `reset <believed> <value>`
    ResetPosition { believed: f32, value: f32 },
    /// `nudge keep|send <seconds>`
    Nudge { direction: ValveDirection, seconds: f32 },
    /// `gains p=<v> i=<v> d=<v>`
    Gains(PidGains),
    /// `interval <seconds>`
    Interval(f32),
    /// `travel t1=<s> t2=<s>`
    Travel { t1: f32, t2: f32 },
    /// `hp off|preparing|on`
    HeatPump(HeatPumpState),
    /// `lwt|ewt|cold <°F>` or `lwt|ewt|cold none`
    Reading {
        channel: ReadingChannel,
        value: Option<f32>,
    },
    /// `status`
    Status,
    /// `help`
    Help,
}

/// Help text shared by the console front-ends.
pub const HELP_TOPICS: &[(&str, &str)] = &[
    ("ready", "ready                     - report actuators wired, start homing"),
    ("target", "target <degF>             - set the target leaving water temperature"),
    ("position", "position <pct>            - explicit valve position override"),
    ("reset", "reset <believed> <value>  - replace the position estimate"),
    ("nudge", "nudge keep|send <seconds> - timed calibration pulse at an endpoint"),
    ("gains", "gains p=<v> i=<v> d=<v>   - set PID gains"),
    ("interval", "interval <seconds>        - set the control interval"),
    ("travel", "travel t1=<s> t2=<s>      - set travel/hover calibration seconds"),
    ("hp", "hp off|preparing|on       - heat pump state notification"),
    ("lwt", "lwt|ewt|cold <degF>|none  - inject a temperature reading"),
    ("status", "status                    - display controller state"),
    ("help", "help                      - show this text"),
];

/// Failure reported when a line does not parse.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ParseFailure {
    /// Byte offset into the trimmed line where parsing stopped.
    pub offset: usize,
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized input at column {}", self.offset)
    }
}

type ParserResult<T> = winnow::ModalResult<T, ContextError>;

fn number(input: &mut &str) -> ParserResult<f32> {
    take_while(1.., |c: char| {
        c.is_ascii_digit() || c == '.' || c == '-' || c == '+'
    })
    .try_map(str::parse::<f32>)
    .parse_next(input)
}

fn space(input: &mut &str) -> ParserResult<()> {
    take_while(1.., |c: char| c == ' ' || c == '\t')
        .void()
        .parse_next(input)
}

fn ready(input: &mut &str) -> ParserResult<ConsoleCommand> {
    "ready".value(ConsoleCommand::Ready).parse_next(input)
}

fn target(input: &mut &str) -> ParserResult<ConsoleCommand> {
    ("target", space, number)
        .map(|(_, (), value)| ConsoleCommand::TargetLwt(value))
        .parse_next(input)
}

fn position(input: &mut &str) -> ParserResult<ConsoleCommand> {
    ("position", space, number)
        .map(|(_, (), value)| ConsoleCommand::TargetPosition(value))
        .parse_next(input)
}

fn reset(input: &mut &str) -> ParserResult<ConsoleCommand> {
    ("reset", space, number, space, number)
        .map(|(_, (), believed, (), value)| ConsoleCommand::ResetPosition { believed, value })
        .parse_next(input)
}

fn direction(input: &mut &str) -> ParserResult<ValveDirection> {
    alt((
        "keep".value(ValveDirection::MoreKeep),
        "send".value(ValveDirection::LessKeep),
    ))
    .parse_next(input)
}

fn nudge(input: &mut &str) -> ParserResult<ConsoleCommand> {
    (
        "nudge",
        space,
        direction,
        space,
        number.verify(|seconds| *seconds > 0.0 && *seconds <= 60.0),
    )
        .map(|(_, (), direction, (), seconds)| ConsoleCommand::Nudge { direction, seconds })
        .parse_next(input)
}

fn gains(input: &mut &str) -> ParserResult<ConsoleCommand> {
    ("gains", space, "p=", number, space, "i=", number, space, "d=", number)
        .map(|(_, (), _, proportional, (), _, integral, (), _, derivative)| {
            ConsoleCommand::Gains(PidGains {
                proportional,
                integral,
                derivative,
            })
        })
        .parse_next(input)
}

fn interval(input: &mut &str) -> ParserResult<ConsoleCommand> {
    ("interval", space, number)
        .map(|(_, (), value)| ConsoleCommand::Interval(value))
        .parse_next(input)
}

fn travel(input: &mut &str) -> ParserResult<ConsoleCommand> {
    ("travel", space, "t1=", number, space, "t2=", number)
        .map(|(_, (), _, t1, (), _, t2)| ConsoleCommand::Travel { t1, t2 })
        .parse_next(input)
}

fn heat_pump(input: &mut &str) -> ParserResult<ConsoleCommand> {
    (
        "hp",
        space,
        alt((
            "off".value(HeatPumpState::Off),
            "preparing".value(HeatPumpState::Preparing),
            "on".value(HeatPumpState::On),
        )),
    )
        .map(|(_, (), state)| ConsoleCommand::HeatPump(state))
        .parse_next(input)
}

fn reading(input: &mut &str) -> ParserResult<ConsoleCommand> {
    (
        alt((
            "lwt".value(ReadingChannel::Lwt),
            "ewt".value(ReadingChannel::Ewt),
            "cold".value(ReadingChannel::Cold),
        )),
        space,
        alt(("none".value(None), number.map(Some))),
    )
        .map(|(channel, (), value)| ConsoleCommand::Reading { channel, value })
        .parse_next(input)
}

fn status(input: &mut &str) -> ParserResult<ConsoleCommand> {
    "status".value(ConsoleCommand::Status).parse_next(input)
}

fn help(input: &mut &str) -> ParserResult<ConsoleCommand> {
    "help".value(ConsoleCommand::Help).parse_next(input)
}

fn command(input: &mut &str) -> ParserResult<ConsoleCommand> {
    alt((
        reset, ready, target, position, nudge, gains, interval, travel, heat_pump, reading,
        status, help,
    ))
    .parse_next(input)
}

/// Parses one trimmed console line.
pub fn parse_line(line: &str) -> Result<ConsoleCommand, ParseFailure> {
    command
        .parse(line.trim())
        .map_err(|error| ParseFailure {
            offset: error.offset(),
        })
}

impl ConsoleCommand {
    /// Maps the console command onto the controller's command set.
    ///
    /// Parameter updates merge with the live settings, since the console
    /// sets gains, interval, and travel independently while the controller
    /// accepts a whole parameter block. Returns `None` for commands handled
    /// by the console front-end itself (readings, `status`, `help`).
    #[must_use]
    pub fn as_controller_command(&self, current: &ControlSettings) -> Option<ControllerCommand> {
        match *self {
            ConsoleCommand::Ready => Some(ControllerCommand::ActuatorsReady),
            ConsoleCommand::TargetLwt(value) => Some(ControllerCommand::SetTargetLwt(value)),
            ConsoleCommand::TargetPosition(value) => {
                Some(ControllerCommand::SetTargetPosition(value))
            }
            ConsoleCommand::ResetPosition { believed, value } => {
                Some(ControllerCommand::ResetPosition { believed, value })
            }
            ConsoleCommand::Nudge { direction, seconds } => {
                Some(ControllerCommand::EndpointNudge {
                    direction,
                    drive_for: core::time::Duration::from_secs_f32(seconds),
                })
            }
            ConsoleCommand::Gains(gains) => Some(ControllerCommand::SetControlParams(
                ControlSettings { gains, ..*current },
            )),
            ConsoleCommand::Interval(interval_seconds) => {
                Some(ControllerCommand::SetControlParams(ControlSettings {
                    interval_seconds,
                    ..*current
                }))
            }
            ConsoleCommand::Travel { t1, t2 } => {
                Some(ControllerCommand::SetControlParams(ControlSettings {
                    travel_seconds: t1,
                    hover_seconds: t2,
                    ..*current
                }))
            }
            ConsoleCommand::HeatPump(state) => Some(ControllerCommand::HeatPump(state)),
            ConsoleCommand::Reading { .. } | ConsoleCommand::Status | ConsoleCommand::Help => None,
        }
    }
}

/// One-line controller summary rendered by the `status` command.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct StatusSnapshot {
    pub control_state: ControlState,
    pub valve_state: MotionState,
    pub time_pct: f32,
    pub flow_pct: f32,
    pub target_lwt: f32,
    pub moving: bool,
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "state={} valve={} position={:.1}% flow={:.1}% target={:.1}F moving={}",
            self.control_state,
            self.valve_state,
            self.time_pct,
            self.flow_pct,
            self.target_lwt,
            if self.moving { "yes" } else { "no" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_command_set() {
        let fixtures: &[(&str, ConsoleCommand)] = &[
            ("ready", ConsoleCommand::Ready),
            ("target 155", ConsoleCommand::TargetLwt(155.0)),
            ("target 120.5", ConsoleCommand::TargetLwt(120.5)),
            ("position 42.5", ConsoleCommand::TargetPosition(42.5)),
            (
                "reset 40 0",
                ConsoleCommand::ResetPosition {
                    believed: 40.0,
                    value: 0.0,
                },
            ),
            (
                "nudge keep 2",
                ConsoleCommand::Nudge {
                    direction: ValveDirection::MoreKeep,
                    seconds: 2.0,
                },
            ),
            (
                "nudge send 1.5",
                ConsoleCommand::Nudge {
                    direction: ValveDirection::LessKeep,
                    seconds: 1.5,
                },
            ),
            (
                "gains p=0.4 i=0.01 d=0",
                ConsoleCommand::Gains(PidGains {
                    proportional: 0.4,
                    integral: 0.01,
                    derivative: 0.0,
                }),
            ),
            ("interval 30", ConsoleCommand::Interval(30.0)),
            (
                "travel t1=70 t2=60",
                ConsoleCommand::Travel { t1: 70.0, t2: 60.0 },
            ),
            ("hp off", ConsoleCommand::HeatPump(HeatPumpState::Off)),
            (
                "hp preparing",
                ConsoleCommand::HeatPump(HeatPumpState::Preparing),
            ),
            ("hp on", ConsoleCommand::HeatPump(HeatPumpState::On)),
            (
                "lwt 151.2",
                ConsoleCommand::Reading {
                    channel: ReadingChannel::Lwt,
                    value: Some(151.2),
                },
            ),
            (
                "ewt none",
                ConsoleCommand::Reading {
                    channel: ReadingChannel::Ewt,
                    value: None,
                },
            ),
            (
                "cold 70",
                ConsoleCommand::Reading {
                    channel: ReadingChannel::Cold,
                    value: Some(70.0),
                },
            ),
            ("status", ConsoleCommand::Status),
            ("help", ConsoleCommand::Help),
            ("  target 155  ", ConsoleCommand::TargetLwt(155.0)),
        ];

        for (line, expected) in fixtures {
            assert_eq!(parse_line(line), Ok(*expected), "line: {line}");
        }
    }

    #[test]
    fn rejects_malformed_lines() {
        for line in [
            "",
            "warp 9",
            "target",
            "target abc",
            "nudge up 2",
            "nudge keep 0",
            "nudge keep 900",
            "hp sideways",
            "reset 40",
            "status now",
        ] {
            assert!(parse_line(line).is_err(), "line should fail: {line}");
        }
    }

    #[test]
    fn settings_commands_merge_with_live_values() {
        let current = ControlSettings::default();

        let command = parse_line("interval 15").expect("parses");
        let Some(ControllerCommand::SetControlParams(updated)) =
            command.as_controller_command(&current)
        else {
            panic!("expected a settings update");
        };
        assert_eq!(updated.interval_seconds, 15.0);
        assert_eq!(updated.travel_seconds, current.travel_seconds);
        assert_eq!(updated.gains, current.gains);

        let command = parse_line("travel t1=80 t2=65").expect("parses");
        let Some(ControllerCommand::SetControlParams(updated)) =
            command.as_controller_command(&current)
        else {
            panic!("expected a settings update");
        };
        assert_eq!(updated.travel_seconds, 80.0);
        assert_eq!(updated.hover_seconds, 65.0);
    }

    #[test]
    fn front_end_commands_do_not_reach_the_controller() {
        let current = ControlSettings::default();
        for line in ["status", "help", "lwt 151.2"] {
            let command = parse_line(line).expect("parses");
            assert_eq!(command.as_controller_command(&current), None);
        }
    }

    #[test]
    fn status_snapshot_renders_one_line() {
        let snapshot = StatusSnapshot {
            control_state: ControlState::Active,
            valve_state: MotionState::SteadyBlend,
            time_pct: 42.0,
            flow_pct: 35.3,
            target_lwt: 155.0,
            moving: false,
        };

        let mut rendered = heapless::String::<96>::new();
        core::fmt::write(&mut rendered, format_args!("{snapshot}")).expect("fits");
        assert_eq!(
            rendered.as_str(),
            "state=active valve=steady-blend position=42.0% flow=35.3% target=155.0F moving=no"
        );
    }
}
