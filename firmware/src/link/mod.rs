#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Supervisory link line protocol.
//!
//! The boss actor speaks the shared console grammar over a UART, one command
//! per line. This module owns the pieces that are testable without hardware:
//! byte-to-line assembly and the mapping from a parsed line to what the link
//! task should do with it. The UART task itself lives in the runtime module.

use controller_core::console::{self, ConsoleCommand, ReadingChannel};
use controller_core::controller::ControllerCommand;
use heapless::{String, Vec};

use crate::status;

/// Maximum number of bytes accepted on a single line (excluding terminator).
pub const MAX_LINE_LEN: usize = 96;

/// Errors surfaced while assembling a line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LineError {
    /// Input exceeded [`MAX_LINE_LEN`] before a terminator arrived.
    Overflow,
    /// The assembled bytes were not valid UTF-8.
    InvalidUtf8,
}

/// Accumulates bytes into newline-terminated lines.
#[derive(Default)]
pub struct LineBuffer {
    bytes: Vec<u8, MAX_LINE_LEN>,
    overflowed: bool,
}

impl LineBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bytes: Vec::new(),
            overflowed: false,
        }
    }

    /// Feeds one byte. Returns the completed line when `byte` terminates it.
    ///
    /// Carriage returns are ignored so both `\n` and `\r\n` supervisors work.
    pub fn push(&mut self, byte: u8) -> Option<Result<String<MAX_LINE_LEN>, LineError>> {
        match byte {
            b'\r' => None,
            b'\n' => {
                let result = if self.overflowed {
                    Err(LineError::Overflow)
                } else {
                    match core::str::from_utf8(&self.bytes) {
                        Ok(line) => {
                            let mut completed = String::new();
                            // The slice fits by construction.
                            let _ = completed.push_str(line);
                            Ok(completed)
                        }
                        Err(_) => Err(LineError::InvalidUtf8),
                    }
                };

                self.bytes.clear();
                self.overflowed = false;
                Some(result)
            }
            other => {
                if self.bytes.push(other).is_err() {
                    self.overflowed = true;
                }
                None
            }
        }
    }
}

/// What the link task should do with a parsed line.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum LineDisposition {
    /// Forward to the control-loop task.
    Command(ControllerCommand),
    /// Update a temperature reading cell.
    Reading {
        channel: ReadingChannel,
        value: Option<f32>,
    },
    /// Reply with the rendered status snapshot.
    StatusRequest,
    /// Reply with the help text.
    HelpRequest,
    /// Reply with a syntax error at the given column.
    Rejected { offset: usize },
}

/// Classifies one trimmed line.
///
/// Settings commands merge against the parameters the control task last
/// published, so `gains`/`interval`/`travel` update only what they name.
#[must_use]
pub fn classify(line: &str) -> LineDisposition {
    match console::parse_line(line) {
        Ok(ConsoleCommand::Reading { channel, value }) => {
            LineDisposition::Reading { channel, value }
        }
        Ok(ConsoleCommand::Status) => LineDisposition::StatusRequest,
        Ok(ConsoleCommand::Help) => LineDisposition::HelpRequest,
        Ok(command) => command
            .as_controller_command(&status::settings())
            .map_or(LineDisposition::Rejected { offset: 0 }, LineDisposition::Command),
        Err(failure) => LineDisposition::Rejected {
            offset: failure.offset,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use controller_core::controller::HeatPumpState;

    fn feed(buffer: &mut LineBuffer, input: &[u8]) -> Option<Result<String<MAX_LINE_LEN>, LineError>> {
        let mut completed = None;
        for byte in input {
            completed = buffer.push(*byte);
        }
        completed
    }

    #[test]
    fn assembles_newline_terminated_lines() {
        let mut buffer = LineBuffer::new();

        let line = feed(&mut buffer, b"target 155\n")
            .expect("line completed")
            .expect("line valid");
        assert_eq!(line.as_str(), "target 155");

        // CRLF supervisors produce the same line.
        let line = feed(&mut buffer, b"hp off\r\n")
            .expect("line completed")
            .expect("line valid");
        assert_eq!(line.as_str(), "hp off");
    }

    #[test]
    fn oversized_lines_are_reported_once_terminated() {
        let mut buffer = LineBuffer::new();

        let long = [b'x'; MAX_LINE_LEN + 10];
        assert!(feed(&mut buffer, &long).is_none());
        assert_eq!(feed(&mut buffer, b"\n"), Some(Err(LineError::Overflow)));

        // The buffer recovers for the next line.
        let line = feed(&mut buffer, b"status\n")
            .expect("line completed")
            .expect("line valid");
        assert_eq!(line.as_str(), "status");
    }

    #[test]
    fn classifies_commands_readings_and_requests() {
        assert_eq!(
            classify("hp preparing"),
            LineDisposition::Command(ControllerCommand::HeatPump(HeatPumpState::Preparing))
        );
        assert_eq!(
            classify("lwt 151.2"),
            LineDisposition::Reading {
                channel: ReadingChannel::Lwt,
                value: Some(151.2),
            }
        );
        assert_eq!(classify("status"), LineDisposition::StatusRequest);
        assert_eq!(classify("help"), LineDisposition::HelpRequest);
        assert!(matches!(classify("warp 9"), LineDisposition::Rejected { .. }));
    }

    #[test]
    fn settings_lines_merge_with_published_parameters() {
        let command = classify("interval 20");
        let LineDisposition::Command(ControllerCommand::SetControlParams(settings)) = command
        else {
            panic!("expected a settings command, got {command:?}");
        };
        assert_eq!(settings.interval_seconds, 20.0);
    }
}
