//! Relay outputs driving the mixing valve.
//!
//! Two push-pull GPIO lines feed the relay board: one latches the travel
//! direction, the other enables the motor. Energized direction selects
//! more-keep; the drive relay is open whenever the motor must rest.

use controller_core::motion::{ActuatorCommands, ValveDirection};
use embassy_stm32::gpio::Output;

/// The two relay outputs as wired on the controller board.
pub struct RelayBank<'d> {
    direction: Output<'d>,
    drive: Output<'d>,
}

impl<'d> RelayBank<'d> {
    /// Wraps the configured outputs, direction first.
    pub fn new(direction: Output<'d>, drive: Output<'d>) -> Self {
        Self { direction, drive }
    }
}

impl ActuatorCommands for RelayBank<'_> {
    fn select_direction(&mut self, direction: ValveDirection) {
        match direction {
            ValveDirection::MoreKeep => self.direction.set_high(),
            ValveDirection::LessKeep => self.direction.set_low(),
        }
    }

    fn start_drive(&mut self) {
        self.drive.set_high();
    }

    fn stop_drive(&mut self) {
        self.drive.set_low();
    }
}
