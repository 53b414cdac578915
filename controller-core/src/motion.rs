//! Valve motion state machine and the actuator command surface.
//!
//! The drive hardware is two binary relays: one selects the travel direction,
//! the other enables the motor. Every state transition of the physical drive
//! carries a mandatory relay side effect, so the machine takes the actuator
//! interface as an argument and fires the commands itself. Transitions not
//! present in the table are reported as [`MotionFault`] values rather than
//! silently ignored; a rejected transition means the position model and the
//! physical drive have diverged.

use core::fmt;
use core::time::Duration;

use crate::telemetry::TelemetryInstant;

/// Travel direction selected by the direction relay.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ValveDirection {
    /// Recirculate more flow back to the heat pump.
    MoreKeep,
    /// Send more flow to distribution.
    LessKeep,
}

impl ValveDirection {
    /// Short label used in logs and console output.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            ValveDirection::MoreKeep => "more-keep",
            ValveDirection::LessKeep => "less-keep",
        }
    }
}

impl fmt::Display for ValveDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Narrow capability interface over the two drive relays.
///
/// The movement task is the only component holding a live implementation;
/// everything else requests movements instead of commanding relays.
pub trait ActuatorCommands {
    /// Latches the direction relay.
    fn select_direction(&mut self, direction: ValveDirection);

    /// Closes the drive-enable relay, starting valve travel.
    fn start_drive(&mut self);

    /// Opens the drive-enable relay, stopping valve travel.
    fn stop_drive(&mut self);
}

/// Actuator that performs no hardware interaction.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopActuator;

impl NoopActuator {
    /// Creates a new no-op actuator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ActuatorCommands for NoopActuator {
    fn select_direction(&mut self, _: ValveDirection) {}

    fn start_drive(&mut self) {}

    fn stop_drive(&mut self) {}
}

/// Identifier for the logical relay lines exposed by the controller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RelayId {
    DirectionSelect,
    DriveEnable,
}

impl RelayId {
    /// Deterministic index for lookups into [`ALL_RELAYS`].
    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            RelayId::DirectionSelect => 0,
            RelayId::DriveEnable => 1,
        }
    }
}

/// Metadata describing how a relay line is routed on the board.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RelayLine {
    pub id: RelayId,
    pub name: &'static str,
    pub mcu_pin: &'static str,
    pub header_pin: u8,
}

impl RelayLine {
    #[must_use]
    pub const fn new(id: RelayId, name: &'static str, mcu_pin: &'static str, header_pin: u8) -> Self {
        Self {
            id,
            name,
            mcu_pin,
            header_pin,
        }
    }
}

/// Compile-time catalog of both relay lines.
pub const ALL_RELAYS: [RelayLine; 2] = [
    RelayLine::new(RelayId::DirectionSelect, "DIR", "PA2", 3),
    RelayLine::new(RelayId::DriveEnable, "DRV", "PA3", 5),
];

/// Retrieve relay metadata by identifier.
#[must_use]
pub const fn relay_by_id(id: RelayId) -> RelayLine {
    ALL_RELAYS[id.as_index()]
}

/// Physical state of the valve drive.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MotionState {
    /// Resting at 0 % keep, everything goes to distribution.
    FullySend,
    /// Resting at 100 % keep, everything recirculates.
    FullyKeep,
    /// Motor running toward more keep.
    KeepingMore,
    /// Motor running toward less keep.
    KeepingLess,
    /// Resting somewhere between the end stops.
    SteadyBlend,
}

impl MotionState {
    /// Returns `true` while the motor is commanded to run.
    #[must_use]
    pub const fn is_driving(self) -> bool {
        matches!(self, MotionState::KeepingMore | MotionState::KeepingLess)
    }

    /// Short label used in logs and console output.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            MotionState::FullySend => "fully-send",
            MotionState::FullyKeep => "fully-keep",
            MotionState::KeepingMore => "keeping-more",
            MotionState::KeepingLess => "keeping-less",
            MotionState::SteadyBlend => "steady-blend",
        }
    }
}

impl fmt::Display for MotionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Event fired against the motion machine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MotionEvent {
    StartKeepingMore,
    StartKeepingLess,
    /// Stop the drive, declaring the resting state the move ended in.
    StopAt(MotionState),
}

/// Failure reported when a transition is not present in the table.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MotionFault {
    pub state: MotionState,
    pub event: MotionEvent,
}

impl fmt::Display for MotionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid motion transition {:?} in {}", self.event, self.state)
    }
}

/// Accepted transition of the motion machine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MotionChange {
    pub from: MotionState,
    pub to: MotionState,
}

/// Motion state machine with its drive timestamp bookkeeping.
///
/// Startup assumes the valve rests fully at the send stop; the controller
/// re-homes before trusting the estimate, so drive starts are legal from any
/// resting state in either direction (re-homing and endpoint nudges overdrive
/// against the end stops). Stops must name an endpoint consistent with the
/// drive direction.
#[derive(Copy, Clone, Debug)]
pub struct ValveMotion<TInstant> {
    state: MotionState,
    drive_started_at: Option<TInstant>,
}

impl<TInstant> ValveMotion<TInstant>
where
    TInstant: Copy + TelemetryInstant,
{
    /// Creates a machine resting at the assumed fully-send position.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: MotionState::FullySend,
            drive_started_at: None,
        }
    }

    /// Returns the current motion state.
    #[must_use]
    pub const fn state(&self) -> MotionState {
        self.state
    }

    /// Starts a drive: latches the direction relay, then enables the motor.
    ///
    /// Records the start timestamp so the matching stop can report the
    /// elapsed drive duration.
    pub fn begin_drive<A: ActuatorCommands>(
        &mut self,
        direction: ValveDirection,
        now: TInstant,
        actuator: &mut A,
    ) -> Result<MotionChange, MotionFault> {
        let event = match direction {
            ValveDirection::MoreKeep => MotionEvent::StartKeepingMore,
            ValveDirection::LessKeep => MotionEvent::StartKeepingLess,
        };

        let next = match (self.state, direction) {
            (
                MotionState::FullySend | MotionState::FullyKeep | MotionState::SteadyBlend,
                ValveDirection::MoreKeep,
            ) => MotionState::KeepingMore,
            (
                MotionState::FullySend | MotionState::FullyKeep | MotionState::SteadyBlend,
                ValveDirection::LessKeep,
            ) => MotionState::KeepingLess,
            _ => {
                return Err(MotionFault {
                    state: self.state,
                    event,
                });
            }
        };

        actuator.select_direction(direction);
        actuator.start_drive();
        self.drive_started_at = Some(now);

        let change = MotionChange {
            from: self.state,
            to: next,
        };
        self.state = next;
        Ok(change)
    }

    /// Stops the drive, declaring the resting state, and reports how long the
    /// motor ran.
    pub fn stop_drive<A: ActuatorCommands>(
        &mut self,
        resting: MotionState,
        now: TInstant,
        actuator: &mut A,
    ) -> Result<(MotionChange, Duration), MotionFault> {
        let valid = matches!(
            (self.state, resting),
            (
                MotionState::KeepingMore,
                MotionState::SteadyBlend | MotionState::FullyKeep
            ) | (
                MotionState::KeepingLess,
                MotionState::SteadyBlend | MotionState::FullySend
            )
        );

        if !valid {
            return Err(MotionFault {
                state: self.state,
                event: MotionEvent::StopAt(resting),
            });
        }

        actuator.stop_drive();

        let drove_for = self
            .drive_started_at
            .take()
            .map_or(Duration::ZERO, |started| {
                now.saturating_duration_since(started)
            });

        let change = MotionChange {
            from: self.state,
            to: resting,
        };
        self.state = resting;
        Ok((change, drove_for))
    }
}

impl<TInstant> Default for ValveMotion<TInstant>
where
    TInstant: Copy + TelemetryInstant,
{
    fn default() -> Self {
        Self::new()
    }
}
