//! Movement planning and position bookkeeping.
//!
//! A movement is decomposed into small drive increments so the running task
//! can re-check supersession between sleeps and keep the position estimate
//! honest after a cancellation. The planning arithmetic lives here where it
//! is host-testable; the async loop that sleeps and mutates the shared
//! position belongs to the firmware's movement task.

use core::time::Duration;

use crate::motion::ValveDirection;

/// Drive increment granularity in percent of full travel.
pub const INCREMENT_PERCENT: f32 = 1.0;

/// Position deltas below this are treated as already on target.
pub const POSITION_EPSILON: f32 = 1.0e-3;

/// Extra travel driven past the believed range while homing, so the valve is
/// guaranteed to rest against the send stop wherever it really started.
pub const HOMING_OVERDRIVE_PERCENT: f32 = 10.0;

/// Opaque identity of one requested movement. Exactly one token is current
/// at a time; a task holding a stale token must stop mutating shared state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MoveToken(u32);

impl MoveToken {
    /// Raw value for telemetry and atomic storage.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Rebuilds a token from its raw value.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

/// Mints fresh movement tokens.
#[derive(Copy, Clone, Debug, Default)]
pub struct TokenMint {
    next: u32,
}

impl TokenMint {
    /// Creates a mint starting from token zero.
    #[must_use]
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    /// Returns a token never handed out before (modulo `u32` wraparound).
    pub fn mint(&mut self) -> MoveToken {
        let token = MoveToken(self.next);
        self.next = self.next.wrapping_add(1);
        token
    }
}

/// What a movement request asks the valve task to do.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum MoveKind {
    /// Drive to a time-percent position.
    Position { target_time_pct: f32 },
    /// Startup homing: full-range overdrive toward send, then declare 0 %.
    Home,
    /// Timed calibration pulse at an endpoint.
    Nudge {
        direction: ValveDirection,
        drive_for: Duration,
    },
}

/// A movement request as handed to the valve task.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MoveRequest {
    pub token: MoveToken,
    pub kind: MoveKind,
}

/// Position estimate in time percent, saturating at the end stops.
///
/// Only the currently active movement task may mutate the live instance.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PositionEstimate(f32);

impl PositionEstimate {
    /// Creates an estimate, clamped to `[0, 100]`.
    #[must_use]
    pub fn new(time_pct: f32) -> Self {
        Self(time_pct.clamp(0.0, 100.0))
    }

    /// Current value in time percent.
    #[must_use]
    pub const fn get(self) -> f32 {
        self.0
    }

    /// Replaces the estimate (homing completion, operator reset).
    pub fn set(&mut self, time_pct: f32) {
        self.0 = time_pct.clamp(0.0, 100.0);
    }

    /// Advances by a signed delta, saturating at the end stops. Returns
    /// `true` when an integer percent boundary was crossed, which is when
    /// position telemetry is due.
    pub fn advance(&mut self, delta_pct: f32) -> bool {
        let before = self.0;
        self.0 = (self.0 + delta_pct).clamp(0.0, 100.0);
        whole_percent(before) != whole_percent(self.0)
    }

    /// Returns `true` when the estimate rests at either end stop.
    #[must_use]
    pub fn at_endpoint(self) -> bool {
        self.0 <= POSITION_EPSILON || self.0 >= 100.0 - POSITION_EPSILON
    }
}

fn whole_percent(pct: f32) -> i32 {
    pct as i32
}

/// Seconds of drive needed to travel `pct` percent of the full range.
#[must_use]
pub fn drive_time_for_percent(pct: f32, travel_seconds: f32) -> Duration {
    let seconds = pct.max(0.0) * travel_seconds / 100.0;
    Duration::from_micros((seconds * 1_000_000.0) as u64)
}

/// Percent of full range covered by `drive_for` seconds of drive.
#[must_use]
pub fn percent_for_drive_time(drive_for: Duration, travel_seconds: f32) -> f32 {
    if travel_seconds <= 0.0 {
        return 0.0;
    }
    drive_for.as_secs_f32() * 100.0 / travel_seconds
}

/// One step of an incremental movement.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Increment {
    /// Signed position change to apply after the sleep.
    pub delta_pct: f32,
    /// How long to keep driving before applying it.
    pub drive_for: Duration,
}

/// Pure plan for one position movement.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MovementPlan {
    target_pct: f32,
    travel_seconds: f32,
}

impl MovementPlan {
    /// Plans a move to `target_pct` with the given full-range travel time.
    #[must_use]
    pub fn to_position(target_pct: f32, travel_seconds: f32) -> Self {
        Self {
            target_pct: target_pct.clamp(0.0, 100.0),
            travel_seconds,
        }
    }

    /// The clamped target position.
    #[must_use]
    pub const fn target(&self) -> f32 {
        self.target_pct
    }

    /// Direction of travel from `position`, or `None` when already on target.
    #[must_use]
    pub fn direction_from(&self, position: f32) -> Option<ValveDirection> {
        let remaining = self.target_pct - position;
        if remaining > POSITION_EPSILON {
            Some(ValveDirection::MoreKeep)
        } else if remaining < -POSITION_EPSILON {
            Some(ValveDirection::LessKeep)
        } else {
            None
        }
    }

    /// Next increment from `position`, or `None` when the move is finished.
    ///
    /// Full steps are [`INCREMENT_PERCENT`]; the last step is the partial
    /// remainder.
    #[must_use]
    pub fn next_increment(&self, position: f32) -> Option<Increment> {
        let remaining = self.target_pct - position;
        if remaining > -POSITION_EPSILON && remaining < POSITION_EPSILON {
            return None;
        }

        let delta_pct = remaining.clamp(-INCREMENT_PERCENT, INCREMENT_PERCENT);
        let magnitude = if delta_pct < 0.0 { -delta_pct } else { delta_pct };

        Some(Increment {
            delta_pct,
            drive_for: drive_time_for_percent(magnitude, self.travel_seconds),
        })
    }

}

/// Maps a stop position onto the motion machine's resting states. A
/// superseded move stops wherever it happens to be, not at its target.
#[must_use]
pub fn resting_state_for(position_pct: f32) -> crate::motion::MotionState {
    if position_pct <= POSITION_EPSILON {
        crate::motion::MotionState::FullySend
    } else if position_pct >= 100.0 - POSITION_EPSILON {
        crate::motion::MotionState::FullyKeep
    } else {
        crate::motion::MotionState::SteadyBlend
    }
}

/// Resting state a drive in `direction` ends in when stopped at
/// `position_pct`.
///
/// A keep-more drive can only end at the keep stop or mid-range, and a
/// keep-less drive at the send stop or mid-range, regardless of where the
/// estimate happens to sit when the stop is issued. A move superseded before
/// its first increment lands here with an unchanged estimate; declaring the
/// mid-range keeps the stop consistent with the drive direction.
#[must_use]
pub fn resting_state_after(
    direction: ValveDirection,
    position_pct: f32,
) -> crate::motion::MotionState {
    match direction {
        ValveDirection::MoreKeep if position_pct >= 100.0 - POSITION_EPSILON => {
            crate::motion::MotionState::FullyKeep
        }
        ValveDirection::LessKeep if position_pct <= POSITION_EPSILON => {
            crate::motion::MotionState::FullySend
        }
        ValveDirection::MoreKeep | ValveDirection::LessKeep => {
            crate::motion::MotionState::SteadyBlend
        }
    }
}

/// Number of increments driven during the homing overdrive.
#[must_use]
pub fn homing_increments() -> u32 {
    ((100.0 + HOMING_OVERDRIVE_PERCENT) / INCREMENT_PERCENT) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::MotionState;

    #[test]
    fn tokens_are_unique_until_wraparound() {
        let mut mint = TokenMint::new();
        let first = mint.mint();
        let second = mint.mint();
        assert_ne!(first, second);
        assert_eq!(second.raw(), first.raw().wrapping_add(1));
    }

    #[test]
    fn position_advance_saturates_at_end_stops() {
        let mut position = PositionEstimate::new(99.5);
        position.advance(3.0);
        assert_eq!(position.get(), 100.0);

        let mut position = PositionEstimate::new(0.5);
        position.advance(-3.0);
        assert_eq!(position.get(), 0.0);
    }

    #[test]
    fn position_reports_integer_crossings() {
        let mut position = PositionEstimate::new(40.2);
        assert!(!position.advance(0.5)); // 40.2 -> 40.7
        assert!(position.advance(0.5)); // 40.7 -> 41.2
    }

    #[test]
    fn endpoint_detection() {
        assert!(PositionEstimate::new(0.0).at_endpoint());
        assert!(PositionEstimate::new(100.0).at_endpoint());
        assert!(!PositionEstimate::new(42.0).at_endpoint());
    }

    #[test]
    fn drive_time_scales_with_percent() {
        assert_eq!(
            drive_time_for_percent(1.0, 70.0),
            Duration::from_micros(700_000)
        );
        assert_eq!(
            drive_time_for_percent(100.0, 70.0),
            Duration::from_secs(70)
        );

        let pct = percent_for_drive_time(Duration::from_secs(7), 70.0);
        let delta = pct - 10.0;
        assert!(delta < 1.0e-3 && delta > -1.0e-3);
    }

    #[test]
    fn plan_walks_whole_steps_then_a_partial_one() {
        let plan = MovementPlan::to_position(52.5, 70.0);
        let mut position = PositionEstimate::new(50.0);
        let mut steps = 0;

        while let Some(increment) = plan.next_increment(position.get()) {
            assert!(increment.delta_pct <= INCREMENT_PERCENT);
            position.advance(increment.delta_pct);
            steps += 1;
            assert!(steps < 10, "plan must converge");
        }

        assert_eq!(steps, 3); // 1.0 + 1.0 + 0.5
        let delta = position.get() - 52.5;
        assert!(delta < 1.0e-3 && delta > -1.0e-3);
    }

    #[test]
    fn plan_direction_follows_the_sign_of_the_remaining_travel() {
        let plan = MovementPlan::to_position(30.0, 70.0);
        assert_eq!(plan.direction_from(10.0), Some(ValveDirection::MoreKeep));
        assert_eq!(plan.direction_from(80.0), Some(ValveDirection::LessKeep));
        assert_eq!(plan.direction_from(30.0), None);
    }

    #[test]
    fn final_partial_step_drives_proportionally_shorter() {
        let plan = MovementPlan::to_position(50.4, 70.0);
        let increment = plan.next_increment(50.0).expect("0.4 % remains");
        let delta = increment.delta_pct - 0.4;
        assert!(delta < 1.0e-3 && delta > -1.0e-3);
        assert_eq!(increment.drive_for, Duration::from_micros(280_000));
    }

    #[test]
    fn resting_state_matches_position() {
        assert_eq!(resting_state_for(0.0), MotionState::FullySend);
        assert_eq!(resting_state_for(100.0), MotionState::FullyKeep);
        assert_eq!(resting_state_for(42.0), MotionState::SteadyBlend);
    }

    #[test]
    fn resting_state_after_a_drive_respects_its_direction() {
        assert_eq!(
            resting_state_after(ValveDirection::MoreKeep, 100.0),
            MotionState::FullyKeep
        );
        assert_eq!(
            resting_state_after(ValveDirection::LessKeep, 0.0),
            MotionState::FullySend
        );

        // Superseded before the first increment: the estimate still reads an
        // endpoint, but the stop must match the direction that was driven.
        assert_eq!(
            resting_state_after(ValveDirection::MoreKeep, 0.0),
            MotionState::SteadyBlend
        );
        assert_eq!(
            resting_state_after(ValveDirection::LessKeep, 100.0),
            MotionState::SteadyBlend
        );
    }

    #[test]
    fn homing_covers_the_full_range_plus_overdrive() {
        assert_eq!(homing_increments(), 110);
    }
}
