//! Control strategy state machine.
//!
//! Governs when the closed-loop PID step may run. The machine is a pure
//! transition table over closed enums; side effects (movement requests,
//! telemetry) belong to the control-loop driver. Events without a transition
//! in the current state return `None` — heat-pump notifications are
//! edge-triggered and may arrive in any state, so an unmatched event is a
//! no-op rather than a fault. The valve-motion machine in [`crate::motion`]
//! is the one that fails loudly.

use core::fmt;

/// Control mode of the LWT loop.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ControlState {
    /// Waiting for the actuators and the startup homing run.
    Initializing,
    /// Heat pump off, valve parked fully-send.
    Dormant,
    /// Driving toward the calibrated startup hover position.
    MovingToStartupHover,
    /// Holding near full keep while the heat pump's lift stabilizes.
    StartupHover,
    /// Failing safe (or shutting down) toward 0 % keep.
    MovingToFullSend,
    /// Closed-loop PID control.
    Active,
}

impl ControlState {
    /// Returns `true` when the PID step is allowed to run.
    #[must_use]
    pub const fn allows_pid(self) -> bool {
        matches!(self, ControlState::Active)
    }

    /// Returns `true` when missing temperature feedback must force fail-safe.
    ///
    /// Feedback is only required once the heat pump is preparing or running;
    /// a dormant loop has nothing to regulate.
    #[must_use]
    pub const fn requires_feedback(self) -> bool {
        matches!(
            self,
            ControlState::MovingToStartupHover | ControlState::StartupHover | ControlState::Active
        )
    }

    /// Short label used in logs and console output.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            ControlState::Initializing => "initializing",
            ControlState::Dormant => "dormant",
            ControlState::MovingToStartupHover => "moving-to-hover",
            ControlState::StartupHover => "hover",
            ControlState::MovingToFullSend => "moving-to-full-send",
            ControlState::Active => "active",
        }
    }
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Events that drive the strategy machine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ControlEvent {
    /// Startup homing run finished; position estimate is trustworthy.
    HomingComplete,
    /// Heat pump announced it is preparing to run.
    HeatPumpPreparing,
    /// Heat pump turned off.
    HeatPumpOff,
    /// Required temperature feedback is unavailable.
    FeedbackLost,
    /// The valve reached the calibrated hover position.
    ReachedHover,
    /// LWT came within the entry band of target while hovering.
    LwtNearTarget,
    /// The valve reached 0 % keep while failing safe.
    ReachedFullSend,
    /// The PID step reported a control fault.
    ControlFault,
}

impl ControlEvent {
    /// Short label used in telemetry and logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            ControlEvent::HomingComplete => "homing-complete",
            ControlEvent::HeatPumpPreparing => "heat-pump-preparing",
            ControlEvent::HeatPumpOff => "heat-pump-off",
            ControlEvent::FeedbackLost => "feedback-lost",
            ControlEvent::ReachedHover => "reached-hover",
            ControlEvent::LwtNearTarget => "lwt-near-target",
            ControlEvent::ReachedFullSend => "reached-full-send",
            ControlEvent::ControlFault => "control-fault",
        }
    }
}

impl fmt::Display for ControlEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Accepted transition of the strategy machine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StateChange {
    pub from: ControlState,
    pub to: ControlState,
    pub cause: ControlEvent,
}

/// Applies an event to the current state.
///
/// Returns the accepted transition, or `None` when the pair has no entry in
/// the table. `Initializing` is exempt from the forced fail-safe transitions:
/// the actuators may not be ready yet, and the homing run that concludes it
/// already ends fully-send.
#[must_use]
pub fn apply(state: ControlState, event: ControlEvent) -> Option<StateChange> {
    use ControlEvent as E;
    use ControlState as S;

    let to = match (state, event) {
        (S::Initializing, E::HomingComplete) => S::Dormant,
        (S::Dormant | S::MovingToFullSend, E::HeatPumpPreparing) => S::MovingToStartupHover,
        (S::MovingToStartupHover, E::ReachedHover) => S::StartupHover,
        (S::StartupHover, E::LwtNearTarget) => S::Active,
        (S::MovingToFullSend, E::ReachedFullSend) => S::Dormant,
        (
            S::Dormant | S::MovingToStartupHover | S::StartupHover | S::Active,
            E::HeatPumpOff | E::FeedbackLost,
        ) => S::MovingToFullSend,
        (S::Active, E::ControlFault) => S::MovingToFullSend,
        _ => return None,
    };

    Some(StateChange {
        from: state,
        to,
        cause: event,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_path_reaches_active() {
        let mut state = ControlState::Initializing;

        for (event, expected) in [
            (ControlEvent::HomingComplete, ControlState::Dormant),
            (
                ControlEvent::HeatPumpPreparing,
                ControlState::MovingToStartupHover,
            ),
            (ControlEvent::ReachedHover, ControlState::StartupHover),
            (ControlEvent::LwtNearTarget, ControlState::Active),
        ] {
            let change = apply(state, event).expect("transition present in table");
            assert_eq!(change.from, state);
            assert_eq!(change.to, expected);
            assert_eq!(change.cause, event);
            state = change.to;
        }

        assert!(state.allows_pid());
    }

    #[test]
    fn heat_pump_off_forces_full_send_from_running_states() {
        for state in [
            ControlState::Dormant,
            ControlState::MovingToStartupHover,
            ControlState::StartupHover,
            ControlState::Active,
        ] {
            let change = apply(state, ControlEvent::HeatPumpOff).expect("forced transition");
            assert_eq!(change.to, ControlState::MovingToFullSend);
        }
    }

    #[test]
    fn blind_condition_forces_full_send() {
        let change =
            apply(ControlState::Active, ControlEvent::FeedbackLost).expect("forced transition");
        assert_eq!(change.to, ControlState::MovingToFullSend);
        assert_eq!(change.cause, ControlEvent::FeedbackLost);
    }

    #[test]
    fn full_send_completion_returns_to_dormant() {
        let change = apply(ControlState::MovingToFullSend, ControlEvent::ReachedFullSend)
            .expect("transition present in table");
        assert_eq!(change.to, ControlState::Dormant);
    }

    #[test]
    fn preparing_while_failing_safe_restarts_hover_approach() {
        let change = apply(ControlState::MovingToFullSend, ControlEvent::HeatPumpPreparing)
            .expect("transition present in table");
        assert_eq!(change.to, ControlState::MovingToStartupHover);
    }

    #[test]
    fn unmatched_events_are_ignored() {
        assert_eq!(apply(ControlState::Initializing, ControlEvent::HeatPumpOff), None);
        assert_eq!(apply(ControlState::Active, ControlEvent::ReachedHover), None);
        assert_eq!(apply(ControlState::Dormant, ControlEvent::LwtNearTarget), None);
        assert_eq!(
            apply(ControlState::MovingToFullSend, ControlEvent::HeatPumpOff),
            None
        );
    }

    #[test]
    fn pid_gate_is_exclusive_to_active() {
        for state in [
            ControlState::Initializing,
            ControlState::Dormant,
            ControlState::MovingToStartupHover,
            ControlState::StartupHover,
            ControlState::MovingToFullSend,
        ] {
            assert!(!state.allows_pid(), "{state} must not run the PID step");
        }
    }
}
