//! Control-loop driver.
//!
//! `LwtController` owns the strategy machine, the PID loop, and the
//! calibration curve, and decides once per tick whether to run the PID step,
//! enter or leave hover, or fail safe. It never commands relays itself: every
//! decision comes back as an [`Action`] for the caller to execute, keeping a
//! single writer over the actuator at all times. Faults inside a tick are
//! recorded as telemetry and contained to that tick.

use core::time::Duration;

use heapless::Vec;

use crate::calibration::{CalibrationCurve, equilibrium_flow_percent};
use crate::motion::ValveDirection;
use crate::movement::{MoveKind, MoveRequest, MoveToken, PositionEstimate, TokenMint};
use crate::pid::{
    ControlSettings, PidController, PidFault, PidInputs, SensitivityModel, UnitySensitivity,
};
use crate::strategy::{self, ControlEvent, ControlState};
use crate::telemetry::{
    FaultKind, PidTelemetry, RejectReason, TelemetryEventKind, TelemetryInstant, TelemetryPayload,
    TelemetryRecorder,
};

/// Target leaving-water temperature until the supervisor sets one, °F.
pub const DEFAULT_TARGET_LWT: f32 = 120.0;

/// Band around target inside which hover hands over to closed-loop control, °F.
pub const ACTIVE_ENTRY_BAND: f32 = 5.0;

/// Startup flow used when the equilibrium solver cannot size the position.
pub const FALLBACK_STARTUP_FLOW_PCT: f32 = 50.0;

/// Largest believed-position mismatch a reset command may carry.
pub const RESET_BASELINE_TOLERANCE: f32 = 0.5;

/// Ticks between periodic position heartbeats.
pub const POSITION_HEARTBEAT_TICKS: u32 = 15;

/// Temperature readings sampled for one tick. `None` marks a channel whose
/// feedback is currently unavailable.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Readings {
    /// Leaving water temperature, °F.
    pub lwt: Option<f32>,
    /// Entering water temperature, °F.
    pub ewt: Option<f32>,
    /// Cold distribution return temperature, °F.
    pub cold: Option<f32>,
}

/// Heat-pump mode notifications from the upstream state machine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HeatPumpState {
    Off,
    Preparing,
    On,
}

/// Closed sum of inbound supervisory commands.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ControllerCommand {
    /// The relay actors are wired and ready; start the homing run.
    ActuatorsReady,
    SetTargetLwt(f32),
    /// Explicit position override, routed through the movement task.
    SetTargetPosition(f32),
    /// Replace the position estimate. Only accepted while quiescent and when
    /// the caller's believed value matches the current estimate.
    ResetPosition { believed: f32, value: f32 },
    SetControlParams(ControlSettings),
    /// Timed drive pulse while resting at an end stop, for coarse
    /// calibration.
    EndpointNudge {
        direction: ValveDirection,
        drive_for: Duration,
    },
    HeatPump(HeatPumpState),
}

/// Side effects a tick or command hands back to the caller.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Action {
    /// Hand a new movement to the valve task, superseding any in flight.
    Move(MoveRequest),
    /// Replace the position estimate (reset while quiescent).
    AcceptPosition(f32),
}

/// Most actions a single call can produce.
pub const MAX_ACTIONS: usize = 2;

/// Bounded action list returned by the driver.
pub type Actions = Vec<Action, MAX_ACTIONS>;

/// Why the controller asked for the movement it is waiting on.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum MovePurpose {
    Homing,
    Hover,
    FullSend,
    Reposition,
    Override,
    Nudge,
}

/// The once-per-second control-loop driver.
pub struct LwtController<TInstant, S = UnitySensitivity> {
    curve: CalibrationCurve,
    settings: ControlSettings,
    target_lwt: f32,
    state: ControlState,
    pid: PidController<TInstant, S>,
    tokens: TokenMint,
    pending_move: Option<(MoveToken, MovePurpose)>,
    last_pid_at: Option<TInstant>,
    actuators_ready: bool,
    ticks: u32,
}

impl<TInstant> LwtController<TInstant, UnitySensitivity>
where
    TInstant: Copy + TelemetryInstant,
{
    /// Creates a controller with the default unity sensitivity model.
    #[must_use]
    pub fn new(curve: CalibrationCurve, settings: ControlSettings) -> Self {
        Self::with_sensitivity(curve, settings, UnitySensitivity)
    }
}

impl<TInstant, S> LwtController<TInstant, S>
where
    TInstant: Copy + TelemetryInstant,
    S: SensitivityModel,
{
    /// Creates a controller around the supplied sensitivity model.
    #[must_use]
    pub fn with_sensitivity(curve: CalibrationCurve, settings: ControlSettings, model: S) -> Self {
        Self {
            curve,
            settings,
            target_lwt: DEFAULT_TARGET_LWT,
            state: ControlState::Initializing,
            pid: PidController::new(model),
            tokens: TokenMint::new(),
            pending_move: None,
            last_pid_at: None,
            actuators_ready: false,
            ticks: 0,
        }
    }

    /// Current control-strategy state.
    #[must_use]
    pub const fn state(&self) -> ControlState {
        self.state
    }

    /// Current target leaving-water temperature, °F.
    #[must_use]
    pub const fn target_lwt(&self) -> f32 {
        self.target_lwt
    }

    /// Live control parameters.
    #[must_use]
    pub const fn settings(&self) -> &ControlSettings {
        &self.settings
    }

    /// The calibration curve in use.
    #[must_use]
    pub const fn curve(&self) -> &CalibrationCurve {
        &self.curve
    }

    /// Returns `true` while a requested movement has not completed.
    #[must_use]
    pub const fn movement_in_flight(&self) -> bool {
        self.pending_move.is_some()
    }

    /// Token of the movement the controller is waiting on, if any.
    #[must_use]
    pub fn current_token(&self) -> Option<MoveToken> {
        self.pending_move.map(|(token, _)| token)
    }

    /// Runs one control tick.
    pub fn tick(
        &mut self,
        now: TInstant,
        position_pct: f32,
        readings: &Readings,
        telemetry: &mut TelemetryRecorder<TInstant>,
    ) -> Actions {
        self.ticks = self.ticks.wrapping_add(1);
        telemetry.record_watchdog(now);

        if self.ticks % POSITION_HEARTBEAT_TICKS == 0 {
            telemetry.record_position(position_pct, self.curve.flow_from_time(position_pct), now);
        }

        let mut actions = Actions::new();

        // Blind: required feedback is gone, fail safe before anything else.
        if self.state.requires_feedback() && readings.lwt.is_none() {
            telemetry.record_fault(FaultKind::MissingLwt, now);
            self.apply_event(ControlEvent::FeedbackLost, now, &mut actions, telemetry);
            return actions;
        }

        match self.state {
            ControlState::StartupHover => {
                if let Some(lwt) = readings.lwt
                    && magnitude(self.target_lwt - lwt) <= ACTIVE_ENTRY_BAND
                {
                    self.apply_event(ControlEvent::LwtNearTarget, now, &mut actions, telemetry);
                    let flow = self.startup_flow(readings, lwt, now, telemetry);
                    let target_time_pct = self.curve.time_from_flow(flow);
                    self.request_move(
                        MoveKind::Position { target_time_pct },
                        MovePurpose::Reposition,
                        &mut actions,
                    );
                    self.pid.reset();
                    self.last_pid_at = Some(now);
                }
            }
            ControlState::Active => {
                if self.pid_due(now) {
                    self.run_pid_step(now, position_pct, readings, &mut actions, telemetry);
                }
            }
            ControlState::Initializing
            | ControlState::Dormant
            | ControlState::MovingToStartupHover
            | ControlState::MovingToFullSend => {}
        }

        actions
    }

    /// Dispatches one inbound supervisory command.
    pub fn handle_command(
        &mut self,
        command: ControllerCommand,
        now: TInstant,
        position_pct: f32,
        telemetry: &mut TelemetryRecorder<TInstant>,
    ) -> Actions {
        let mut actions = Actions::new();

        match command {
            ControllerCommand::ActuatorsReady => {
                self.actuators_ready = true;
                if self.state == ControlState::Initializing {
                    self.request_move(MoveKind::Home, MovePurpose::Homing, &mut actions);
                }
            }
            ControllerCommand::SetTargetLwt(value) => {
                self.target_lwt = value;
            }
            ControllerCommand::SetControlParams(settings) => match settings.validate() {
                Ok(()) => self.settings = settings,
                Err(_) => {
                    telemetry.record_rejection(RejectReason::InvalidSettings, now);
                }
            },
            ControllerCommand::SetTargetPosition(target_time_pct) => {
                if self.actuators_ready {
                    self.request_move(
                        MoveKind::Position {
                            target_time_pct: target_time_pct.clamp(0.0, 100.0),
                        },
                        MovePurpose::Override,
                        &mut actions,
                    );
                } else {
                    telemetry.record_rejection(RejectReason::NotReady, now);
                }
            }
            ControllerCommand::ResetPosition { believed, value } => {
                if self.pending_move.is_some() {
                    telemetry.record_rejection(RejectReason::MovementInFlight, now);
                } else if magnitude(believed - position_pct) > RESET_BASELINE_TOLERANCE {
                    telemetry.record_rejection(RejectReason::StaleBaseline, now);
                } else {
                    push_action(&mut actions, Action::AcceptPosition(value.clamp(0.0, 100.0)));
                }
            }
            ControllerCommand::EndpointNudge {
                direction,
                drive_for,
            } => {
                if !self.actuators_ready {
                    telemetry.record_rejection(RejectReason::NotReady, now);
                } else if self.pending_move.is_some() {
                    telemetry.record_rejection(RejectReason::MovementInFlight, now);
                } else if !PositionEstimate::new(position_pct).at_endpoint() {
                    telemetry.record_rejection(RejectReason::NotAtEndpoint, now);
                } else {
                    self.request_move(
                        MoveKind::Nudge {
                            direction,
                            drive_for,
                        },
                        MovePurpose::Nudge,
                        &mut actions,
                    );
                }
            }
            ControllerCommand::HeatPump(state) => match state {
                HeatPumpState::Off => {
                    self.apply_event(ControlEvent::HeatPumpOff, now, &mut actions, telemetry);
                }
                HeatPumpState::Preparing => {
                    self.apply_event(ControlEvent::HeatPumpPreparing, now, &mut actions, telemetry);
                }
                // Running is informational; hover exit waits on the LWT band.
                HeatPumpState::On => {}
            },
        }

        actions
    }

    /// Feeds a movement completion back into the strategy machine.
    ///
    /// A completion carrying a stale token belongs to a superseded task that
    /// woke late; it is a no-op, not an error.
    pub fn movement_completed(
        &mut self,
        token: MoveToken,
        now: TInstant,
        telemetry: &mut TelemetryRecorder<TInstant>,
    ) -> Actions {
        let mut actions = Actions::new();

        if let Some((pending, purpose)) = self.pending_move
            && pending == token
        {
            self.pending_move = None;
            match purpose {
                MovePurpose::Homing => {
                    self.apply_event(ControlEvent::HomingComplete, now, &mut actions, telemetry);
                }
                MovePurpose::Hover => {
                    self.apply_event(ControlEvent::ReachedHover, now, &mut actions, telemetry);
                }
                MovePurpose::FullSend => {
                    self.apply_event(ControlEvent::ReachedFullSend, now, &mut actions, telemetry);
                }
                MovePurpose::Reposition | MovePurpose::Override | MovePurpose::Nudge => {}
            }
        }

        actions
    }

    /// Clears the pending movement after the valve task aborted it.
    pub fn movement_failed(&mut self, token: MoveToken) {
        if let Some((pending, _)) = self.pending_move
            && pending == token
        {
            self.pending_move = None;
        }
    }

    fn pid_due(&self, now: TInstant) -> bool {
        match self.last_pid_at {
            None => true,
            Some(at) => {
                now.saturating_duration_since(at).as_secs_f32() >= self.settings.interval_seconds
            }
        }
    }

    fn run_pid_step(
        &mut self,
        now: TInstant,
        position_pct: f32,
        readings: &Readings,
        actions: &mut Actions,
        telemetry: &mut TelemetryRecorder<TInstant>,
    ) {
        let inputs = PidInputs {
            target_lwt: self.target_lwt,
            lwt: readings.lwt,
            ewt: readings.ewt,
            flow_pct: self.curve.flow_from_time(position_pct),
            time_pct: position_pct,
            now,
        };

        match self.pid.step(&inputs, &self.settings, &self.curve) {
            Ok(step) => {
                self.last_pid_at = Some(now);
                telemetry.record(
                    TelemetryEventKind::PidStep,
                    TelemetryPayload::Pid(PidTelemetry {
                        error: step.error,
                        proportional: step.proportional,
                        integral: step.integral,
                        derivative: step.derivative,
                        commanded_time_pct: step.target_time_pct,
                    }),
                    now,
                );
                self.request_move(
                    MoveKind::Position {
                        target_time_pct: step.target_time_pct,
                    },
                    MovePurpose::Reposition,
                    actions,
                );
            }
            Err(fault) => {
                telemetry.record_fault(fault_kind(fault), now);
                self.apply_event(ControlEvent::ControlFault, now, actions, telemetry);
            }
        }
    }

    /// Flow percent used to seed closed-loop control when leaving hover.
    fn startup_flow(
        &mut self,
        readings: &Readings,
        lwt: f32,
        now: TInstant,
        telemetry: &mut TelemetryRecorder<TInstant>,
    ) -> f32 {
        let Some(ewt) = readings.ewt else {
            telemetry.record_fault(FaultKind::MissingEwt, now);
            return FALLBACK_STARTUP_FLOW_PCT;
        };
        let Some(cold) = readings.cold else {
            telemetry.record_fault(FaultKind::MissingColdTemp, now);
            return FALLBACK_STARTUP_FLOW_PCT;
        };

        let lift = (lwt - ewt).max(0.0);
        equilibrium_flow_percent(lift, self.target_lwt, cold).unwrap_or(FALLBACK_STARTUP_FLOW_PCT)
    }

    fn apply_event(
        &mut self,
        event: ControlEvent,
        now: TInstant,
        actions: &mut Actions,
        telemetry: &mut TelemetryRecorder<TInstant>,
    ) {
        let Some(change) = strategy::apply(self.state, event) else {
            return;
        };

        telemetry.record_control_transition(change.from, change.to, change.cause, now);

        if change.from == ControlState::Active {
            self.pid.reset();
            self.last_pid_at = None;
        }

        self.state = change.to;

        match change.to {
            ControlState::MovingToStartupHover => {
                let target_time_pct = self.settings.hover_time_pct();
                self.request_move(
                    MoveKind::Position { target_time_pct },
                    MovePurpose::Hover,
                    actions,
                );
            }
            ControlState::MovingToFullSend => {
                self.request_move(
                    MoveKind::Position {
                        target_time_pct: 0.0,
                    },
                    MovePurpose::FullSend,
                    actions,
                );
            }
            ControlState::Initializing
            | ControlState::Dormant
            | ControlState::StartupHover
            | ControlState::Active => {}
        }
    }

    fn request_move(&mut self, kind: MoveKind, purpose: MovePurpose, actions: &mut Actions) {
        let token = self.tokens.mint();
        self.pending_move = Some((token, purpose));
        push_action(actions, Action::Move(MoveRequest { token, kind }));
    }
}

fn push_action(actions: &mut Actions, action: Action) {
    if actions.push(action).is_err() {
        unreachable!("a single call never produces more than MAX_ACTIONS actions");
    }
}

fn fault_kind(fault: PidFault) -> FaultKind {
    match fault {
        PidFault::MissingLwt => FaultKind::MissingLwt,
        PidFault::MissingEwt => FaultKind::MissingEwt,
        PidFault::SensitivityUnavailable => FaultKind::SensitivityUnavailable,
    }
}

fn magnitude(value: f32) -> f32 {
    if value < 0.0 { -value } else { value }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;

    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    struct MicrosInstant(u64);

    impl MicrosInstant {
        fn secs(value: u64) -> Self {
            Self(value * 1_000_000)
        }
    }

    impl TelemetryInstant for MicrosInstant {
        fn saturating_duration_since(&self, earlier: Self) -> Duration {
            Duration::from_micros(self.0.saturating_sub(earlier.0))
        }
    }

    fn controller() -> LwtController<MicrosInstant> {
        LwtController::new(CalibrationCurve::default(), ControlSettings::default())
    }

    fn telemetry() -> TelemetryRecorder<MicrosInstant> {
        TelemetryRecorder::new()
    }

    fn expect_move(actions: &Actions) -> MoveRequest {
        match actions.first() {
            Some(Action::Move(request)) => *request,
            other => panic!("expected a movement action, got {other:?}"),
        }
    }

    #[test]
    fn actuators_ready_starts_the_homing_run() {
        let mut controller = controller();
        let mut telemetry = telemetry();

        let actions = controller.handle_command(
            ControllerCommand::ActuatorsReady,
            MicrosInstant::secs(0),
            0.0,
            &mut telemetry,
        );

        let request = expect_move(&actions);
        assert_eq!(request.kind, MoveKind::Home);
        assert!(controller.movement_in_flight());

        // Repeating the command while already homing mints a fresh run.
        let again = controller.handle_command(
            ControllerCommand::ActuatorsReady,
            MicrosInstant::secs(1),
            0.0,
            &mut telemetry,
        );
        assert!(again.is_empty(), "only Initializing accepts a homing request");
    }

    #[test]
    fn homing_completion_parks_the_loop_dormant() {
        let mut controller = controller();
        let mut telemetry = telemetry();

        let actions = controller.handle_command(
            ControllerCommand::ActuatorsReady,
            MicrosInstant::secs(0),
            0.0,
            &mut telemetry,
        );
        let token = expect_move(&actions).token;

        let follow_up =
            controller.movement_completed(token, MicrosInstant::secs(80), &mut telemetry);
        assert!(follow_up.is_empty());
        assert_eq!(controller.state(), ControlState::Dormant);
        assert!(!controller.movement_in_flight());
    }

    #[test]
    fn stale_completion_tokens_are_ignored() {
        let mut controller = controller();
        let mut telemetry = telemetry();

        let first = controller.handle_command(
            ControllerCommand::ActuatorsReady,
            MicrosInstant::secs(0),
            0.0,
            &mut telemetry,
        );
        let stale = expect_move(&first).token;

        // Supersede the homing run with an override.
        let second = controller.handle_command(
            ControllerCommand::SetTargetPosition(40.0),
            MicrosInstant::secs(1),
            0.0,
            &mut telemetry,
        );
        let current = expect_move(&second).token;
        assert_ne!(stale, current);

        let ignored =
            controller.movement_completed(stale, MicrosInstant::secs(2), &mut telemetry);
        assert!(ignored.is_empty());
        assert!(controller.movement_in_flight(), "stale token must not clear the pending move");
        assert_eq!(controller.state(), ControlState::Initializing);
    }

    #[test]
    fn reset_requires_quiescence_and_a_matching_baseline() {
        let mut controller = controller();
        let mut telemetry = telemetry();
        let now = MicrosInstant::secs(0);

        controller.handle_command(ControllerCommand::ActuatorsReady, now, 0.0, &mut telemetry);

        // Movement in flight: rejected.
        let actions = controller.handle_command(
            ControllerCommand::ResetPosition {
                believed: 0.0,
                value: 5.0,
            },
            now,
            0.0,
            &mut telemetry,
        );
        assert!(actions.is_empty());
        assert_eq!(
            telemetry.latest().map(|record| record.event),
            Some(TelemetryEventKind::CommandRejected(
                RejectReason::MovementInFlight
            ))
        );

        let token = controller.current_token().expect("homing in flight");
        controller.movement_completed(token, MicrosInstant::secs(80), &mut telemetry);

        // Stale baseline: rejected, nothing mutated.
        let actions = controller.handle_command(
            ControllerCommand::ResetPosition {
                believed: 10.0,
                value: 5.0,
            },
            now,
            0.0,
            &mut telemetry,
        );
        assert!(actions.is_empty());
        assert_eq!(
            telemetry.latest().map(|record| record.event),
            Some(TelemetryEventKind::CommandRejected(
                RejectReason::StaleBaseline
            ))
        );

        // Matching baseline while quiescent: accepted.
        let actions = controller.handle_command(
            ControllerCommand::ResetPosition {
                believed: 0.2,
                value: 5.0,
            },
            now,
            0.0,
            &mut telemetry,
        );
        assert_eq!(actions.first(), Some(&Action::AcceptPosition(5.0)));
    }

    #[test]
    fn nudge_requires_an_endpoint() {
        let mut controller = controller();
        let mut telemetry = telemetry();
        let now = MicrosInstant::secs(0);

        controller.handle_command(ControllerCommand::ActuatorsReady, now, 0.0, &mut telemetry);
        let token = controller.current_token().expect("homing in flight");
        controller.movement_completed(token, MicrosInstant::secs(80), &mut telemetry);

        let nudge = ControllerCommand::EndpointNudge {
            direction: ValveDirection::LessKeep,
            drive_for: Duration::from_secs(2),
        };

        let rejected = controller.handle_command(nudge, now, 42.0, &mut telemetry);
        assert!(rejected.is_empty());
        assert_eq!(
            telemetry.latest().map(|record| record.event),
            Some(TelemetryEventKind::CommandRejected(
                RejectReason::NotAtEndpoint
            ))
        );

        let accepted = controller.handle_command(nudge, now, 0.0, &mut telemetry);
        let request = expect_move(&accepted);
        assert_eq!(
            request.kind,
            MoveKind::Nudge {
                direction: ValveDirection::LessKeep,
                drive_for: Duration::from_secs(2),
            }
        );
    }

    #[test]
    fn invalid_settings_are_rejected_without_mutation() {
        let mut controller = controller();
        let mut telemetry = telemetry();
        let before = *controller.settings();

        controller.handle_command(
            ControllerCommand::SetControlParams(ControlSettings {
                interval_seconds: -1.0,
                ..ControlSettings::default()
            }),
            MicrosInstant::secs(0),
            0.0,
            &mut telemetry,
        );

        assert_eq!(controller.settings(), &before);
        assert_eq!(
            telemetry.latest().map(|record| record.event),
            Some(TelemetryEventKind::CommandRejected(
                RejectReason::InvalidSettings
            ))
        );
    }

    #[test]
    fn watchdog_fires_every_tick() {
        let mut controller = controller();
        let mut telemetry = telemetry();

        controller.tick(MicrosInstant::secs(0), 0.0, &Readings::default(), &mut telemetry);
        assert_eq!(
            telemetry.oldest_first().next().map(|record| record.event),
            Some(TelemetryEventKind::Watchdog)
        );
    }
}
