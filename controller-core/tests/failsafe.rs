//! Fail-safe behavior: heat-pump shutdown, blind operation, and PID faults
//! all park the valve fully-send instead of guessing.

use core::time::Duration;

use controller_core::calibration::CalibrationCurve;
use controller_core::controller::{
    Action, Actions, ControllerCommand, HeatPumpState, LwtController, Readings,
};
use controller_core::movement::{MoveKind, MoveRequest, MoveToken};
use controller_core::pid::ControlSettings;
use controller_core::strategy::ControlState;
use controller_core::telemetry::{
    FaultKind, TelemetryEventKind, TelemetryInstant, TelemetryRecorder,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct MockInstant(u64);

impl MockInstant {
    fn secs(value: u64) -> Self {
        Self(value * 1_000_000)
    }
}

impl TelemetryInstant for MockInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

fn single_move(actions: &Actions) -> MoveRequest {
    assert_eq!(actions.len(), 1, "expected exactly one action: {actions:?}");
    match actions[0] {
        Action::Move(request) => request,
        other => panic!("expected a movement action, got {other:?}"),
    }
}

fn running_readings() -> Readings {
    Readings {
        lwt: Some(152.0),
        ewt: Some(135.0),
        cold: Some(70.0),
    }
}

/// Walks the controller through homing and hover into `Active`, completing
/// every movement it requests. Returns the instant of the hover-exit tick.
fn advance_to_active(
    controller: &mut LwtController<MockInstant>,
    telemetry: &mut TelemetryRecorder<MockInstant>,
) -> MockInstant {
    let actions = controller.handle_command(
        ControllerCommand::ActuatorsReady,
        MockInstant::secs(0),
        0.0,
        telemetry,
    );
    let homing = single_move(&actions);
    controller.movement_completed(homing.token, MockInstant::secs(80), telemetry);

    controller.handle_command(
        ControllerCommand::SetTargetLwt(155.0),
        MockInstant::secs(85),
        0.0,
        telemetry,
    );

    let actions = controller.handle_command(
        ControllerCommand::HeatPump(HeatPumpState::Preparing),
        MockInstant::secs(90),
        0.0,
        telemetry,
    );
    let hover = single_move(&actions);
    controller.movement_completed(hover.token, MockInstant::secs(150), telemetry);

    let hover_pct = controller.settings().hover_time_pct();
    let entry = MockInstant::secs(170);
    let actions = controller.tick(entry, hover_pct, &running_readings(), telemetry);
    assert_eq!(controller.state(), ControlState::Active);

    // Complete the equilibrium reposition so the loop is quiescent.
    let reposition = single_move(&actions);
    controller.movement_completed(reposition.token, MockInstant::secs(180), telemetry);

    entry
}

fn expect_full_send(actions: &Actions, state: ControlState) -> MoveToken {
    assert_eq!(state, ControlState::MovingToFullSend);
    let request = single_move(actions);
    match request.kind {
        MoveKind::Position { target_time_pct } => {
            assert_eq!(target_time_pct, 0.0, "fail-safe target is 0 % keep");
        }
        other => panic!("expected a position move, got {other:?}"),
    }
    request.token
}

#[test]
fn heat_pump_off_in_active_forces_full_send() {
    let mut controller: LwtController<MockInstant> =
        LwtController::new(CalibrationCurve::default(), ControlSettings::default());
    let mut telemetry = TelemetryRecorder::new();

    advance_to_active(&mut controller, &mut telemetry);

    let actions = controller.handle_command(
        ControllerCommand::HeatPump(HeatPumpState::Off),
        MockInstant::secs(200),
        70.0,
        &mut telemetry,
    );
    let token = expect_full_send(&actions, controller.state());

    // Reaching 0 % keep parks the loop dormant again.
    controller.movement_completed(token, MockInstant::secs(260), &mut telemetry);
    assert_eq!(controller.state(), ControlState::Dormant);
}

#[test]
fn missing_ewt_during_a_pid_tick_fails_safe() {
    let mut controller: LwtController<MockInstant> =
        LwtController::new(CalibrationCurve::default(), ControlSettings::default());
    let mut telemetry = TelemetryRecorder::new();

    let entry = advance_to_active(&mut controller, &mut telemetry);

    let blind_ewt = Readings {
        ewt: None,
        ..running_readings()
    };
    let tick_at = MockInstant::secs(200);
    assert!(tick_at > entry);

    let actions = controller.tick(tick_at, 70.0, &blind_ewt, &mut telemetry);
    expect_full_send(&actions, controller.state());

    let fault_recorded = telemetry.oldest_first().any(|record| {
        record.event == TelemetryEventKind::ControlFault(FaultKind::MissingEwt)
    });
    assert!(fault_recorded, "missing EWT must surface as a warning event");
}

#[test]
fn losing_lwt_feedback_is_blind_and_fails_safe() {
    let mut controller: LwtController<MockInstant> =
        LwtController::new(CalibrationCurve::default(), ControlSettings::default());
    let mut telemetry = TelemetryRecorder::new();

    advance_to_active(&mut controller, &mut telemetry);

    let blind = Readings {
        lwt: None,
        ..running_readings()
    };
    let actions = controller.tick(MockInstant::secs(200), 70.0, &blind, &mut telemetry);
    expect_full_send(&actions, controller.state());

    let fault_recorded = telemetry.oldest_first().any(|record| {
        record.event == TelemetryEventKind::ControlFault(FaultKind::MissingLwt)
    });
    assert!(fault_recorded, "blind condition must surface as a warning event");
}

#[test]
fn pid_cadence_waits_for_the_configured_interval() {
    let mut controller: LwtController<MockInstant> =
        LwtController::new(CalibrationCurve::default(), ControlSettings::default());
    let mut telemetry = TelemetryRecorder::new();

    let entry = advance_to_active(&mut controller, &mut telemetry);

    // One second after entering Active: not due yet, no movement requested.
    let soon = MockInstant::secs(171);
    assert!(soon > entry);
    let actions = controller.tick(soon, 70.0, &running_readings(), &mut telemetry);
    assert!(actions.is_empty(), "PID must wait a full interval: {actions:?}");

    // A full interval later the step runs and commands a movement.
    let due = MockInstant::secs(200);
    let actions = controller.tick(due, 70.0, &running_readings(), &mut telemetry);
    let request = single_move(&actions);
    assert!(matches!(request.kind, MoveKind::Position { .. }));

    let pid_recorded = telemetry
        .oldest_first()
        .any(|record| record.event == TelemetryEventKind::PidStep);
    assert!(pid_recorded);
}

#[test]
fn preparing_after_shutdown_restarts_the_hover_approach() {
    let mut controller: LwtController<MockInstant> =
        LwtController::new(CalibrationCurve::default(), ControlSettings::default());
    let mut telemetry = TelemetryRecorder::new();

    advance_to_active(&mut controller, &mut telemetry);

    let actions = controller.handle_command(
        ControllerCommand::HeatPump(HeatPumpState::Off),
        MockInstant::secs(200),
        70.0,
        &mut telemetry,
    );
    let shutdown = expect_full_send(&actions, controller.state());

    // The heat pump cycles back before the valve finishes closing: the new
    // hover approach supersedes the shutdown move.
    let actions = controller.handle_command(
        ControllerCommand::HeatPump(HeatPumpState::Preparing),
        MockInstant::secs(210),
        30.0,
        &mut telemetry,
    );
    assert_eq!(controller.state(), ControlState::MovingToStartupHover);
    let hover = single_move(&actions);
    assert_ne!(hover.token, shutdown);

    // The superseded shutdown move's late completion changes nothing.
    let actions =
        controller.movement_completed(shutdown, MockInstant::secs(211), &mut telemetry);
    assert!(actions.is_empty());
    assert_eq!(controller.state(), ControlState::MovingToStartupHover);
}
