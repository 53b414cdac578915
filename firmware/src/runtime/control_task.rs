use controller_core::calibration::CalibrationCurve;
use controller_core::controller::{Action, Actions, LwtController};
use controller_core::pid::ControlSettings;
use embassy_time::{Duration, Timer};

use crate::valve::{
    self, CommandReceiver, EventReceiver, FirmwareInstant, MoveSender, MovementEvent,
};
use crate::{status, telemetry};

/// Control loop cadence; the PID interval gates itself inside the driver.
const TICK_PERIOD: Duration = Duration::from_secs(1);

#[embassy_executor::task]
pub async fn run(
    commands: CommandReceiver<'static>,
    events: EventReceiver<'static>,
    moves: MoveSender<'static>,
) -> ! {
    let mut controller: LwtController<FirmwareInstant> =
        LwtController::new(CalibrationCurve::default(), ControlSettings::default());
    let mut ring = telemetry::Recorder::new();
    let mut last_logged = None;

    status::record_settings(controller.settings());
    status::record_control_state(controller.state());
    status::store_target_lwt(controller.target_lwt());

    loop {
        let now = FirmwareInstant::now();

        // Movement lifecycle first, so completions observed this tick feed
        // the strategy machine before new decisions are made.
        while let Ok(event) = events.try_receive() {
            telemetry::record_movement_event(&mut ring, &event, controller.curve(), now);
            match event {
                MovementEvent::Completed { token, .. } => {
                    let actions = controller.movement_completed(token, now, &mut ring);
                    execute(&actions, &moves).await;
                }
                MovementEvent::Aborted { token, .. } => controller.movement_failed(token),
                MovementEvent::Started { .. }
                | MovementEvent::Superseded { .. }
                | MovementEvent::ValveTransition { .. }
                | MovementEvent::PositionChanged { .. } => {}
            }
        }

        while let Ok(command) = commands.try_receive() {
            let actions = controller.handle_command(command, now, status::position(), &mut ring);
            execute(&actions, &moves).await;
            status::record_settings(controller.settings());
            status::store_target_lwt(controller.target_lwt());
        }

        let readings = status::readings();
        let actions = controller.tick(now, status::position(), &readings, &mut ring);
        execute(&actions, &moves).await;

        status::record_control_state(controller.state());
        status::store_flow(controller.curve().flow_from_time(status::position()));
        telemetry::mirror_new(&ring, &mut last_logged);

        Timer::after(TICK_PERIOD).await;
    }
}

async fn execute(actions: &Actions, moves: &MoveSender<'static>) {
    for action in actions {
        match *action {
            Action::Move(request) => {
                // Mark before enqueueing so the running task sees the
                // supersession even before the queue drains.
                valve::mark_current(request.token);
                moves.send(request).await;
            }
            Action::AcceptPosition(value) => status::store_position(value),
        }
    }
}
