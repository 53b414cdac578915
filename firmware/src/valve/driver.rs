//! Valve movement engine.
//!
//! One long-lived task owns the relay actuator and executes movement
//! requests serially, which is what guarantees that two generations of
//! movement can never command the drive at the same time. Supersession is
//! cooperative: after every sleep the engine re-checks whether its token is
//! still current and, if not, stops mutating the shared position and unwinds
//! through the stop path before the next request is taken up.

use controller_core::motion::{ActuatorCommands, ValveDirection, ValveMotion};
use controller_core::movement::{
    self, MoveKind, MoveRequest, MoveToken, MovementPlan, PositionEstimate,
};
use controller_core::telemetry::FaultKind;
use embassy_time::Timer;

use super::{
    EventSender, FirmwareInstant, MoveReceiver, MovementEvent, core_duration_to_embassy,
    is_current,
};
use crate::status;

/// How an increment loop ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Outcome {
    Completed,
    Superseded,
}

/// Serial executor for movement requests.
pub struct ValveDriver<'a, A: ActuatorCommands> {
    actuator: A,
    motion: ValveMotion<FirmwareInstant>,
    moves: MoveReceiver<'a>,
    events: EventSender<'a>,
}

impl<'a, A: ActuatorCommands> ValveDriver<'a, A> {
    /// Creates the driver, forcing the drive relay open first.
    pub fn new(moves: MoveReceiver<'a>, events: EventSender<'a>, mut actuator: A) -> Self {
        actuator.stop_drive();
        Self {
            actuator,
            motion: ValveMotion::new(),
            moves,
            events,
        }
    }

    /// Consumes movement requests forever.
    pub async fn run(mut self) -> ! {
        loop {
            let mut request = self.moves.receive().await;

            // Latest request wins; stale queue entries are reported as
            // superseded without ever touching the relays.
            while let Ok(newer) = self.moves.try_receive() {
                self.events
                    .send(MovementEvent::Superseded {
                        token: request.token,
                        at_pct: status::position(),
                    })
                    .await;
                request = newer;
            }

            self.execute(request).await;
        }
    }

    async fn execute(&mut self, request: MoveRequest) {
        status::set_moving(true);
        self.events
            .send(MovementEvent::Started {
                token: request.token,
                target_pct: target_of(&request),
            })
            .await;

        match request.kind {
            MoveKind::Position { target_time_pct } => {
                self.run_position(request.token, target_time_pct).await;
            }
            MoveKind::Home => self.run_homing(request.token).await,
            MoveKind::Nudge {
                direction,
                drive_for,
            } => self.run_nudge(request.token, direction, drive_for).await,
        }

        status::set_moving(false);
    }

    async fn run_position(&mut self, token: MoveToken, target_time_pct: f32) {
        let plan = MovementPlan::to_position(target_time_pct, status::travel_seconds());
        let mut position = PositionEstimate::new(status::position());

        let Some(direction) = plan.direction_from(position.get()) else {
            if is_current(token) {
                self.events
                    .send(MovementEvent::Completed {
                        token,
                        target_pct: plan.target(),
                    })
                    .await;
            }
            return;
        };

        if !self.begin(token, direction).await {
            return;
        }

        let mut outcome = Outcome::Completed;
        while let Some(increment) = plan.next_increment(position.get()) {
            Timer::after(core_duration_to_embassy(increment.drive_for)).await;

            if !is_current(token) {
                outcome = Outcome::Superseded;
                break;
            }

            let crossed = position.advance(increment.delta_pct);
            status::store_position(position.get());
            if crossed {
                self.events
                    .send(MovementEvent::PositionChanged {
                        time_pct: position.get(),
                    })
                    .await;
            }
        }

        self.finish(token, direction, position.get(), plan.target(), outcome)
            .await;
    }

    async fn run_homing(&mut self, token: MoveToken) {
        let travel = status::travel_seconds();
        let mut position = PositionEstimate::new(status::position());

        if !self.begin(token, ValveDirection::LessKeep).await {
            return;
        }

        let step = movement::drive_time_for_percent(movement::INCREMENT_PERCENT, travel);
        let mut outcome = Outcome::Completed;

        for _ in 0..movement::homing_increments() {
            Timer::after(core_duration_to_embassy(step)).await;

            if !is_current(token) {
                outcome = Outcome::Superseded;
                break;
            }

            let crossed = position.advance(-movement::INCREMENT_PERCENT);
            status::store_position(position.get());
            if crossed {
                self.events
                    .send(MovementEvent::PositionChanged {
                        time_pct: position.get(),
                    })
                    .await;
            }
        }

        if outcome == Outcome::Completed {
            // The overdrive guarantees the send stop; the estimate becomes
            // truth here and nowhere else.
            position.set(0.0);
            status::store_position(0.0);
        }

        self.finish(token, ValveDirection::LessKeep, position.get(), 0.0, outcome)
            .await;
    }

    async fn run_nudge(
        &mut self,
        token: MoveToken,
        direction: ValveDirection,
        drive_for: core::time::Duration,
    ) {
        let mut position = PositionEstimate::new(status::position());

        if !self.begin(token, direction).await {
            return;
        }

        Timer::after(core_duration_to_embassy(drive_for)).await;

        let outcome = if is_current(token) {
            let delta = movement::percent_for_drive_time(drive_for, status::travel_seconds());
            let signed = match direction {
                ValveDirection::MoreKeep => delta,
                ValveDirection::LessKeep => -delta,
            };
            let crossed = position.advance(signed);
            status::store_position(position.get());
            if crossed {
                self.events
                    .send(MovementEvent::PositionChanged {
                        time_pct: position.get(),
                    })
                    .await;
            }
            Outcome::Completed
        } else {
            Outcome::Superseded
        };

        self.finish(token, direction, position.get(), position.get(), outcome)
            .await;
    }

    /// Starts the drive. On a table fault the motor was never energized; the
    /// request is reported as aborted.
    async fn begin(&mut self, token: MoveToken, direction: ValveDirection) -> bool {
        match self
            .motion
            .begin_drive(direction, FirmwareInstant::now(), &mut self.actuator)
        {
            Ok(change) => {
                status::record_valve_state(change.to);
                log_transition(change.from.label(), change.to.label());
                self.events
                    .send(MovementEvent::ValveTransition {
                        from: change.from,
                        to: change.to,
                        drove_for: None,
                    })
                    .await;
                true
            }
            Err(fault) => {
                log_motion_fault(fault.state.label());
                self.events
                    .send(MovementEvent::Aborted {
                        token,
                        fault: FaultKind::MotionTable,
                    })
                    .await;
                false
            }
        }
    }

    /// Stops the drive and reports the final lifecycle event. This is the
    /// single cleanup path every started movement unwinds through.
    async fn finish(
        &mut self,
        token: MoveToken,
        direction: ValveDirection,
        position_pct: f32,
        target_pct: f32,
        outcome: Outcome,
    ) {
        let resting = movement::resting_state_after(direction, position_pct);

        match self
            .motion
            .stop_drive(resting, FirmwareInstant::now(), &mut self.actuator)
        {
            Ok((change, drove_for)) => {
                status::record_valve_state(change.to);
                log_transition(change.from.label(), change.to.label());
                self.events
                    .send(MovementEvent::ValveTransition {
                        from: change.from,
                        to: change.to,
                        drove_for: Some(drove_for),
                    })
                    .await;
            }
            Err(fault) => {
                // Bookkeeping diverged from the physical drive; force the
                // motor off regardless before surfacing the fault.
                self.actuator.stop_drive();
                log_motion_fault(fault.state.label());
                self.events
                    .send(MovementEvent::Aborted {
                        token,
                        fault: FaultKind::MotionTable,
                    })
                    .await;
                return;
            }
        }

        match outcome {
            Outcome::Completed if is_current(token) => {
                self.events
                    .send(MovementEvent::Completed { token, target_pct })
                    .await;
            }
            Outcome::Completed | Outcome::Superseded => {
                self.events
                    .send(MovementEvent::Superseded {
                        token,
                        at_pct: position_pct,
                    })
                    .await;
            }
        }
    }
}

fn target_of(request: &MoveRequest) -> f32 {
    match request.kind {
        MoveKind::Position { target_time_pct } => target_time_pct,
        MoveKind::Home => 0.0,
        MoveKind::Nudge { .. } => status::position(),
    }
}

#[cfg(target_os = "none")]
fn log_transition(from: &'static str, to: &'static str) {
    defmt::info!("valve: {} -> {}", from, to);
}

#[cfg(not(target_os = "none"))]
fn log_transition(from: &'static str, to: &'static str) {
    println!("valve: {from} -> {to}");
}

#[cfg(target_os = "none")]
fn log_motion_fault(state: &'static str) {
    defmt::error!("valve: motion table fault in {}", state);
}

#[cfg(not(target_os = "none"))]
fn log_motion_fault(state: &'static str) {
    println!("valve: motion table fault in {state}");
}
