#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Telemetry recording glue for the firmware target.
//!
//! The control-loop task owns the single `controller-core` telemetry ring;
//! this module maps valve-driver lifecycle events into it and mirrors newly
//! appended records to defmt (or stdout on the host) so the supervisory log
//! shows the same story the ring does. Watchdog heartbeats stay off the log.

use controller_core::calibration::CalibrationCurve;
use controller_core::motion::{MotionState, ValveDirection};
use controller_core::telemetry::{
    EventId, TelemetryEventKind, TelemetryPayload, TelemetryRecord, TelemetryRecorder,
};

use crate::valve::{FirmwareInstant, MovementEvent};

/// Concrete recorder bound to the firmware clock.
pub type Recorder = TelemetryRecorder<FirmwareInstant>;

/// Applies a valve-driver lifecycle event to the telemetry ring.
///
/// Drive-state transitions additionally surface as relay telemetry so the
/// outbound stream reports "start drive" / "stop drive" alongside the state
/// change that caused them.
pub fn record_movement_event(
    recorder: &mut Recorder,
    event: &MovementEvent,
    curve: &CalibrationCurve,
    now: FirmwareInstant,
) {
    match *event {
        MovementEvent::Started { token, target_pct } => {
            recorder.record_move(TelemetryEventKind::MoveStarted, token.raw(), target_pct, now);
        }
        MovementEvent::Superseded { token, at_pct } => {
            recorder.record_move(TelemetryEventKind::MoveSuperseded, token.raw(), at_pct, now);
        }
        MovementEvent::Completed { token, target_pct } => {
            recorder.record_move(TelemetryEventKind::MoveCompleted, token.raw(), target_pct, now);
        }
        MovementEvent::Aborted { token: _, fault } => {
            recorder.record_fault(fault, now);
        }
        MovementEvent::ValveTransition {
            from,
            to,
            drove_for,
        } => {
            recorder.record_valve_transition(from, to, drove_for, now);
            if let Some(direction) = drive_direction(to) {
                recorder.record(
                    TelemetryEventKind::DriveStarted(direction),
                    TelemetryPayload::None,
                    now,
                );
            } else if drive_direction(from).is_some() {
                recorder.record(TelemetryEventKind::DriveStopped, TelemetryPayload::None, now);
            }
        }
        MovementEvent::PositionChanged { time_pct } => {
            recorder.record_position(time_pct, curve.flow_from_time(time_pct), now);
        }
    }
}

fn drive_direction(state: MotionState) -> Option<ValveDirection> {
    match state {
        MotionState::KeepingMore => Some(ValveDirection::MoreKeep),
        MotionState::KeepingLess => Some(ValveDirection::LessKeep),
        MotionState::FullySend | MotionState::FullyKeep | MotionState::SteadyBlend => None,
    }
}

/// Mirrors records appended since the last call to the log.
pub fn mirror_new(recorder: &Recorder, last_seen: &mut Option<EventId>) {
    for record in recorder.oldest_first() {
        if let Some(seen) = *last_seen
            && record.id <= seen
        {
            continue;
        }

        *last_seen = Some(record.id);

        if record.event == TelemetryEventKind::Watchdog {
            continue;
        }

        emit_log(record);
    }
}

#[cfg(target_os = "none")]
fn emit_log(record: &TelemetryRecord<FirmwareInstant>) {
    let timestamp_us = record.timestamp.into_embassy().as_micros();
    defmt::info!(
        "telemetry: event=0x{=u16:x} id={} t={}us",
        record.event.to_raw(),
        record.id,
        timestamp_us
    );
}

#[cfg(not(target_os = "none"))]
fn emit_log(record: &TelemetryRecord<FirmwareInstant>) {
    let timestamp_us = record.timestamp.into_embassy().as_micros();
    println!("telemetry: {} id={} t={timestamp_us}us", record.event, record.id);
}
