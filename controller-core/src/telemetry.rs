//! Telemetry event catalog and payload structures shared by firmware and
//! host targets.
//!
//! Strongly typed event kinds can be serialized to compact numeric codes for
//! transport over the supervisory link. Payload structs carry the extra
//! metadata the console and the emulator surface while remaining `no_std`
//! compatible. Telemetry is the sole visible signal of degraded operation;
//! there is no separate alarm channel.

use core::{fmt, time::Duration};

use heapless::{HistoryBuf, OldestOrdered};

use crate::motion::{MotionState, ValveDirection};
use crate::strategy::{ControlEvent, ControlState};

/// Identifier used when tracking emitted telemetry events.
pub type EventId = u32;

/// Trait implemented by monotonic instant wrappers used for telemetry
/// tracking and elapsed-time arithmetic.
pub trait TelemetryInstant: Copy {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

/// Faults surfaced as warning events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FaultKind {
    /// LWT reading unavailable when required (blind).
    MissingLwt,
    /// EWT reading unavailable during a PID step.
    MissingEwt,
    /// Cold-return reading unavailable while sizing the startup position.
    MissingColdTemp,
    /// The sensitivity model produced no usable divisor.
    SensitivityUnavailable,
    /// A valve-motion transition outside the declared table was attempted.
    MotionTable,
    /// The movement task aborted on an unexpected internal failure.
    MovementAborted,
}

impl FaultKind {
    const COUNT: u16 = 6;

    const fn index(self) -> u16 {
        match self {
            FaultKind::MissingLwt => 0,
            FaultKind::MissingEwt => 1,
            FaultKind::MissingColdTemp => 2,
            FaultKind::SensitivityUnavailable => 3,
            FaultKind::MotionTable => 4,
            FaultKind::MovementAborted => 5,
        }
    }

    const fn from_index(index: u16) -> Option<Self> {
        match index {
            0 => Some(FaultKind::MissingLwt),
            1 => Some(FaultKind::MissingEwt),
            2 => Some(FaultKind::MissingColdTemp),
            3 => Some(FaultKind::SensitivityUnavailable),
            4 => Some(FaultKind::MotionTable),
            5 => Some(FaultKind::MovementAborted),
            _ => None,
        }
    }
}

/// Why an inbound command was rejected.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RejectReason {
    /// A movement is in flight and the command requires quiescence.
    MovementInFlight,
    /// A reset named a believed position that does not match the estimate.
    StaleBaseline,
    /// An endpoint nudge was requested away from the end stops.
    NotAtEndpoint,
    /// The actuators have not reported ready yet.
    NotReady,
    /// A parameter update failed validation.
    InvalidSettings,
}

impl RejectReason {
    const COUNT: u16 = 5;

    const fn index(self) -> u16 {
        match self {
            RejectReason::MovementInFlight => 0,
            RejectReason::StaleBaseline => 1,
            RejectReason::NotAtEndpoint => 2,
            RejectReason::NotReady => 3,
            RejectReason::InvalidSettings => 4,
        }
    }

    const fn from_index(index: u16) -> Option<Self> {
        match index {
            0 => Some(RejectReason::MovementInFlight),
            1 => Some(RejectReason::StaleBaseline),
            2 => Some(RejectReason::NotAtEndpoint),
            3 => Some(RejectReason::NotReady),
            4 => Some(RejectReason::InvalidSettings),
            _ => None,
        }
    }
}

/// Discriminated telemetry events shared across all controller targets.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    DriveStarted(ValveDirection),
    DriveStopped,
    PositionChanged,
    ValveStateChanged,
    ControlStateChanged,
    MoveStarted,
    MoveSuperseded,
    MoveCompleted,
    Watchdog,
    PidStep,
    ControlFault(FaultKind),
    CommandRejected(RejectReason),
    Custom(u16),
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::DriveStarted(direction) => {
                write!(f, "drive-started {direction}")
            }
            TelemetryEventKind::DriveStopped => f.write_str("drive-stopped"),
            TelemetryEventKind::PositionChanged => f.write_str("position"),
            TelemetryEventKind::ValveStateChanged => f.write_str("valve-state"),
            TelemetryEventKind::ControlStateChanged => f.write_str("control-state"),
            TelemetryEventKind::MoveStarted => f.write_str("move-started"),
            TelemetryEventKind::MoveSuperseded => f.write_str("move-superseded"),
            TelemetryEventKind::MoveCompleted => f.write_str("move-completed"),
            TelemetryEventKind::Watchdog => f.write_str("watchdog"),
            TelemetryEventKind::PidStep => f.write_str("pid-step"),
            TelemetryEventKind::ControlFault(kind) => write!(f, "fault {kind:?}"),
            TelemetryEventKind::CommandRejected(reason) => write!(f, "rejected {reason:?}"),
            TelemetryEventKind::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

impl TelemetryEventKind {
    const DRIVE_STARTED_BASE: u16 = 0x0000;
    const DRIVE_STOPPED_CODE: u16 = 0x0002;
    const POSITION_CODE: u16 = 0x0003;
    const VALVE_STATE_CODE: u16 = 0x0004;
    const CONTROL_STATE_CODE: u16 = 0x0005;
    const MOVE_STARTED_CODE: u16 = 0x0006;
    const MOVE_SUPERSEDED_CODE: u16 = 0x0007;
    const MOVE_COMPLETED_CODE: u16 = 0x0008;
    const WATCHDOG_CODE: u16 = 0x0009;
    const PID_STEP_CODE: u16 = 0x000A;
    const FAULT_BASE: u16 = 0x0010;
    const REJECT_BASE: u16 = 0x0020;

    /// Encodes the event into a compact transport-friendly discriminant.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            TelemetryEventKind::DriveStarted(direction) => {
                Self::DRIVE_STARTED_BASE + direction_index(direction)
            }
            TelemetryEventKind::DriveStopped => Self::DRIVE_STOPPED_CODE,
            TelemetryEventKind::PositionChanged => Self::POSITION_CODE,
            TelemetryEventKind::ValveStateChanged => Self::VALVE_STATE_CODE,
            TelemetryEventKind::ControlStateChanged => Self::CONTROL_STATE_CODE,
            TelemetryEventKind::MoveStarted => Self::MOVE_STARTED_CODE,
            TelemetryEventKind::MoveSuperseded => Self::MOVE_SUPERSEDED_CODE,
            TelemetryEventKind::MoveCompleted => Self::MOVE_COMPLETED_CODE,
            TelemetryEventKind::Watchdog => Self::WATCHDOG_CODE,
            TelemetryEventKind::PidStep => Self::PID_STEP_CODE,
            TelemetryEventKind::ControlFault(kind) => Self::FAULT_BASE + kind.index(),
            TelemetryEventKind::CommandRejected(reason) => Self::REJECT_BASE + reason.index(),
            TelemetryEventKind::Custom(code) => code,
        }
    }

    /// Decodes a raw discriminant, falling back to [`Self::Custom`].
    #[must_use]
    pub fn from_raw(code: u16) -> Self {
        match code {
            Self::DRIVE_STOPPED_CODE => TelemetryEventKind::DriveStopped,
            Self::POSITION_CODE => TelemetryEventKind::PositionChanged,
            Self::VALVE_STATE_CODE => TelemetryEventKind::ValveStateChanged,
            Self::CONTROL_STATE_CODE => TelemetryEventKind::ControlStateChanged,
            Self::MOVE_STARTED_CODE => TelemetryEventKind::MoveStarted,
            Self::MOVE_SUPERSEDED_CODE => TelemetryEventKind::MoveSuperseded,
            Self::MOVE_COMPLETED_CODE => TelemetryEventKind::MoveCompleted,
            Self::WATCHDOG_CODE => TelemetryEventKind::Watchdog,
            Self::PID_STEP_CODE => TelemetryEventKind::PidStep,
            value if (Self::DRIVE_STARTED_BASE..Self::DRIVE_STOPPED_CODE).contains(&value) => {
                direction_from_index(value - Self::DRIVE_STARTED_BASE)
                    .map_or(TelemetryEventKind::Custom(value), TelemetryEventKind::DriveStarted)
            }
            value if (Self::FAULT_BASE..Self::FAULT_BASE + FaultKind::COUNT).contains(&value) => {
                FaultKind::from_index(value - Self::FAULT_BASE)
                    .map_or(TelemetryEventKind::Custom(value), TelemetryEventKind::ControlFault)
            }
            value
                if (Self::REJECT_BASE..Self::REJECT_BASE + RejectReason::COUNT)
                    .contains(&value) =>
            {
                RejectReason::from_index(value - Self::REJECT_BASE)
                    .map_or(TelemetryEventKind::Custom(value), TelemetryEventKind::CommandRejected)
            }
            other => TelemetryEventKind::Custom(other),
        }
    }
}

const fn direction_index(direction: ValveDirection) -> u16 {
    match direction {
        ValveDirection::MoreKeep => 0,
        ValveDirection::LessKeep => 1,
    }
}

fn direction_from_index(index: u16) -> Option<ValveDirection> {
    match index {
        0 => Some(ValveDirection::MoreKeep),
        1 => Some(ValveDirection::LessKeep),
        _ => None,
    }
}

/// Position update payload.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PositionTelemetry {
    pub time_pct: f32,
    pub flow_pct: f32,
}

impl PositionTelemetry {
    #[must_use]
    pub const fn new(time_pct: f32, flow_pct: f32) -> Self {
        Self { time_pct, flow_pct }
    }
}

/// Valve-motion transition payload.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ValveTelemetry {
    pub from: MotionState,
    pub to: MotionState,
    /// Elapsed drive time reported when leaving a driving state.
    pub drove_for: Option<Duration>,
}

/// Control-strategy transition payload.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ControlTelemetry {
    pub from: ControlState,
    pub to: ControlState,
    pub cause: ControlEvent,
}

/// Movement lifecycle payload.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MoveTelemetry {
    pub token: u32,
    pub target_pct: f32,
}

/// PID step payload mirrored for tuning.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PidTelemetry {
    pub error: f32,
    pub proportional: f32,
    pub integral: f32,
    pub derivative: f32,
    pub commanded_time_pct: f32,
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TelemetryPayload {
    /// No additional metadata accompanies the event.
    None,
    Position(PositionTelemetry),
    Valve(ValveTelemetry),
    Control(ControlTelemetry),
    Move(MoveTelemetry),
    Pid(PidTelemetry),
}

impl TelemetryPayload {
    /// Convenience constructor when no payload data is needed.
    #[must_use]
    pub const fn none() -> Self {
        TelemetryPayload::None
    }
}

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 128;

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TelemetryRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord<TInstant>, CAPACITY>;

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: TelemetryRing<TInstant, CAPACITY>,
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: Copy + TelemetryInstant,
{
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord<TInstant>> {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent telemetry record, if available.
    pub fn latest(&self) -> Option<&TelemetryRecord<TInstant>> {
        self.ring.recent()
    }

    /// Returns the number of records currently stored.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns `true` when no telemetry records are stored.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Records an arbitrary telemetry event with the supplied payload.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        payload: TelemetryPayload,
        timestamp: TInstant,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            details: payload,
        });

        id
    }

    /// Records a position update.
    pub fn record_position(&mut self, time_pct: f32, flow_pct: f32, timestamp: TInstant) -> EventId {
        self.record(
            TelemetryEventKind::PositionChanged,
            TelemetryPayload::Position(PositionTelemetry::new(time_pct, flow_pct)),
            timestamp,
        )
    }

    /// Records an accepted valve-motion transition.
    pub fn record_valve_transition(
        &mut self,
        from: MotionState,
        to: MotionState,
        drove_for: Option<Duration>,
        timestamp: TInstant,
    ) -> EventId {
        self.record(
            TelemetryEventKind::ValveStateChanged,
            TelemetryPayload::Valve(ValveTelemetry { from, to, drove_for }),
            timestamp,
        )
    }

    /// Records an accepted control-strategy transition with its cause.
    pub fn record_control_transition(
        &mut self,
        from: ControlState,
        to: ControlState,
        cause: ControlEvent,
        timestamp: TInstant,
    ) -> EventId {
        self.record(
            TelemetryEventKind::ControlStateChanged,
            TelemetryPayload::Control(ControlTelemetry { from, to, cause }),
            timestamp,
        )
    }

    /// Records a movement lifecycle event.
    pub fn record_move(
        &mut self,
        event: TelemetryEventKind,
        token: u32,
        target_pct: f32,
        timestamp: TInstant,
    ) -> EventId {
        self.record(
            event,
            TelemetryPayload::Move(MoveTelemetry { token, target_pct }),
            timestamp,
        )
    }

    /// Records a control fault warning.
    pub fn record_fault(&mut self, kind: FaultKind, timestamp: TInstant) -> EventId {
        self.record(
            TelemetryEventKind::ControlFault(kind),
            TelemetryPayload::None,
            timestamp,
        )
    }

    /// Records a rejected inbound command.
    pub fn record_rejection(&mut self, reason: RejectReason, timestamp: TInstant) -> EventId {
        self.record(
            TelemetryEventKind::CommandRejected(reason),
            TelemetryPayload::None,
            timestamp,
        )
    }

    /// Records the per-tick liveness heartbeat.
    pub fn record_watchdog(&mut self, timestamp: TInstant) -> EventId {
        self.record(TelemetryEventKind::Watchdog, TelemetryPayload::None, timestamp)
    }
}

impl<TInstant, const CAPACITY: usize> Default for TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: Copy + TelemetryInstant,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    struct MicrosInstant(u64);

    impl TelemetryInstant for MicrosInstant {
        fn saturating_duration_since(&self, earlier: Self) -> Duration {
            Duration::from_micros(self.0.saturating_sub(earlier.0))
        }
    }

    #[test]
    fn event_codes_round_trip() {
        let fixtures = [
            TelemetryEventKind::DriveStarted(ValveDirection::MoreKeep),
            TelemetryEventKind::DriveStarted(ValveDirection::LessKeep),
            TelemetryEventKind::DriveStopped,
            TelemetryEventKind::PositionChanged,
            TelemetryEventKind::ValveStateChanged,
            TelemetryEventKind::ControlStateChanged,
            TelemetryEventKind::MoveStarted,
            TelemetryEventKind::MoveSuperseded,
            TelemetryEventKind::MoveCompleted,
            TelemetryEventKind::Watchdog,
            TelemetryEventKind::PidStep,
            TelemetryEventKind::ControlFault(FaultKind::MissingEwt),
            TelemetryEventKind::ControlFault(FaultKind::MovementAborted),
            TelemetryEventKind::CommandRejected(RejectReason::StaleBaseline),
            TelemetryEventKind::CommandRejected(RejectReason::InvalidSettings),
        ];

        for event in fixtures {
            assert_eq!(TelemetryEventKind::from_raw(event.to_raw()), event);
        }
    }

    #[test]
    fn unknown_codes_decode_as_custom() {
        let decoded = TelemetryEventKind::from_raw(0x4242);
        assert_eq!(decoded, TelemetryEventKind::Custom(0x4242));
        assert_eq!(decoded.to_raw(), 0x4242);
    }

    #[test]
    fn recorder_assigns_sequential_ids() {
        let mut recorder = TelemetryRecorder::<MicrosInstant>::new();

        let first = recorder.record_watchdog(MicrosInstant(100));
        let second = recorder.record_position(40.0, 32.0, MicrosInstant(200));

        assert_eq!(first, 0);
        assert_eq!(second, 1);
        assert_eq!(recorder.len(), 2);

        let latest = recorder.latest().copied().expect("record stored");
        assert_eq!(latest.event, TelemetryEventKind::PositionChanged);
        match latest.details {
            TelemetryPayload::Position(details) => {
                assert_eq!(details.time_pct, 40.0);
                assert_eq!(details.flow_pct, 32.0);
            }
            _ => panic!("expected position payload"),
        }
    }

    #[test]
    fn control_transition_carries_cause() {
        let mut recorder = TelemetryRecorder::<MicrosInstant>::new();

        recorder.record_control_transition(
            ControlState::Active,
            ControlState::MovingToFullSend,
            ControlEvent::HeatPumpOff,
            MicrosInstant(1_000),
        );

        let record = recorder.latest().copied().expect("record stored");
        match record.details {
            TelemetryPayload::Control(details) => {
                assert_eq!(details.from, ControlState::Active);
                assert_eq!(details.to, ControlState::MovingToFullSend);
                assert_eq!(details.cause, ControlEvent::HeatPumpOff);
            }
            _ => panic!("expected control payload"),
        }
    }

    #[test]
    fn ring_keeps_only_the_newest_records() {
        let mut recorder = TelemetryRecorder::<MicrosInstant, 4>::new();

        for index in 0..6_u64 {
            recorder.record_watchdog(MicrosInstant(index));
        }

        assert_eq!(recorder.len(), 4);
        let oldest = recorder.oldest_first().next().copied().expect("ring non-empty");
        assert_eq!(oldest.id, 2);
    }
}
