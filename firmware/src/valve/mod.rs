#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Valve control surface bridging firmware tasks with `controller-core`.
//!
//! Owns the shared queues, the current-movement token cell, and the
//! [`FirmwareInstant`] wrapper binding the shared control logic to Embassy's
//! monotonic clock. The movement engine itself lives in [`driver`].

pub mod driver;

use core::time::Duration as CoreDuration;

use controller_core::controller::ControllerCommand;
use controller_core::movement::{MoveRequest, MoveToken};
use controller_core::motion::MotionState;
use controller_core::telemetry::{FaultKind, TelemetryInstant};
#[cfg(not(target_os = "none"))]
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
#[cfg(target_os = "none")]
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use embassy_time::{Duration, Instant};
use portable_atomic::{AtomicU32, Ordering};

/// Depth of the inbound command queue fed by the supervisory link.
pub const COMMAND_QUEUE_DEPTH: usize = 8;

/// Depth of the movement request queue; the driver drains to the newest.
pub const MOVE_QUEUE_DEPTH: usize = 4;

/// Depth of the movement event queue back to the control loop.
pub const EVENT_QUEUE_DEPTH: usize = 8;

#[cfg(target_os = "none")]
type ValveMutex = ThreadModeRawMutex;
#[cfg(not(target_os = "none"))]
type ValveMutex = NoopRawMutex;

/// Queue carrying supervisory commands into the control-loop task.
pub type CommandQueue = Channel<ValveMutex, ControllerCommand, COMMAND_QUEUE_DEPTH>;
pub type CommandSender<'a> = Sender<'a, ValveMutex, ControllerCommand, COMMAND_QUEUE_DEPTH>;
pub type CommandReceiver<'a> = Receiver<'a, ValveMutex, ControllerCommand, COMMAND_QUEUE_DEPTH>;

/// Queue carrying movement requests to the valve driver.
pub type MoveQueue = Channel<ValveMutex, MoveRequest, MOVE_QUEUE_DEPTH>;
pub type MoveSender<'a> = Sender<'a, ValveMutex, MoveRequest, MOVE_QUEUE_DEPTH>;
pub type MoveReceiver<'a> = Receiver<'a, ValveMutex, MoveRequest, MOVE_QUEUE_DEPTH>;

/// Queue carrying movement lifecycle events back to the control loop.
pub type EventQueue = Channel<ValveMutex, MovementEvent, EVENT_QUEUE_DEPTH>;
pub type EventSender<'a> = Sender<'a, ValveMutex, MovementEvent, EVENT_QUEUE_DEPTH>;
pub type EventReceiver<'a> = Receiver<'a, ValveMutex, MovementEvent, EVENT_QUEUE_DEPTH>;

/// Lifecycle notifications emitted by the valve driver.
///
/// All telemetry recording happens in the control-loop task, which owns the
/// recorder; the driver only reports what happened, in order.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum MovementEvent {
    Started {
        token: MoveToken,
        target_pct: f32,
    },
    Superseded {
        token: MoveToken,
        at_pct: f32,
    },
    Completed {
        token: MoveToken,
        target_pct: f32,
    },
    Aborted {
        token: MoveToken,
        fault: FaultKind,
    },
    ValveTransition {
        from: MotionState,
        to: MotionState,
        drove_for: Option<CoreDuration>,
    },
    PositionChanged {
        time_pct: f32,
    },
}

/// Raw value stored while no movement has ever been requested.
const NO_TOKEN: u32 = u32::MAX;

/// The token of the most recently requested movement. The requester stores
/// it before enqueueing, so a running task observes supersession even before
/// the queue is drained.
static CURRENT_MOVE_TOKEN: AtomicU32 = AtomicU32::new(NO_TOKEN);

/// Marks `token` as the current movement.
pub fn mark_current(token: MoveToken) {
    CURRENT_MOVE_TOKEN.store(token.raw(), Ordering::Release);
}

/// Returns `true` while `token` is still the current movement.
pub fn is_current(token: MoveToken) -> bool {
    CURRENT_MOVE_TOKEN.load(Ordering::Acquire) == token.raw()
}

/// Monotonic instant wrapper satisfying the `controller-core` timing trait.
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub struct FirmwareInstant(Instant);

impl FirmwareInstant {
    /// Captures the current instant.
    #[must_use]
    pub fn now() -> Self {
        Self(Instant::now())
    }

    /// Unwraps to the Embassy instant.
    #[must_use]
    pub const fn into_embassy(self) -> Instant {
        self.0
    }
}

impl From<Instant> for FirmwareInstant {
    fn from(instant: Instant) -> Self {
        Self(instant)
    }
}

impl TelemetryInstant for FirmwareInstant {
    fn saturating_duration_since(&self, earlier: Self) -> CoreDuration {
        let micros = self
            .0
            .saturating_duration_since(earlier.0)
            .as_micros();
        CoreDuration::from_micros(micros)
    }
}

/// Converts a shared-core duration into an Embassy timer duration.
#[must_use]
pub fn core_duration_to_embassy(duration: CoreDuration) -> Duration {
    let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
    Duration::from_micros(micros)
}
