#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Shared status storage for the firmware target.
//!
//! Lightweight atomics keep the position estimate, the latest temperature
//! readings, the live control parameters, and both machine states visible
//! across tasks, so the supervisory link can render a `status` reply without
//! touching task-owned state. Floats are stored as raw bits; a quiet-NaN
//! sentinel marks a reading as unavailable.

use controller_core::console::{ReadingChannel, StatusSnapshot};
use controller_core::controller::{DEFAULT_TARGET_LWT, Readings};
use controller_core::motion::MotionState;
use controller_core::pid::{ControlSettings, PidGains};
use controller_core::strategy::ControlState;
use portable_atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

/// Quiet-NaN bit pattern marking a float cell as unavailable.
const UNAVAILABLE: u32 = 0x7FC0_0000;

static POSITION_BITS: AtomicU32 = AtomicU32::new(0);
static FLOW_BITS: AtomicU32 = AtomicU32::new(0);
static TARGET_LWT_BITS: AtomicU32 = AtomicU32::new(DEFAULT_TARGET_LWT.to_bits());

static LWT_BITS: AtomicU32 = AtomicU32::new(UNAVAILABLE);
static EWT_BITS: AtomicU32 = AtomicU32::new(UNAVAILABLE);
static COLD_BITS: AtomicU32 = AtomicU32::new(UNAVAILABLE);

static GAIN_P_BITS: AtomicU32 = AtomicU32::new(0);
static GAIN_I_BITS: AtomicU32 = AtomicU32::new(0);
static GAIN_D_BITS: AtomicU32 = AtomicU32::new(0);
static INTERVAL_BITS: AtomicU32 = AtomicU32::new(0);
static TRAVEL_BITS: AtomicU32 = AtomicU32::new(0);
static HOVER_BITS: AtomicU32 = AtomicU32::new(0);
static SETTINGS_SEEDED: AtomicBool = AtomicBool::new(false);

static CONTROL_STATE: AtomicU8 = AtomicU8::new(0);
static VALVE_STATE: AtomicU8 = AtomicU8::new(0);
static MOVING: AtomicBool = AtomicBool::new(false);

fn store_f32(cell: &AtomicU32, value: f32) {
    cell.store(value.to_bits(), Ordering::Relaxed);
}

fn load_f32(cell: &AtomicU32) -> f32 {
    f32::from_bits(cell.load(Ordering::Relaxed))
}

fn store_optional(cell: &AtomicU32, value: Option<f32>) {
    match value {
        Some(value) => cell.store(value.to_bits(), Ordering::Relaxed),
        None => cell.store(UNAVAILABLE, Ordering::Relaxed),
    }
}

fn load_optional(cell: &AtomicU32) -> Option<f32> {
    let value = f32::from_bits(cell.load(Ordering::Relaxed));
    if value.is_nan() { None } else { Some(value) }
}

/// Stores the position estimate, in time percent.
pub fn store_position(time_pct: f32) {
    store_f32(&POSITION_BITS, time_pct);
}

/// Returns the position estimate, in time percent.
pub fn position() -> f32 {
    load_f32(&POSITION_BITS)
}

/// Stores the derived flow percent for status rendering.
pub fn store_flow(flow_pct: f32) {
    store_f32(&FLOW_BITS, flow_pct);
}

/// Stores the live target leaving-water temperature.
pub fn store_target_lwt(value: f32) {
    store_f32(&TARGET_LWT_BITS, value);
}

/// Records a temperature reading injected by the supervisory link.
pub fn record_reading(channel: ReadingChannel, value: Option<f32>) {
    let cell = match channel {
        ReadingChannel::Lwt => &LWT_BITS,
        ReadingChannel::Ewt => &EWT_BITS,
        ReadingChannel::Cold => &COLD_BITS,
    };
    store_optional(cell, value);
}

/// Returns the latest temperature readings.
pub fn readings() -> Readings {
    Readings {
        lwt: load_optional(&LWT_BITS),
        ewt: load_optional(&EWT_BITS),
        cold: load_optional(&COLD_BITS),
    }
}

/// Publishes the live control parameters for the link task's merges.
pub fn record_settings(settings: &ControlSettings) {
    store_f32(&GAIN_P_BITS, settings.gains.proportional);
    store_f32(&GAIN_I_BITS, settings.gains.integral);
    store_f32(&GAIN_D_BITS, settings.gains.derivative);
    store_f32(&INTERVAL_BITS, settings.interval_seconds);
    store_f32(&TRAVEL_BITS, settings.travel_seconds);
    store_f32(&HOVER_BITS, settings.hover_seconds);
    SETTINGS_SEEDED.store(true, Ordering::Release);
}

/// Returns the published control parameters.
pub fn settings() -> ControlSettings {
    if !SETTINGS_SEEDED.load(Ordering::Acquire) {
        return ControlSettings::default();
    }

    ControlSettings {
        gains: PidGains {
            proportional: load_f32(&GAIN_P_BITS),
            integral: load_f32(&GAIN_I_BITS),
            derivative: load_f32(&GAIN_D_BITS),
        },
        interval_seconds: load_f32(&INTERVAL_BITS),
        travel_seconds: load_f32(&TRAVEL_BITS),
        hover_seconds: load_f32(&HOVER_BITS),
    }
}

/// Full-range travel seconds (`t1`) used by the valve driver.
pub fn travel_seconds() -> f32 {
    settings().travel_seconds
}

/// Records the control-strategy state.
pub fn record_control_state(state: ControlState) {
    CONTROL_STATE.store(control_state_code(state), Ordering::Relaxed);
}

/// Records the valve-motion state.
pub fn record_valve_state(state: MotionState) {
    VALVE_STATE.store(valve_state_code(state), Ordering::Relaxed);
}

/// Marks whether a movement is currently in flight.
pub fn set_moving(moving: bool) {
    MOVING.store(moving, Ordering::Relaxed);
}

/// Builds a [`StatusSnapshot`] from the stored cells.
pub fn snapshot() -> StatusSnapshot {
    StatusSnapshot {
        control_state: control_state_from_code(CONTROL_STATE.load(Ordering::Relaxed)),
        valve_state: valve_state_from_code(VALVE_STATE.load(Ordering::Relaxed)),
        time_pct: position(),
        flow_pct: load_f32(&FLOW_BITS),
        target_lwt: load_f32(&TARGET_LWT_BITS),
        moving: MOVING.load(Ordering::Relaxed),
    }
}

const fn control_state_code(state: ControlState) -> u8 {
    match state {
        ControlState::Initializing => 0,
        ControlState::Dormant => 1,
        ControlState::MovingToStartupHover => 2,
        ControlState::StartupHover => 3,
        ControlState::MovingToFullSend => 4,
        ControlState::Active => 5,
    }
}

const fn control_state_from_code(code: u8) -> ControlState {
    match code {
        1 => ControlState::Dormant,
        2 => ControlState::MovingToStartupHover,
        3 => ControlState::StartupHover,
        4 => ControlState::MovingToFullSend,
        5 => ControlState::Active,
        _ => ControlState::Initializing,
    }
}

const fn valve_state_code(state: MotionState) -> u8 {
    match state {
        MotionState::FullySend => 0,
        MotionState::FullyKeep => 1,
        MotionState::KeepingMore => 2,
        MotionState::KeepingLess => 3,
        MotionState::SteadyBlend => 4,
    }
}

const fn valve_state_from_code(code: u8) -> MotionState {
    match code {
        1 => MotionState::FullyKeep,
        2 => MotionState::KeepingMore,
        3 => MotionState::KeepingLess,
        4 => MotionState::SteadyBlend,
        _ => MotionState::FullySend,
    }
}
