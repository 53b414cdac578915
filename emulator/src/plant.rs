//! First-order hydronic plant model.
//!
//! Good enough to exercise the controller: the heat pump adds `lift` over the
//! entering water temperature, the mixing valve blends recirculated water
//! with the cold distribution return, and lift ramps toward a mode-dependent
//! target while the heat pump prepares and runs.

use controller_core::controller::{HeatPumpState, Readings};

/// Lift reached while the heat pump is preparing, °F.
const PREPARING_LIFT: f32 = 8.0;

/// Lift reached at steady running output, °F.
const RUNNING_LIFT: f32 = 17.0;

/// Fraction of the remaining lift error closed per simulated second.
const LIFT_RAMP_RATE: f32 = 0.02;

/// Fraction of the remaining mix error the loop water closes per second.
const MIX_RATE: f32 = 0.05;

pub struct PlantSim {
    pub lwt: f32,
    pub ewt: f32,
    pub cold: f32,
    pub lift: f32,
    pub heat_pump: HeatPumpState,
    pub lwt_available: bool,
    pub ewt_available: bool,
    pub cold_available: bool,
}

impl PlantSim {
    /// A cold plant with the heat pump off.
    pub fn new() -> Self {
        Self {
            lwt: 70.0,
            ewt: 70.0,
            cold: 70.0,
            lift: 0.0,
            heat_pump: HeatPumpState::Off,
            lwt_available: true,
            ewt_available: true,
            cold_available: true,
        }
    }

    /// Advances the model by `dt` seconds with the valve at `keep_fraction`.
    pub fn step(&mut self, dt: f32, keep_fraction: f32) {
        let lift_target = match self.heat_pump {
            HeatPumpState::Off => 0.0,
            HeatPumpState::Preparing => PREPARING_LIFT,
            HeatPumpState::On => RUNNING_LIFT,
        };
        self.lift += (lift_target - self.lift) * (LIFT_RAMP_RATE * dt).min(1.0);

        let mixed_return = keep_fraction * self.lwt + (1.0 - keep_fraction) * self.cold;
        self.ewt += (mixed_return - self.ewt) * (MIX_RATE * dt).min(1.0);
        self.lwt = self.ewt + self.lift;
    }

    /// Readings as the controller would receive them.
    pub fn readings(&self) -> Readings {
        Readings {
            lwt: self.lwt_available.then_some(self.lwt),
            ewt: self.ewt_available.then_some(self.ewt),
            cold: self.cold_available.then_some(self.cold),
        }
    }
}

impl Default for PlantSim {
    fn default() -> Self {
        Self::new()
    }
}
