#![no_std]

// Shared logic for the mixing-valve LWT controller.
//
// This crate stays portable across MCU firmware and host tooling by avoiding
// the Rust standard library and exposing abstractions the other crates can
// adopt. Everything that can be exercised without hardware lives here: the
// actuator calibration model, both state machines, the PID loop, movement
// planning, the control-loop driver, the console grammar, and the telemetry
// catalog.

pub mod calibration;
pub mod console;
pub mod controller;
pub mod motion;
pub mod movement;
pub mod pid;
pub mod strategy;
pub mod telemetry;
