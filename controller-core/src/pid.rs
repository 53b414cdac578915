//! PID controller for the leaving-water-temperature loop.
//!
//! Runs once per configured control interval, only while the strategy machine
//! is in `Active`. The computed flow-percent correction is converted to a
//! time-percent command through the calibration curve and clamped to the
//! travel physically possible in one interval. Missing inputs are control
//! faults: the step returns an error and the caller fails safe instead of
//! applying a stale or guessed correction.

use crate::calibration::CalibrationCurve;
use crate::telemetry::TelemetryInstant;

/// Anti-windup clamp applied to the error integral, in °F·s.
pub const ERROR_INTEGRAL_LIMIT: f32 = 100.0;

/// PID gain set.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PidGains {
    pub proportional: f32,
    pub integral: f32,
    pub derivative: f32,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            proportional: 0.4,
            integral: 0.01,
            derivative: 0.0,
        }
    }
}

/// Externally settable control parameters.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ControlSettings {
    pub gains: PidGains,
    /// Seconds between PID steps.
    pub interval_seconds: f32,
    /// `t1`: seconds of drive for the full valve range.
    pub travel_seconds: f32,
    /// `t2`: seconds of drive from fully-send that yields the startup hover
    /// position. Must not exceed `t1`.
    pub hover_seconds: f32,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            gains: PidGains::default(),
            interval_seconds: 30.0,
            travel_seconds: 70.0,
            hover_seconds: 60.0,
        }
    }
}

/// Errors reported while validating control parameters.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SettingsError {
    NonPositiveInterval,
    NonPositiveTravel,
    HoverOutsideTravel,
}

impl ControlSettings {
    /// Validates the parameter set before it replaces the live one.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.interval_seconds.is_nan() || self.interval_seconds <= 0.0 {
            return Err(SettingsError::NonPositiveInterval);
        }
        if self.travel_seconds.is_nan() || self.travel_seconds <= 0.0 {
            return Err(SettingsError::NonPositiveTravel);
        }
        if self.hover_seconds.is_nan()
            || self.hover_seconds < 0.0
            || self.hover_seconds > self.travel_seconds
        {
            return Err(SettingsError::HoverOutsideTravel);
        }
        Ok(())
    }

    /// Startup hover position in time percent.
    #[must_use]
    pub fn hover_time_pct(&self) -> f32 {
        100.0 * self.hover_seconds / self.travel_seconds
    }

    /// Largest time-percent change achievable within one control interval.
    #[must_use]
    pub fn max_step_pct(&self) -> f32 {
        100.0 * self.interval_seconds / self.travel_seconds
    }
}

/// Strategy scaling the summed PID terms before they become a flow correction.
///
/// The reference plant ran with unity sensitivity; a lift-proportional model
/// exists but its derivation was never verified, so the divisor stays
/// pluggable rather than fixed.
pub trait SensitivityModel {
    /// Returns the divisor for the given lift and keep fraction, or `None`
    /// when the model cannot produce one (a control fault).
    fn sensitivity(&self, lift: f32, keep_fraction: f32) -> Option<f32>;
}

/// Constant unity sensitivity.
#[derive(Copy, Clone, Debug, Default)]
pub struct UnitySensitivity;

impl SensitivityModel for UnitySensitivity {
    fn sensitivity(&self, _lift: f32, _keep_fraction: f32) -> Option<f32> {
        Some(1.0)
    }
}

/// Lift-proportional sensitivity, `lift / (1 - k)²`.
#[derive(Copy, Clone, Debug, Default)]
pub struct LiftSensitivity;

impl SensitivityModel for LiftSensitivity {
    fn sensitivity(&self, lift: f32, keep_fraction: f32) -> Option<f32> {
        let send_fraction = 1.0 - keep_fraction;
        if lift <= 0.0 || send_fraction <= 1.0e-3 {
            return None;
        }
        Some(lift / (send_fraction * send_fraction))
    }
}

/// Inputs sampled for one PID step.
#[derive(Copy, Clone, Debug)]
pub struct PidInputs<TInstant> {
    pub target_lwt: f32,
    pub lwt: Option<f32>,
    pub ewt: Option<f32>,
    /// Current flow percent, derived from the position estimate.
    pub flow_pct: f32,
    /// Current time-percent position estimate.
    pub time_pct: f32,
    pub now: TInstant,
}

/// Faults that abort a PID step.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PidFault {
    MissingLwt,
    MissingEwt,
    SensitivityUnavailable,
}

/// Result of a successful PID step.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PidStep {
    /// Commanded time-percent position, already clamped to the interval's
    /// maximum travel.
    pub target_time_pct: f32,
    pub error: f32,
    pub proportional: f32,
    pub integral: f32,
    pub derivative: f32,
    pub flow_correction: f32,
}

/// PID state carried between steps.
#[derive(Copy, Clone, Debug)]
pub struct PidController<TInstant, S = UnitySensitivity> {
    model: S,
    error_integral: f32,
    last: Option<(f32, TInstant)>,
}

impl<TInstant, S> PidController<TInstant, S>
where
    TInstant: Copy + TelemetryInstant,
    S: SensitivityModel,
{
    /// Creates a controller around the given sensitivity model.
    #[must_use]
    pub const fn new(model: S) -> Self {
        Self {
            model,
            error_integral: 0.0,
            last: None,
        }
    }

    /// Clears the accumulated memory, as when leaving closed-loop control.
    pub fn reset(&mut self) {
        self.error_integral = 0.0;
        self.last = None;
    }

    /// Runs one PID step.
    ///
    /// On a fault nothing is committed: the integral and the derivative
    /// memory keep their previous values so a later recovery does not see a
    /// poisoned history.
    pub fn step(
        &mut self,
        inputs: &PidInputs<TInstant>,
        settings: &ControlSettings,
        curve: &CalibrationCurve,
    ) -> Result<PidStep, PidFault> {
        let lwt = inputs.lwt.ok_or(PidFault::MissingLwt)?;
        let ewt = inputs.ewt.ok_or(PidFault::MissingEwt)?;

        let error = inputs.target_lwt - lwt;
        let lift = (lwt - ewt).max(0.0);

        let proportional = settings.gains.proportional * error;

        let derivative = match self.last {
            Some((last_error, last_at)) => {
                let dt = inputs.now.saturating_duration_since(last_at).as_secs_f32();
                if dt > 0.0 {
                    settings.gains.derivative * (error - last_error) / dt
                } else {
                    0.0
                }
            }
            None => 0.0,
        };

        let integral_next = (self.error_integral + error * settings.interval_seconds)
            .clamp(-ERROR_INTEGRAL_LIMIT, ERROR_INTEGRAL_LIMIT);
        let integral = settings.gains.integral * integral_next;

        let keep_fraction = inputs.flow_pct / 100.0;
        let sensitivity = self
            .model
            .sensitivity(lift, keep_fraction)
            .filter(|value| *value > 0.0)
            .ok_or(PidFault::SensitivityUnavailable)?;

        self.error_integral = integral_next;
        self.last = Some((error, inputs.now));

        let flow_correction = (proportional + integral + derivative) / sensitivity;
        let target_flow = (inputs.flow_pct + flow_correction).clamp(0.0, 100.0);

        let max_step = settings.max_step_pct();
        let delta =
            (curve.time_from_flow(target_flow) - inputs.time_pct).clamp(-max_step, max_step);

        Ok(PidStep {
            target_time_pct: (inputs.time_pct + delta).clamp(0.0, 100.0),
            error,
            proportional,
            integral,
            derivative,
            flow_correction,
        })
    }
}

impl<TInstant> Default for PidController<TInstant, UnitySensitivity>
where
    TInstant: Copy + TelemetryInstant,
{
    fn default() -> Self {
        Self::new(UnitySensitivity)
    }
}
