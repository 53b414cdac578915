//! Actuator calibration model for the mixing valve.
//!
//! The valve carries no position sensor, so the controller models position as
//! cumulative drive time ("time percent") and maps it to the actual hydraulic
//! blend ("flow percent") through a piecewise-linear calibration table. The
//! table is strictly increasing in both axes; lookups outside its domain
//! saturate rather than extrapolate. The module also hosts the steady-state
//! heat-balance solver used to size the startup position.

use heapless::Vec;

/// Maximum number of knots a calibration table may carry.
pub const MAX_CALIBRATION_KNOTS: usize = 8;

/// One knot of the drive-time-to-flow calibration table.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CalibrationPoint {
    /// Position estimate derived from cumulative drive time, percent keep.
    pub time_pct: f32,
    /// Hydraulic blend fraction observed at that position, percent keep.
    pub flow_pct: f32,
}

impl CalibrationPoint {
    /// Creates a new calibration knot.
    #[must_use]
    pub const fn new(time_pct: f32, flow_pct: f32) -> Self {
        Self { time_pct, flow_pct }
    }
}

/// Default table measured on the reference valve (70 s full-range drive).
pub const DEFAULT_CALIBRATION: [CalibrationPoint; 5] = [
    CalibrationPoint::new(13.0, 0.0),
    CalibrationPoint::new(30.0, 18.0),
    CalibrationPoint::new(50.0, 46.0),
    CalibrationPoint::new(72.0, 78.0),
    CalibrationPoint::new(96.0, 100.0),
];

/// Errors reported while validating a calibration table.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CalibrationError {
    /// A table needs at least two knots to interpolate between.
    TooFewKnots,
    /// More knots than [`MAX_CALIBRATION_KNOTS`].
    TooManyKnots,
    /// The knot at `index` does not increase in both axes over its predecessor.
    NonMonotonic { index: usize },
    /// The first knot must map to flow 0 and the last to flow 100.
    BadEndpoints,
}

/// Validated piecewise-linear map between time percent and flow percent.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationCurve {
    knots: Vec<CalibrationPoint, MAX_CALIBRATION_KNOTS>,
}

impl CalibrationCurve {
    /// Builds a curve from an ordered knot list, validating the invariants.
    pub fn new(points: &[CalibrationPoint]) -> Result<Self, CalibrationError> {
        if points.len() < 2 {
            return Err(CalibrationError::TooFewKnots);
        }

        for (index, pair) in points.windows(2).enumerate() {
            if pair[1].time_pct <= pair[0].time_pct || pair[1].flow_pct <= pair[0].flow_pct {
                return Err(CalibrationError::NonMonotonic { index: index + 1 });
            }
        }

        let first = points[0];
        let last = points[points.len() - 1];
        if first.flow_pct != 0.0 || last.flow_pct != 100.0 {
            return Err(CalibrationError::BadEndpoints);
        }

        let mut knots = Vec::new();
        knots
            .extend_from_slice(points)
            .map_err(|_| CalibrationError::TooManyKnots)?;

        Ok(Self { knots })
    }

    /// Returns the validated knot list.
    pub fn knots(&self) -> &[CalibrationPoint] {
        &self.knots
    }

    /// Maps a time-percent position to the hydraulic flow percent.
    ///
    /// Saturates to 0 below the first knot and 100 above the last.
    pub fn flow_from_time(&self, time_pct: f32) -> f32 {
        let first = self.knots[0];
        let last = self.knots[self.knots.len() - 1];

        if time_pct <= first.time_pct {
            return first.flow_pct;
        }
        if time_pct >= last.time_pct {
            return last.flow_pct;
        }

        for pair in self.knots.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            if time_pct <= hi.time_pct {
                let frac = (time_pct - lo.time_pct) / (hi.time_pct - lo.time_pct);
                return lo.flow_pct + frac * (hi.flow_pct - lo.flow_pct);
            }
        }

        last.flow_pct
    }

    /// Maps a flow percent back to the time-percent position that produces it.
    ///
    /// Saturates to the first knot's time below flow 0 and the last knot's
    /// time above flow 100, the inverse of [`Self::flow_from_time`] over the
    /// table's time domain.
    pub fn time_from_flow(&self, flow_pct: f32) -> f32 {
        let first = self.knots[0];
        let last = self.knots[self.knots.len() - 1];

        if flow_pct <= first.flow_pct {
            return first.time_pct;
        }
        if flow_pct >= last.flow_pct {
            return last.time_pct;
        }

        for pair in self.knots.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            if flow_pct <= hi.flow_pct {
                let frac = (flow_pct - lo.flow_pct) / (hi.flow_pct - lo.flow_pct);
                return lo.time_pct + frac * (hi.time_pct - lo.time_pct);
            }
        }

        last.time_pct
    }
}

impl Default for CalibrationCurve {
    fn default() -> Self {
        Self::new(&DEFAULT_CALIBRATION).expect("default calibration table is valid")
    }
}

/// Solves the steady-state heat balance for the keep fraction.
///
/// With `k` the recirculated fraction, steady state satisfies
/// `target = k * target + (1 - k) * cold_temp + lift`, giving
/// `k = 1 - lift / (target - cold_temp)`. Returns `None` when
/// `target_lwt - cold_temp <= 0`, in which case the caller cannot size the
/// startup position and must fall back to a fixed default.
pub fn equilibrium_flow_percent(lift: f32, target_lwt: f32, cold_temp: f32) -> Option<f32> {
    let headroom = target_lwt - cold_temp;
    if headroom <= 0.0 {
        return None;
    }

    let keep_fraction = 1.0 - lift / headroom;
    Some(keep_fraction.clamp(0.0, 1.0) * 100.0)
}
