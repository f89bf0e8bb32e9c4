//! Mamdani fuzzy controller producing incremental pump speed changes.
//!
//! Inputs are the level error `E = measurement - target` (mm) and its
//! filtered rate of change `EC` (mm/s). The rule table maps them to a speed
//! increment `ΔU` (rpm) which is added to the previous command.
//!
//! Inference: min conjunction, min implication, max aggregation, centroid
//! defuzzification over `[-20, 20]`.

use super::{ControlError, LevelController};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ERROR_LIMIT: f64 = 500.0;
const RATE_LIMIT: f64 = 20.0;
const DELTA_MIN: f64 = -20.0;
const DELTA_MAX: f64 = 20.0;
const CENTROID_RESOLUTION: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Membership {
    Triangle(f64, f64, f64),
    Trapezoid(f64, f64, f64, f64),
}

impl Membership {
    fn degree(&self, x: f64) -> f64 {
        match *self {
            Membership::Triangle(a, b, c) => {
                if x < a || x > c {
                    0.0
                } else if x == b {
                    1.0
                } else if x < b {
                    (x - a) / (b - a)
                } else {
                    (c - x) / (c - b)
                }
            }
            Membership::Trapezoid(a, b, c, d) => {
                if x < a || x > d {
                    0.0
                } else if x < b {
                    (x - a) / (b - a)
                } else if x <= c {
                    1.0
                } else if x < d {
                    (d - x) / (d - c)
                } else {
                    0.0
                }
            }
        }
    }
}

// Error terms: NB NM NS Z PS PM PB
const ERROR_TERMS: [Membership; 7] = [
    Membership::Trapezoid(-600.0, -600.0, -30.0, -20.0),
    Membership::Triangle(-30.0, -20.0, -10.0),
    Membership::Triangle(-15.0, -8.0, 0.0),
    Membership::Triangle(-3.0, 0.0, 3.0),
    Membership::Triangle(0.0, 8.0, 15.0),
    Membership::Triangle(10.0, 20.0, 30.0),
    Membership::Trapezoid(20.0, 30.0, 600.0, 600.0),
];

// Rate terms: NB NS Z PS PB
const RATE_TERMS: [Membership; 5] = [
    Membership::Trapezoid(-30.0, -30.0, -10.0, -5.0),
    Membership::Triangle(-6.0, -3.0, 0.0),
    Membership::Triangle(-1.0, 0.0, 1.0),
    Membership::Triangle(0.0, 3.0, 6.0),
    Membership::Trapezoid(5.0, 10.0, 30.0, 30.0),
];

// Output terms
const LD: usize = 0;
const SD: usize = 1;
const NC: usize = 2;
const SI: usize = 3;
const LI: usize = 4;

const DELTA_TERMS: [Membership; 5] = [
    Membership::Trapezoid(-30.0, -30.0, -20.0, -10.0),
    Membership::Triangle(-15.0, -8.0, -2.0),
    Membership::Triangle(-3.0, 0.0, 3.0),
    Membership::Triangle(2.0, 8.0, 15.0),
    Membership::Trapezoid(10.0, 20.0, 30.0, 30.0),
];

/// `RULES[error_term][rate_term]` is the output term index.
///
/// Negative error means the surface sits above target (gauge distance too
/// short), so the outlet speeds up; positive error slows it down.
const RULES: [[usize; 5]; 7] = [
    [LI, LI, SI, SI, NC],
    [LI, SI, SI, NC, SD],
    [SI, SI, NC, NC, SD],
    [SI, NC, NC, NC, SD],
    [NC, NC, NC, SD, LD],
    [NC, NC, SD, LD, LD],
    [SD, SD, LD, LD, LD],
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FuzzyParams {
    /// Upper bound of the speed command, rpm.
    pub max_speed: f64,
    /// EMA weight of the newest rate sample.
    pub rate_alpha: f64,
}

impl Default for FuzzyParams {
    fn default() -> Self {
        Self {
            max_speed: 150.0,
            rate_alpha: 0.3,
        }
    }
}

impl FuzzyParams {
    pub fn validate(&self) -> Result<(), ControlError> {
        if !(self.max_speed.is_finite() && self.max_speed > 0.0) {
            return Err(ControlError::InvalidOutputRange {
                min: 0.0,
                max: self.max_speed,
            });
        }
        if !(self.rate_alpha > 0.0 && self.rate_alpha <= 1.0) {
            return Err(ControlError::InvalidParameter(format!(
                "rate_alpha must be in (0, 1], got {}",
                self.rate_alpha
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FuzzyController {
    params: FuzzyParams,
    /// Sample period used to turn level differences into a rate.
    period_secs: f64,
    target: f64,
    last_level: Option<f64>,
    filtered_rate: f64,
    last_speed: f64,
}

impl FuzzyController {
    pub fn new(params: FuzzyParams, period: Duration) -> Result<Self, ControlError> {
        params.validate()?;
        if period.is_zero() {
            return Err(ControlError::InvalidParameter(
                "control period must be non-zero".to_string(),
            ));
        }
        Ok(Self {
            params,
            period_secs: period.as_secs_f64(),
            target: 0.0,
            last_level: None,
            filtered_rate: 0.0,
            last_speed: 0.0,
        })
    }

    /// Centroid of the aggregated output set, 0 when no rule fires.
    fn infer(error: f64, rate: f64) -> f64 {
        let mut strength = [0.0_f64; 5];
        for (i, e_term) in ERROR_TERMS.iter().enumerate() {
            let e_deg = e_term.degree(error);
            if e_deg == 0.0 {
                continue;
            }
            for (j, r_term) in RATE_TERMS.iter().enumerate() {
                let firing = e_deg.min(r_term.degree(rate));
                let out = RULES[i][j];
                strength[out] = strength[out].max(firing);
            }
        }

        let step = (DELTA_MAX - DELTA_MIN) / CENTROID_RESOLUTION as f64;
        let mut area = 0.0;
        let mut moment = 0.0;
        for k in 0..CENTROID_RESOLUTION {
            let x = DELTA_MIN + (k as f64 + 0.5) * step;
            let mu = DELTA_TERMS
                .iter()
                .zip(strength.iter())
                .map(|(term, s)| s.min(term.degree(x)))
                .fold(0.0_f64, f64::max);
            area += mu;
            moment += mu * x;
        }
        if area > 0.0 {
            moment / area
        } else {
            0.0
        }
    }
}

impl LevelController for FuzzyController {
    fn set_target(&mut self, target: f64) {
        self.target = target;
        self.last_level = None;
        self.filtered_rate = 0.0;
        self.last_speed = 0.0;
    }

    /// A zero period is ignored.
    fn set_period(&mut self, period: Duration) {
        if !period.is_zero() {
            self.period_secs = period.as_secs_f64();
        }
    }

    fn compute(&mut self, measurement: f64) -> f64 {
        let error = (measurement - self.target).clamp(-ERROR_LIMIT, ERROR_LIMIT);

        if let Some(last) = self.last_level {
            let rate = (measurement - last) / self.period_secs;
            let alpha = self.params.rate_alpha;
            self.filtered_rate = alpha * rate + (1.0 - alpha) * self.filtered_rate;
        }
        self.last_level = Some(measurement);

        let rate = self.filtered_rate.clamp(-RATE_LIMIT, RATE_LIMIT);
        let delta = Self::infer(error, rate);
        self.last_speed = (self.last_speed + delta).clamp(0.0, self.params.max_speed);
        self.last_speed
    }

    fn name(&self) -> &'static str {
        "fuzzy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memberships() {
        let tri = Membership::Triangle(-3.0, 0.0, 3.0);
        assert_eq!(tri.degree(0.0), 1.0);
        assert_eq!(tri.degree(1.5), 0.5);
        assert_eq!(tri.degree(-3.0), 0.0);
        let trap = Membership::Trapezoid(20.0, 30.0, 600.0, 600.0);
        assert_eq!(trap.degree(25.0), 0.5);
        assert_eq!(trap.degree(500.0), 1.0);
        assert_eq!(trap.degree(600.0), 1.0);
        assert_eq!(trap.degree(601.0), 0.0);
    }

    #[test]
    fn test_settled_input_gives_no_change() {
        let delta = FuzzyController::infer(0.0, 0.0);
        assert!(delta.abs() < 1e-9, "delta {delta}");
    }

    #[test]
    fn test_surface_too_high_speeds_up() {
        assert!(FuzzyController::infer(-100.0, 0.0) > 5.0);
        assert!(FuzzyController::infer(100.0, 0.0) < -5.0);
    }

    #[test]
    fn test_speed_bounded() {
        let mut ctl = FuzzyController::new(FuzzyParams::default(), Duration::from_secs(1)).unwrap();
        ctl.set_target(500.0);
        for _ in 0..100 {
            let speed = ctl.compute(100.0);
            assert!((0.0..=150.0).contains(&speed));
        }
        assert_eq!(ctl.compute(100.0), 150.0);
        ctl.set_target(0.0);
        assert_eq!(ctl.compute(1000.0), 0.0);
    }

    #[test]
    fn test_zero_period_rejected() {
        assert!(FuzzyController::new(FuzzyParams::default(), Duration::ZERO).is_err());
    }

    #[test]
    fn test_period_update_matches_rebuild() {
        let slow = Duration::from_secs(10);
        let mut rebuilt = FuzzyController::new(FuzzyParams::default(), slow).unwrap();
        let mut updated = FuzzyController::new(FuzzyParams::default(), Duration::from_secs(1)).unwrap();
        updated.set_period(slow);
        updated.set_period(Duration::ZERO);
        rebuilt.set_target(250.0);
        updated.set_target(250.0);
        for level in [250.0, 262.0, 275.0, 270.0, 255.0] {
            assert_eq!(rebuilt.compute(level), updated.compute(level));
        }
        assert_eq!(updated.period_secs, 10.0);
    }
}
