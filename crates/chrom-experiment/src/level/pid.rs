//! Positional PID with integral separation and filtered derivative.

use super::{ControlError, LevelController};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PidParams {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub output_min: f64,
    pub output_max: f64,
    /// Integral accumulates only while `|error|` is below this.
    pub integral_threshold: f64,
    /// Low-pass coefficient for the derivative term, in `(0, 1]`.
    pub derivative_alpha: f64,
}

impl Default for PidParams {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.05,
            kd: 0.05,
            output_min: 0.0,
            output_max: 400.0,
            integral_threshold: 30.0,
            derivative_alpha: 0.2,
        }
    }
}

impl PidParams {
    pub fn validate(&self) -> Result<(), ControlError> {
        for (name, gain) in [("kp", self.kp), ("ki", self.ki), ("kd", self.kd)] {
            if !(gain.is_finite() && gain >= 0.0) {
                return Err(ControlError::InvalidGain { name, value: gain });
            }
        }
        if !(self.output_min.is_finite() && self.output_max.is_finite())
            || self.output_min >= self.output_max
        {
            return Err(ControlError::InvalidOutputRange {
                min: self.output_min,
                max: self.output_max,
            });
        }
        if !(self.integral_threshold.is_finite() && self.integral_threshold > 0.0) {
            return Err(ControlError::InvalidParameter(format!(
                "integral_threshold must be positive, got {}",
                self.integral_threshold
            )));
        }
        if !(self.derivative_alpha > 0.0 && self.derivative_alpha <= 1.0) {
            return Err(ControlError::InvalidParameter(format!(
                "derivative_alpha must be in (0, 1], got {}",
                self.derivative_alpha
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PidController {
    params: PidParams,
    target: f64,
    integral: f64,
    derivative_filtered: f64,
    prev_measurement: Option<f64>,
}

impl PidController {
    pub fn new(params: PidParams) -> Result<Self, ControlError> {
        params.validate()?;
        Ok(Self {
            params,
            target: 0.0,
            integral: 0.0,
            derivative_filtered: 0.0,
            prev_measurement: None,
        })
    }

    pub fn params(&self) -> &PidParams {
        &self.params
    }
}

impl LevelController for PidController {
    fn set_target(&mut self, target: f64) {
        self.target = target;
        self.integral = 0.0;
        self.derivative_filtered = 0.0;
        self.prev_measurement = None;
    }

    fn compute(&mut self, measurement: f64) -> f64 {
        let p = &self.params;
        let error = self.target - measurement;

        if error.abs() < p.integral_threshold {
            self.integral += error;
        } else {
            self.integral *= 0.9;
        }

        // Derivative on measurement avoids a kick when the target moves.
        let raw = self
            .prev_measurement
            .map_or(0.0, |prev| measurement - prev);
        self.derivative_filtered =
            (1.0 - p.derivative_alpha) * self.derivative_filtered + p.derivative_alpha * raw;
        self.prev_measurement = Some(measurement);

        let mut output =
            p.kp * error + p.ki * self.integral - p.kd * self.derivative_filtered;

        if output > p.output_max {
            output = p.output_max;
            if error > 0.0 {
                self.integral -= error;
            }
        } else if output < p.output_min {
            output = p.output_min;
            if error < 0.0 {
                self.integral -= error;
            }
        }
        output
    }

    fn name(&self) -> &'static str {
        "pid"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        assert!(PidParams::default().validate().is_ok());
    }

    #[test]
    fn test_inverted_range_rejected() {
        let params = PidParams {
            output_min: 10.0,
            output_max: 5.0,
            ..PidParams::default()
        };
        assert!(matches!(
            PidController::new(params),
            Err(ControlError::InvalidOutputRange { .. })
        ));
    }

    #[test]
    fn test_first_step_has_no_derivative_kick() {
        let mut pid = PidController::new(PidParams {
            kp: 0.0,
            ki: 0.0,
            kd: 10.0,
            ..PidParams::default()
        })
        .unwrap();
        pid.set_target(500.0);
        assert_eq!(pid.compute(480.0), 0.0);
    }

    #[test]
    fn test_large_error_decays_integral() {
        let mut pid = PidController::new(PidParams {
            kp: 0.0,
            ki: 1.0,
            kd: 0.0,
            ..PidParams::default()
        })
        .unwrap();
        pid.set_target(500.0);
        let first = pid.compute(490.0);
        assert!((first - 10.0).abs() < 1e-12);
        let decayed = pid.compute(400.0);
        assert!((decayed - 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_output_clamped() {
        let mut pid = PidController::new(PidParams::default()).unwrap();
        pid.set_target(1000.0);
        assert_eq!(pid.compute(0.0), 400.0);
        pid.set_target(0.0);
        assert_eq!(pid.compute(1000.0), 0.0);
    }
}
