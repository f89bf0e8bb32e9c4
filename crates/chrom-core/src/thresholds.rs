//! Stability thresholds and per-stage sensor constraints.

use crate::error::{ChromError, ChromResult};
use crate::reading::SensorKind;
use crate::stage::ProcessStage;
use serde::{Deserialize, Serialize};

/// Stability thresholds for one scalar sensor.
///
/// A window is stable when `std / |mean| < relative` (or `std < absolute`
/// when `|mean| < 1`), and, with at least five points, when the least-squares
/// slope over sample index is below `slope` in magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorThresholds {
    pub relative: f64,
    pub absolute: f64,
    pub slope: f64,
}

impl SensorThresholds {
    pub const fn new(relative: f64, absolute: f64, slope: f64) -> Self {
        Self {
            relative,
            absolute,
            slope,
        }
    }

    fn validate(&self, sensor: SensorKind) -> ChromResult<()> {
        let all_positive = [self.relative, self.absolute, self.slope]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0);
        if all_positive {
            Ok(())
        } else {
            Err(ChromError::Configuration(format!(
                "{sensor} thresholds must be positive: {self:?}"
            )))
        }
    }
}

/// Thresholds for the three chemical sensors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdProfile {
    pub ph: SensorThresholds,
    pub orp: SensorThresholds,
    pub conductivity: SensorThresholds,
}

impl Default for ThresholdProfile {
    fn default() -> Self {
        Self {
            ph: SensorThresholds::new(0.03, 0.02, 0.005),
            orp: SensorThresholds::new(0.08, 5.0, 0.1),
            conductivity: SensorThresholds::new(0.05, 1.0, 0.05),
        }
    }
}

impl ThresholdProfile {
    /// Thresholds for a chemical sensor. `Level` has none.
    pub fn get(&self, kind: SensorKind) -> Option<&SensorThresholds> {
        match kind {
            SensorKind::Ph => Some(&self.ph),
            SensorKind::Orp => Some(&self.orp),
            SensorKind::Conductivity => Some(&self.conductivity),
            SensorKind::Level => None,
        }
    }

    pub fn validate(&self) -> ChromResult<()> {
        self.ph.validate(SensorKind::Ph)?;
        self.orp.validate(SensorKind::Orp)?;
        self.conductivity.validate(SensorKind::Conductivity)
    }
}

/// Inclusive range a sensor value must lie in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorRange {
    pub min: f64,
    pub max: f64,
}

impl SensorRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }
}

/// Optional ranges for the chemical sensors during one stage.
///
/// An absent range leaves that sensor unconstrained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ph: Option<SensorRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orp: Option<SensorRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conductivity: Option<SensorRange>,
}

impl SensorConstraints {
    pub fn get(&self, kind: SensorKind) -> Option<&SensorRange> {
        match kind {
            SensorKind::Ph => self.ph.as_ref(),
            SensorKind::Orp => self.orp.as_ref(),
            SensorKind::Conductivity => self.conductivity.as_ref(),
            SensorKind::Level => None,
        }
    }

    fn validate(&self, stage: ProcessStage) -> ChromResult<()> {
        for kind in SensorKind::CHEMICAL {
            if let Some(range) = self.get(kind) {
                if !(range.min.is_finite() && range.max.is_finite() && range.min <= range.max) {
                    return Err(ChromError::Configuration(format!(
                        "{stage} {kind} range is invalid: [{}, {}]",
                        range.min, range.max
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Constraints for the equilibration-type stages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConstraints {
    pub equilibrate: SensorConstraints,
    pub refresh: SensorConstraints,
}

impl Default for StageConstraints {
    fn default() -> Self {
        Self {
            equilibrate: SensorConstraints {
                ph: Some(SensorRange::new(4.8, 7.5)),
                orp: None,
                conductivity: Some(SensorRange::new(0.0, 1.0)),
            },
            refresh: SensorConstraints {
                ph: Some(SensorRange::new(5.0, 7.5)),
                orp: None,
                conductivity: Some(SensorRange::new(0.0, 1.0)),
            },
        }
    }
}

impl StageConstraints {
    /// Constraints for `stage`, `None` for stages without an entry.
    pub fn for_stage(&self, stage: ProcessStage) -> Option<&SensorConstraints> {
        match stage {
            ProcessStage::Equilibrate => Some(&self.equilibrate),
            ProcessStage::Refresh => Some(&self.refresh),
            _ => None,
        }
    }

    pub fn validate(&self) -> ChromResult<()> {
        self.equilibrate.validate(ProcessStage::Equilibrate)?;
        self.refresh.validate(ProcessStage::Refresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_constraints() {
        let constraints = StageConstraints::default();
        let eq = constraints.for_stage(ProcessStage::Equilibrate).unwrap();
        assert!(eq.get(SensorKind::Ph).unwrap().contains(4.8));
        assert!(!eq.get(SensorKind::Ph).unwrap().contains(7.6));
        assert!(eq.get(SensorKind::Orp).is_none());
        assert!(constraints.for_stage(ProcessStage::Feed).is_none());
    }

    #[test]
    fn test_threshold_validation() {
        let mut profile = ThresholdProfile::default();
        assert!(profile.validate().is_ok());
        profile.orp.slope = 0.0;
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_inverted_range_rejected() {
        let mut constraints = StageConstraints::default();
        constraints.refresh.conductivity = Some(SensorRange::new(2.0, 1.0));
        assert!(constraints.validate().is_err());
    }

    #[test]
    fn test_partial_profile_from_toml() {
        let profile: ThresholdProfile = toml::from_str(
            r#"
            [orp]
            relative = 0.1
            absolute = 4.0
            slope = 0.2
            "#,
        )
        .unwrap();
        assert_eq!(profile.orp.absolute, 4.0);
        assert_eq!(profile.ph, ThresholdProfile::default().ph);
    }
}
