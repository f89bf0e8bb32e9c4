//! Live-tunable experiment settings.
//!
//! The same structs are deserialized from the configuration file sections
//! and then published to the running tasks through a `watch` channel.
//! [`ParameterUpdate`] is the unit of live reconfiguration.

use crate::level::{ControllerKind, FuzzyParams, PidParams};
use chrom_core::{
    window_capacity, ChromError, ChromResult, ProcessStage, RetryPolicy, SensorConstraints,
    SensorKind, SensorThresholds, StageConstraints, ThresholdProfile,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingSettings {
    /// Delay between ticks while an experiment runs.
    #[serde(with = "humantime_serde")]
    pub running_interval: Duration,
    /// Delay between ticks while idle.
    #[serde(with = "humantime_serde")]
    pub idle_interval: Duration,
    /// Time one acquisition cycle takes on top of the delay.
    #[serde(with = "humantime_serde")]
    pub acquisition_overhead: Duration,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            running_interval: Duration::from_secs(5),
            idle_interval: Duration::from_secs(600),
            acquisition_overhead: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EquilibriumSettings {
    /// Time span covered by the sliding windows.
    #[serde(with = "humantime_serde")]
    pub window_span: Duration,
    pub thresholds: ThresholdProfile,
    pub constraints: StageConstraints,
    /// Maximum relative standard deviation of PCA scores.
    pub spectral_threshold: f64,
    pub pca_components: usize,
    /// Minimum volume pumped before the detector is consulted.
    pub min_bed_volumes: f64,
    /// Added to the running interval to get the detector poll period.
    #[serde(with = "humantime_serde")]
    pub settle_margin: Duration,
}

impl Default for EquilibriumSettings {
    fn default() -> Self {
        Self {
            window_span: Duration::from_secs(20 * 60),
            thresholds: ThresholdProfile::default(),
            constraints: StageConstraints::default(),
            spectral_threshold: 0.001,
            pca_components: 5,
            min_bed_volumes: 1.5,
            settle_margin: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSettings {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    pub strategy: ControllerKind,
    pub pid: PidParams,
    pub fuzzy: FuzzyParams,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            strategy: ControllerKind::default(),
            pid: PidParams::default(),
            fuzzy: FuzzyParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSettings {
    /// Pause after initializing the hardware.
    #[serde(with = "humantime_serde")]
    pub settle_time: Duration,
    /// Countdown granularity of stage waits.
    #[serde(with = "humantime_serde")]
    pub wait_tick: Duration,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            settle_time: Duration::from_secs(5),
            wait_tick: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetySettings {
    pub retry_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
}

impl Default for SafetySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            retry_attempts: policy.max_attempts,
            retry_backoff: policy.backoff_delay,
        }
    }
}

impl SafetySettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            backoff_delay: self.retry_backoff,
        }
    }
}

// =============================================================================
// Aggregate
// =============================================================================

/// Everything the running tasks read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentSettings {
    pub sampling: SamplingSettings,
    pub equilibrium: EquilibriumSettings,
    pub control: ControlSettings,
    pub process: ProcessSettings,
    pub safety: SafetySettings,
}

fn non_zero(name: &str, value: Duration) -> ChromResult<()> {
    if value.is_zero() {
        Err(ChromError::Configuration(format!("{name} must be non-zero")))
    } else {
        Ok(())
    }
}

impl ExperimentSettings {
    pub fn validate(&self) -> ChromResult<()> {
        non_zero("sampling.running_interval", self.sampling.running_interval)?;
        non_zero("sampling.idle_interval", self.sampling.idle_interval)?;
        non_zero("equilibrium.window_span", self.equilibrium.window_span)?;
        non_zero("control.interval", self.control.interval)?;
        non_zero("process.wait_tick", self.process.wait_tick)?;
        if self.process.wait_tick > Duration::from_secs(1) {
            return Err(ChromError::Configuration(format!(
                "process.wait_tick must be at most 1s, got {:?}",
                self.process.wait_tick
            )));
        }

        let eq = &self.equilibrium;
        eq.thresholds.validate()?;
        eq.constraints.validate()?;
        if !(eq.spectral_threshold.is_finite() && eq.spectral_threshold > 0.0) {
            return Err(ChromError::Configuration(format!(
                "equilibrium.spectral_threshold must be positive, got {}",
                eq.spectral_threshold
            )));
        }
        if eq.pca_components == 0 {
            return Err(ChromError::Configuration(
                "equilibrium.pca_components must be at least 1".to_string(),
            ));
        }
        if !(eq.min_bed_volumes.is_finite() && eq.min_bed_volumes >= 0.0) {
            return Err(ChromError::Configuration(format!(
                "equilibrium.min_bed_volumes must be non-negative, got {}",
                eq.min_bed_volumes
            )));
        }

        self.control.pid.validate()?;
        self.control.fuzzy.validate()?;

        if self.safety.retry_attempts == 0 {
            return Err(ChromError::Configuration(
                "safety.retry_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Capacity of each sliding window for the current settings.
    pub fn window_capacity(&self) -> usize {
        window_capacity(
            self.equilibrium.window_span,
            self.sampling.running_interval,
            self.sampling.acquisition_overhead,
        )
    }

    /// Detector poll period during an equilibration wait.
    pub fn poll_interval(&self) -> Duration {
        self.sampling.running_interval + self.equilibrium.settle_margin
    }

    /// Return a copy with `update` applied, validated.
    pub fn with_update(&self, update: &ParameterUpdate) -> ChromResult<Self> {
        let mut next = self.clone();
        next.apply(update);
        next.validate()?;
        Ok(next)
    }

    fn apply(&mut self, update: &ParameterUpdate) {
        match update {
            ParameterUpdate::RunningInterval(v) => self.sampling.running_interval = *v,
            ParameterUpdate::IdleInterval(v) => self.sampling.idle_interval = *v,
            ParameterUpdate::ControlInterval(v) => self.control.interval = *v,
            ParameterUpdate::WindowSpan(v) => self.equilibrium.window_span = *v,
            ParameterUpdate::Thresholds { sensor, thresholds } => match sensor {
                SensorKind::Ph => self.equilibrium.thresholds.ph = *thresholds,
                SensorKind::Orp => self.equilibrium.thresholds.orp = *thresholds,
                SensorKind::Conductivity => self.equilibrium.thresholds.conductivity = *thresholds,
                SensorKind::Level => {}
            },
            ParameterUpdate::StageConstraints { stage, constraints } => match stage {
                ProcessStage::Equilibrate => self.equilibrium.constraints.equilibrate = *constraints,
                ProcessStage::Refresh => self.equilibrium.constraints.refresh = *constraints,
                _ => {}
            },
            ParameterUpdate::SpectralThreshold(v) => self.equilibrium.spectral_threshold = *v,
            ParameterUpdate::PcaComponents(v) => self.equilibrium.pca_components = *v,
            ParameterUpdate::Strategy(kind) => self.control.strategy = *kind,
        }
    }
}

// =============================================================================
// Live updates
// =============================================================================

/// One live parameter change.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterUpdate {
    RunningInterval(Duration),
    IdleInterval(Duration),
    ControlInterval(Duration),
    WindowSpan(Duration),
    Thresholds {
        sensor: SensorKind,
        thresholds: SensorThresholds,
    },
    StageConstraints {
        stage: ProcessStage,
        constraints: SensorConstraints,
    },
    SpectralThreshold(f64),
    PcaComponents(usize),
    /// Takes effect at the next run start.
    Strategy(ControllerKind),
}

impl ParameterUpdate {
    /// Structural checks not covered by [`ExperimentSettings::validate`].
    pub fn check(&self) -> ChromResult<()> {
        match self {
            ParameterUpdate::Thresholds {
                sensor: SensorKind::Level,
                ..
            } => Err(ChromError::Configuration(
                "level has no stability thresholds".to_string(),
            )),
            ParameterUpdate::StageConstraints { stage, .. } if !stage.is_equilibration() => {
                Err(ChromError::Configuration(format!(
                    "stage {stage} has no constraints"
                )))
            }
            _ => Ok(()),
        }
    }

    /// Parse a `key=value` pair as given on the command line.
    ///
    /// Durations use humantime syntax (`5s`, `20m`). Thresholds take
    /// `relative,absolute,slope`, e.g. `thresholds.ph=0.03,0.02,0.005`.
    pub fn parse(key: &str, value: &str) -> ChromResult<Self> {
        let bad = |what: &str| {
            ChromError::Configuration(format!("invalid value '{value}' for {key}: {what}"))
        };
        let duration = || {
            humantime_serde::re::humantime::parse_duration(value).map_err(|e| bad(&e.to_string()))
        };
        let float = || value.trim().parse::<f64>().map_err(|e| bad(&e.to_string()));

        match key {
            "running_interval" => Ok(ParameterUpdate::RunningInterval(duration()?)),
            "idle_interval" => Ok(ParameterUpdate::IdleInterval(duration()?)),
            "control_interval" => Ok(ParameterUpdate::ControlInterval(duration()?)),
            "window_span" => Ok(ParameterUpdate::WindowSpan(duration()?)),
            "spectral_threshold" => Ok(ParameterUpdate::SpectralThreshold(float()?)),
            "pca_components" => value
                .trim()
                .parse::<usize>()
                .map(ParameterUpdate::PcaComponents)
                .map_err(|e| bad(&e.to_string())),
            "strategy" => match value.trim() {
                "pid" => Ok(ParameterUpdate::Strategy(ControllerKind::Pid)),
                "fuzzy" => Ok(ParameterUpdate::Strategy(ControllerKind::Fuzzy)),
                _ => Err(bad("expected 'pid' or 'fuzzy'")),
            },
            _ => {
                let Some(sensor) = key.strip_prefix("thresholds.") else {
                    return Err(ChromError::Configuration(format!(
                        "unknown parameter '{key}'"
                    )));
                };
                let sensor = match sensor {
                    "ph" => SensorKind::Ph,
                    "orp" => SensorKind::Orp,
                    "conductivity" => SensorKind::Conductivity,
                    other => {
                        return Err(ChromError::Configuration(format!(
                            "unknown sensor '{other}'"
                        )))
                    }
                };
                let parts = value
                    .split(',')
                    .map(|p| p.trim().parse::<f64>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| bad(&e.to_string()))?;
                match parts.as_slice() {
                    [relative, absolute, slope] => Ok(ParameterUpdate::Thresholds {
                        sensor,
                        thresholds: SensorThresholds::new(*relative, *absolute, *slope),
                    }),
                    _ => Err(bad("expected relative,absolute,slope")),
                }
            }
        }
    }

    /// True if the window capacity depends on this change.
    pub fn affects_capacity(&self) -> bool {
        matches!(
            self,
            ParameterUpdate::RunningInterval(_) | ParameterUpdate::WindowSpan(_)
        )
    }
}
