//! Equilibrium detection over the sampling windows.
//!
//! A stage has reached equilibrium when, over a full window:
//!
//! 1. pH, ORP and conductivity are each stable (low relative spread, flat
//!    trend) and pH and conductivity lie inside the stage's constraints, and
//! 2. the principal component scores of the UV and NIR spectra barely move.
//!
//! A window that is not yet full is simply "not reached"; it is never an
//! error.

use crate::pca::{pca_scores, score_rsd};
use crate::settings::EquilibriumSettings;
use chrom_core::{
    ProcessStage, SensorConstraints, SensorKind, SensorThresholds, SignalWindows, SpectrometerKind,
};
use serde::{Deserialize, Serialize};

/// Least-squares slope is only checked with at least this many points.
const MIN_SLOPE_POINTS: usize = 5;

/// Per-signal stability flags from the last evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquilibriumStatus {
    pub ph: bool,
    pub orp: bool,
    pub conductivity: bool,
    pub uv: bool,
    pub nir: bool,
}

impl EquilibriumStatus {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn all(&self) -> bool {
        self.ph && self.orp && self.conductivity && self.uv && self.nir
    }

    fn set_sensor(&mut self, kind: SensorKind, stable: bool) {
        match kind {
            SensorKind::Ph => self.ph = stable,
            SensorKind::Orp => self.orp = stable,
            SensorKind::Conductivity => self.conductivity = stable,
            SensorKind::Level => {}
        }
    }

    fn set_spectrum(&mut self, kind: SpectrometerKind, stable: bool) {
        match kind {
            SpectrometerKind::Uv => self.uv = stable,
            SpectrometerKind::Nir => self.nir = stable,
        }
    }
}

impl std::fmt::Display for EquilibriumStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ph={} orp={} conductivity={} uv={} nir={}",
            self.ph, self.orp, self.conductivity, self.uv, self.nir
        )
    }
}

/// Outcome of one detector evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub reached: bool,
    pub status: EquilibriumStatus,
    /// False when the windows were not yet full.
    pub sufficient_history: bool,
}

/// Stateless evaluator of [`SignalWindows`].
#[derive(Debug, Clone)]
pub struct EquilibriumDetector {
    settings: EquilibriumSettings,
}

/// Mean and population standard deviation.
fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Least-squares slope of `(x, y)` pairs.
fn slope(points: &[(f64, f64)]) -> f64 {
    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|p| (p.0 - mean_x).powi(2)).sum();
    if sxx == 0.0 {
        return 0.0;
    }
    let sxy: f64 = points
        .iter()
        .map(|p| (p.0 - mean_x) * (p.1 - mean_y))
        .sum();
    sxy / sxx
}

impl EquilibriumDetector {
    pub fn new(settings: EquilibriumSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &EquilibriumSettings {
        &self.settings
    }

    /// Evaluate `windows` for `stage`.
    pub fn evaluate(&self, stage: ProcessStage, windows: &SignalWindows) -> Evaluation {
        let mut status = EquilibriumStatus::default();
        if !windows.is_full() {
            tracing::debug!(
                %stage,
                filled = windows.len(),
                capacity = windows.capacity(),
                "Insufficient history for equilibrium check"
            );
            return Evaluation {
                reached: false,
                status,
                sufficient_history: false,
            };
        }

        let constraints = self.settings.constraints.for_stage(stage);
        for kind in SensorKind::CHEMICAL {
            let points: Vec<(f64, f64)> = windows
                .sensors
                .iter()
                .enumerate()
                .filter_map(|(i, snap)| snap.get(kind).map(|r| (i as f64, r.value)))
                .collect();
            let missing = windows.len() - points.len();
            if missing > 0 {
                tracing::warn!(sensor = %kind, missing, "Missing samples excluded from statistics");
            }
            let Some(thresholds) = self.settings.thresholds.get(kind) else {
                continue;
            };
            let stable = Self::sensor_stable(&points, thresholds)
                && Self::within_constraints(kind, &points, constraints);
            status.set_sensor(kind, stable);
        }

        for kind in [SpectrometerKind::Uv, SpectrometerKind::Nir] {
            let window = match kind {
                SpectrometerKind::Uv => &windows.uv,
                SpectrometerKind::Nir => &windows.nir,
            };
            let spectra: Vec<&[f64]> = window.iter().filter_map(|s| s.as_deref()).collect();
            let missing = window.len() - spectra.len();
            if missing > 0 {
                tracing::warn!(spectrometer = %kind, missing, "Missing spectra excluded from PCA");
            }
            status.set_spectrum(kind, self.spectrum_stable(&spectra));
        }

        let reached = status.all();
        tracing::info!(%stage, reached, %status, "Equilibrium evaluated");
        Evaluation {
            reached,
            status,
            sufficient_history: true,
        }
    }

    fn sensor_stable(points: &[(f64, f64)], thresholds: &SensorThresholds) -> bool {
        if points.len() < 2 {
            return false;
        }
        let values: Vec<f64> = points.iter().map(|p| p.1).collect();
        let (mean, std) = mean_std(&values);
        let spread_ok = if mean.abs() >= 1.0 {
            std / mean.abs() < thresholds.relative
        } else {
            std < thresholds.absolute
        };
        if !spread_ok {
            return false;
        }
        points.len() < MIN_SLOPE_POINTS || slope(points).abs() < thresholds.slope
    }

    fn within_constraints(
        kind: SensorKind,
        points: &[(f64, f64)],
        constraints: Option<&SensorConstraints>,
    ) -> bool {
        let Some(range) = constraints.and_then(|c| c.get(kind)) else {
            return true;
        };
        points.last().is_some_and(|(_, latest)| range.contains(*latest))
    }

    fn spectrum_stable(&self, spectra: &[&[f64]]) -> bool {
        let k = self.settings.pca_components;
        if spectra.len() < k + 1 {
            return false;
        }
        let Some(scores) = pca_scores(spectra, k) else {
            return false;
        };
        score_rsd(&scores)
            .iter()
            .all(|rsd| *rsd <= self.settings.spectral_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrom_core::{SensorSnapshot, Tick};

    fn full_windows(capacity: usize, tick: impl Fn(usize) -> Tick) -> SignalWindows {
        let mut windows = SignalWindows::new(capacity);
        for i in 0..capacity {
            windows.append(tick(i));
        }
        windows
    }

    fn steady(_: usize) -> Tick {
        Tick {
            sensors: SensorSnapshot::chemical(6.5, 220.0, 0.4),
            uv: Some(vec![0.2, 0.4, 0.3]),
            nir: Some(vec![0.1, 0.1, 0.2]),
        }
    }

    #[test]
    fn test_slope_of_line() {
        let points: Vec<(f64, f64)> = (0..10).map(|i| (i as f64, 2.0 * i as f64 + 1.0)).collect();
        assert!((slope(&points) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_steady_window_reaches_equilibrium() {
        let detector = EquilibriumDetector::new(EquilibriumSettings::default());
        let eval = detector.evaluate(ProcessStage::Equilibrate, &full_windows(10, steady));
        assert!(eval.sufficient_history);
        assert!(eval.reached, "{}", eval.status);
    }

    #[test]
    fn test_partial_window_not_reached() {
        let detector = EquilibriumDetector::new(EquilibriumSettings::default());
        let mut windows = SignalWindows::new(10);
        for i in 0..9 {
            windows.append(steady(i));
        }
        let eval = detector.evaluate(ProcessStage::Equilibrate, &windows);
        assert!(!eval.reached);
        assert!(!eval.sufficient_history);
        assert_eq!(eval.status, EquilibriumStatus::default());
    }

    #[test]
    fn test_out_of_range_ph_fails_constraint() {
        let detector = EquilibriumDetector::new(EquilibriumSettings::default());
        let windows = full_windows(10, |i| Tick {
            sensors: SensorSnapshot::chemical(8.0, 220.0, 0.4),
            ..steady(i)
        });
        let eval = detector.evaluate(ProcessStage::Equilibrate, &windows);
        assert!(!eval.status.ph);
        assert!(eval.status.orp);
        assert!(!eval.reached);
    }

    #[test]
    fn test_missing_spectra_below_component_count() {
        let detector = EquilibriumDetector::new(EquilibriumSettings::default());
        let windows = full_windows(10, |i| Tick {
            nir: if i < 5 { None } else { Some(vec![0.1, 0.1, 0.2]) },
            ..steady(i)
        });
        let eval = detector.evaluate(ProcessStage::Refresh, &windows);
        assert!(eval.status.uv);
        assert!(!eval.status.nir);
    }
}
