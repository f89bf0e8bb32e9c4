//! Experiment records and the persistence seams.
//!
//! An [`ExperimentRecord`] is the run configuration stored ahead of time and
//! fetched at run start. Everything produced during a run (sensor snapshots,
//! spectra, log lines) goes out through a [`RecordSink`].

use crate::error::{ChromError, ChromResult};
use crate::reading::ReadingKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Experiment identifier as stored by the repository.
pub type ExperimentId = u64;

/// Accepted flow range, bed volumes per hour.
pub const FLOW_RANGE_BV_PER_H: (f64, f64) = (0.01, 1000.0);

/// Longest fixed stage, hours.
pub const MAX_STAGE_HOURS: f64 = 1000.0;

/// Per-stage flow program.
///
/// Flows are in bed volumes per hour, durations in hours. Equilibrate and
/// Refresh have no duration: they end on equilibrium.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlCommand {
    pub equilibrate_flow: f64,
    pub feed_flow: f64,
    pub feed_time: f64,
    pub wash_flow: f64,
    pub wash_time: f64,
    pub elute_flow: f64,
    pub elute_time: f64,
    pub refresh_flow: f64,
    /// Name of the fraction outlet collecting the eluate, e.g. `"F1"`.
    pub fraction: String,
}

/// Persisted configuration of one experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub id: ExperimentId,
    pub control_command: ControlCommand,
    #[serde(default)]
    pub feed_number: String,
    #[serde(default)]
    pub phase_wash: String,
    #[serde(default)]
    pub phase_elute: String,
    #[serde(default)]
    pub phase_refresh: String,
    #[serde(default)]
    pub phase_equilibrate: String,
    #[serde(default)]
    pub resin: String,
    /// Column height (cm).
    pub column_height: f64,
    /// Column inner diameter (cm).
    pub column_inner_diameter: f64,
    /// Resin bed height (cm).
    pub bed_height: f64,
    /// Liquid height above the bed to maintain (cm).
    pub liquid_height: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl ExperimentRecord {
    /// Check the numeric fields of the record.
    ///
    /// The fraction outlet name is checked against the hardware map when the
    /// run context is built, not here.
    pub fn validate(&self) -> ChromResult<()> {
        let cmd = &self.control_command;
        let flows = [
            ("equilibrate_flow", cmd.equilibrate_flow),
            ("feed_flow", cmd.feed_flow),
            ("wash_flow", cmd.wash_flow),
            ("elute_flow", cmd.elute_flow),
            ("refresh_flow", cmd.refresh_flow),
        ];
        let (min_flow, max_flow) = FLOW_RANGE_BV_PER_H;
        for (name, flow) in flows {
            if !(flow.is_finite() && flow > 0.0) {
                return Err(ChromError::Configuration(format!(
                    "{name} must be positive, got {flow}"
                )));
            }
            if !(min_flow..=max_flow).contains(&flow) {
                return Err(ChromError::Configuration(format!(
                    "{name} must be within {min_flow}..={max_flow} BV/h, got {flow}"
                )));
            }
        }

        let durations = [
            ("feed_time", cmd.feed_time),
            ("wash_time", cmd.wash_time),
            ("elute_time", cmd.elute_time),
        ];
        for (name, hours) in durations {
            if !(hours.is_finite() && hours >= 0.0) {
                return Err(ChromError::Configuration(format!(
                    "{name} must be non-negative, got {hours}"
                )));
            }
            if hours > MAX_STAGE_HOURS {
                return Err(ChromError::Configuration(format!(
                    "{name} must be at most {MAX_STAGE_HOURS} h, got {hours}"
                )));
            }
        }

        let geometry = [
            ("column_height", self.column_height),
            ("column_inner_diameter", self.column_inner_diameter),
            ("bed_height", self.bed_height),
            ("liquid_height", self.liquid_height),
        ];
        for (name, cm) in geometry {
            if !(cm.is_finite() && cm > 0.0) {
                return Err(ChromError::Configuration(format!(
                    "{name} must be positive, got {cm}"
                )));
            }
        }

        if self.target_level_mm() <= 0.0 {
            return Err(ChromError::Configuration(format!(
                "bed height ({}) plus liquid height ({}) must be below column height ({})",
                self.bed_height, self.liquid_height, self.column_height
            )));
        }

        if cmd.fraction.trim().is_empty() {
            return Err(ChromError::Configuration(
                "fraction outlet must be named".to_string(),
            ));
        }

        Ok(())
    }

    /// Bed volume in mL.
    pub fn bed_volume_ml(&self) -> f64 {
        let radius = self.column_inner_diameter / 2.0;
        std::f64::consts::PI * radius * radius * self.bed_height
    }

    /// Level setpoint: distance from the level gauge to the liquid surface, mm.
    pub fn target_level_mm(&self) -> f64 {
        (self.column_height - self.bed_height - self.liquid_height) * 10.0
    }
}

/// Start/end timestamp update applied to a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTimeUpdate {
    Started(DateTime<Utc>),
    Finished(DateTime<Utc>),
    /// Clears both timestamps.
    Cleared,
}

/// Append-only sink for run output.
///
/// `experiment_id` is `None` for readings taken while no run is active.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn append_reading(
        &self,
        kind: ReadingKind,
        experiment_id: Option<ExperimentId>,
        timestamp: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> anyhow::Result<()>;

    async fn append_log(
        &self,
        experiment_id: Option<ExperimentId>,
        timestamp: DateTime<Utc>,
        text: &str,
    ) -> anyhow::Result<()>;
}

/// Stored experiment records.
#[async_trait]
pub trait ExperimentRepository: Send + Sync {
    /// Fetch a record, `Ok(None)` if it does not exist.
    async fn fetch_record(&self, id: ExperimentId) -> anyhow::Result<Option<ExperimentRecord>>;

    /// Delete every reading and log line tagged with `id`.
    async fn clear_records(&self, id: ExperimentId) -> anyhow::Result<()>;

    async fn set_run_times(&self, id: ExperimentId, update: RunTimeUpdate) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ExperimentRecord {
        ExperimentRecord {
            id: 1,
            control_command: ControlCommand {
                equilibrate_flow: 2.0,
                feed_flow: 2.5,
                feed_time: 1.0,
                wash_flow: 3.0,
                wash_time: 0.5,
                elute_flow: 4.0,
                elute_time: 2.0,
                refresh_flow: 2.0,
                fraction: "F1".to_string(),
            },
            feed_number: "B-01".to_string(),
            phase_wash: "water".to_string(),
            phase_elute: "ethanol".to_string(),
            phase_refresh: "naoh".to_string(),
            phase_equilibrate: "water".to_string(),
            resin: "D101".to_string(),
            column_height: 50.0,
            column_inner_diameter: 2.0,
            bed_height: 20.0,
            liquid_height: 5.0,
            start_time: None,
            end_time: None,
        }
    }

    #[test]
    fn test_geometry() {
        let rec = record();
        assert!(rec.validate().is_ok());
        assert!((rec.bed_volume_ml() - std::f64::consts::PI * 20.0).abs() < 1e-9);
        assert!((rec.target_level_mm() - 250.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_flow_rejected() {
        let mut rec = record();
        rec.control_command.wash_flow = 0.0;
        let err = rec.validate().unwrap_err();
        assert!(err.to_string().contains("wash_flow"));
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let mut rec = record();
        rec.control_command.feed_time = 1e300;
        assert!(rec.validate().unwrap_err().to_string().contains("feed_time"));

        let mut rec = record();
        rec.control_command.equilibrate_flow = 1e-300;
        assert!(rec
            .validate()
            .unwrap_err()
            .to_string()
            .contains("equilibrate_flow"));

        let mut rec = record();
        rec.control_command.elute_flow = 5000.0;
        assert!(matches!(rec.validate(), Err(ChromError::Configuration(_))));
    }

    #[test]
    fn test_zero_duration_allowed() {
        let mut rec = record();
        rec.control_command.wash_time = 0.0;
        assert!(rec.validate().is_ok());
    }

    #[test]
    fn test_overfull_column_rejected() {
        let mut rec = record();
        rec.liquid_height = 30.0;
        assert!(matches!(rec.validate(), Err(ChromError::Configuration(_))));
    }

    #[test]
    fn test_record_from_toml() {
        let text = r#"
            id = 7
            column_height = 40.0
            column_inner_diameter = 1.5
            bed_height = 15.0
            liquid_height = 3.0

            [control_command]
            equilibrate_flow = 1.5
            feed_flow = 2.5
            feed_time = 1.0
            wash_flow = 3.0
            wash_time = 0.5
            elute_flow = 4.0
            elute_time = 2.0
            refresh_flow = 2.0
            fraction = "F2"
        "#;
        let rec: ExperimentRecord = toml::from_str(text).unwrap();
        assert_eq!(rec.id, 7);
        assert_eq!(rec.control_command.fraction, "F2");
        assert!(rec.resin.is_empty());
        assert!(rec.validate().is_ok());
    }
}
