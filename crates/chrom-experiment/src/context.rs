//! Immutable per-run configuration derived from an experiment record.

use crate::hardware_map::HardwareMap;
use chrom_core::{
    ChromError, ChromResult, ExperimentId, ExperimentRecord, ProcessStage, PumpId, ValveId,
};
use std::time::Duration;

/// How one flow stage drives the hardware.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StagePlan {
    pub stage: ProcessStage,
    pub pump: PumpId,
    pub valve: ValveId,
    pub speed_rpm: f64,
    pub flow_bv_per_h: f64,
    /// Fixed duration; `None` for stages that end on equilibrium.
    pub duration: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentContext {
    pub experiment_id: ExperimentId,
    pub bed_volume_ml: f64,
    /// Plans in execution order.
    pub plans: Vec<StagePlan>,
    /// Every stage valve, for mode switching.
    pub stage_valves: Vec<ValveId>,
    /// Every stage pump, for mode switching.
    pub stage_pumps: Vec<PumpId>,
    pub outlet_pump: PumpId,
    pub waste_valve: ValveId,
    pub fraction_valve: ValveId,
    /// Level gauge to liquid surface, mm.
    pub target_level_mm: f64,
}

fn hours(name: &str, h: f64) -> ChromResult<Duration> {
    Duration::try_from_secs_f64(h * 3600.0)
        .map_err(|e| ChromError::Configuration(format!("{name} of {h} h: {e}")))
}

impl ExperimentContext {
    /// Validate `record` and resolve it against `map`.
    pub fn from_record(record: &ExperimentRecord, map: &HardwareMap) -> ChromResult<Self> {
        record.validate()?;
        let cmd = &record.control_command;
        let fraction_valve = map.fraction_valve(&cmd.fraction).ok_or_else(|| {
            ChromError::Configuration(format!(
                "fraction outlet '{}' is not in the hardware map",
                cmd.fraction
            ))
        })?;

        let bed_volume_ml = record.bed_volume_ml();
        let mut plans = Vec::with_capacity(ProcessStage::FLOW_ORDER.len());
        for stage in ProcessStage::FLOW_ORDER {
            let assignment = map.stages.get(stage).ok_or_else(|| {
                ChromError::Configuration(format!("no hardware assignment for {stage}"))
            })?;
            let factor = map.pump_factor(assignment.pump).ok_or_else(|| {
                ChromError::Configuration(format!("{} has no calibration factor", assignment.pump))
            })?;
            let (flow, duration) = match stage {
                ProcessStage::Equilibrate => (cmd.equilibrate_flow, None),
                ProcessStage::Feed => (cmd.feed_flow, Some(hours("feed_time", cmd.feed_time)?)),
                ProcessStage::Wash => (cmd.wash_flow, Some(hours("wash_time", cmd.wash_time)?)),
                ProcessStage::Elute => {
                    (cmd.elute_flow, Some(hours("elute_time", cmd.elute_time)?))
                }
                _ => (cmd.refresh_flow, None),
            };
            plans.push(StagePlan {
                stage,
                pump: assignment.pump,
                valve: assignment.valve,
                speed_rpm: bed_volume_ml * flow / 60.0 * factor,
                flow_bv_per_h: flow,
                duration,
            });
        }

        Ok(Self {
            experiment_id: record.id,
            bed_volume_ml,
            plans,
            stage_valves: map.stage_valves().into_iter().collect(),
            stage_pumps: map.stage_pumps().into_iter().collect(),
            outlet_pump: map.outlet_pump,
            waste_valve: map.waste_valve,
            fraction_valve,
            target_level_mm: record.target_level_mm(),
        })
    }

    pub fn plan(&self, stage: ProcessStage) -> Option<&StagePlan> {
        self.plans.iter().find(|p| p.stage == stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrom_core::ControlCommand;

    fn record() -> ExperimentRecord {
        ExperimentRecord {
            id: 4,
            control_command: ControlCommand {
                equilibrate_flow: 2.0,
                feed_flow: 3.0,
                feed_time: 0.5,
                wash_flow: 2.0,
                wash_time: 0.25,
                elute_flow: 1.0,
                elute_time: 1.0,
                refresh_flow: 2.0,
                fraction: "F3".to_string(),
            },
            feed_number: String::new(),
            phase_wash: String::new(),
            phase_elute: String::new(),
            phase_refresh: String::new(),
            phase_equilibrate: String::new(),
            resin: String::new(),
            column_height: 50.0,
            column_inner_diameter: 2.0,
            bed_height: 20.0,
            liquid_height: 5.0,
            start_time: None,
            end_time: None,
        }
    }

    #[test]
    fn test_plans() {
        let ctx = ExperimentContext::from_record(&record(), &HardwareMap::default()).unwrap();
        let bv = std::f64::consts::PI * 20.0;
        assert!((ctx.bed_volume_ml - bv).abs() < 1e-9);
        assert_eq!(ctx.plans.len(), 5);

        let feed = ctx.plan(ProcessStage::Feed).unwrap();
        assert_eq!(feed.valve, ValveId(3));
        assert!((feed.speed_rpm - bv * 3.0 / 60.0 * 8.25).abs() < 1e-9);
        assert_eq!(feed.duration, Some(Duration::from_secs(1800)));
        assert_eq!(ctx.plan(ProcessStage::Refresh).unwrap().duration, None);

        assert_eq!(ctx.fraction_valve, ValveId(11));
        assert!((ctx.target_level_mm - 250.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_fraction_rejected() {
        let mut rec = record();
        rec.control_command.fraction = "F9".to_string();
        let err = ExperimentContext::from_record(&rec, &HardwareMap::default()).unwrap_err();
        assert!(matches!(err, ChromError::Configuration(_)));
    }

    #[test]
    fn test_unrepresentable_duration_is_configuration_error() {
        let mut rec = record();
        rec.control_command.feed_time = 1e300;
        let err = ExperimentContext::from_record(&rec, &HardwareMap::default()).unwrap_err();
        assert!(matches!(err, ChromError::Configuration(_)));
        assert!(hours("feed_time", f64::MAX).is_err());
    }
}
