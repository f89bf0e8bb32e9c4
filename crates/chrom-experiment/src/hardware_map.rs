//! Static assignment of pumps and valves to process roles.

use chrom_core::{ChromError, ChromResult, ProcessStage, PumpId, ValveId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Pump and valve driving one flow stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageAssignment {
    pub pump: PumpId,
    pub valve: ValveId,
}

impl StageAssignment {
    pub const fn new(pump: u8, valve: u8) -> Self {
        Self {
            pump: PumpId(pump),
            valve: ValveId(valve),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageAssignments {
    pub equilibrate: StageAssignment,
    pub feed: StageAssignment,
    pub wash: StageAssignment,
    pub elute: StageAssignment,
    pub refresh: StageAssignment,
}

impl StageAssignments {
    pub fn get(&self, stage: ProcessStage) -> Option<&StageAssignment> {
        match stage {
            ProcessStage::Equilibrate => Some(&self.equilibrate),
            ProcessStage::Feed => Some(&self.feed),
            ProcessStage::Wash => Some(&self.wash),
            ProcessStage::Elute => Some(&self.elute),
            ProcessStage::Refresh => Some(&self.refresh),
            ProcessStage::Initializing | ProcessStage::Idle => None,
        }
    }

    fn iter(&self) -> impl Iterator<Item = &StageAssignment> + '_ {
        [
            &self.equilibrate,
            &self.feed,
            &self.wash,
            &self.elute,
            &self.refresh,
        ]
        .into_iter()
    }
}

impl Default for StageAssignments {
    fn default() -> Self {
        Self {
            equilibrate: StageAssignment::new(7, 5),
            feed: StageAssignment::new(7, 3),
            wash: StageAssignment::new(7, 1),
            elute: StageAssignment::new(7, 2),
            refresh: StageAssignment::new(7, 4),
        }
    }
}

/// Pump calibration: rpm per mL/min.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PumpCalibration {
    pub pump: PumpId,
    pub factor: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareMap {
    pub stages: StageAssignments,
    /// Pump draining the column, driven by level control.
    pub outlet_pump: PumpId,
    pub waste_valve: ValveId,
    /// Fraction collector outlets by name.
    pub fractions: BTreeMap<String, ValveId>,
    pub pump_factors: Vec<PumpCalibration>,
    /// Every pump address on the bus.
    pub pump_addresses: Vec<PumpId>,
    /// Every valve channel on the relay board.
    pub valve_channels: Vec<ValveId>,
}

impl Default for HardwareMap {
    fn default() -> Self {
        Self {
            stages: StageAssignments::default(),
            outlet_pump: PumpId(10),
            waste_valve: ValveId(8),
            fractions: BTreeMap::from([
                ("F1".to_string(), ValveId(9)),
                ("F2".to_string(), ValveId(10)),
                ("F3".to_string(), ValveId(11)),
            ]),
            pump_factors: vec![
                PumpCalibration {
                    pump: PumpId(7),
                    factor: 8.25,
                },
                PumpCalibration {
                    pump: PumpId(10),
                    factor: 8.0,
                },
            ],
            pump_addresses: (5..=10).map(PumpId).collect(),
            valve_channels: [1, 2, 3, 4, 5, 8, 9, 10, 11].into_iter().map(ValveId).collect(),
        }
    }
}

impl HardwareMap {
    pub fn pump_factor(&self, pump: PumpId) -> Option<f64> {
        self.pump_factors
            .iter()
            .find(|c| c.pump == pump)
            .map(|c| c.factor)
    }

    pub fn fraction_valve(&self, name: &str) -> Option<ValveId> {
        self.fractions.get(name).copied()
    }

    /// Distinct stage valves.
    pub fn stage_valves(&self) -> BTreeSet<ValveId> {
        self.stages.iter().map(|a| a.valve).collect()
    }

    /// Distinct stage pumps.
    pub fn stage_pumps(&self) -> BTreeSet<PumpId> {
        self.stages.iter().map(|a| a.pump).collect()
    }

    /// Check internal consistency: every referenced device is listed, every
    /// stage pump is calibrated and no role shares a valve with another.
    pub fn validate(&self) -> ChromResult<()> {
        let pumps: BTreeSet<_> = self.pump_addresses.iter().copied().collect();
        let valves: BTreeSet<_> = self.valve_channels.iter().copied().collect();

        for pump in self.stage_pumps().into_iter().chain([self.outlet_pump]) {
            if !pumps.contains(&pump) {
                return Err(ChromError::Configuration(format!(
                    "{pump} is not in pump_addresses"
                )));
            }
        }
        for pump in self.stage_pumps() {
            match self.pump_factor(pump) {
                Some(f) if f.is_finite() && f > 0.0 => {}
                Some(f) => {
                    return Err(ChromError::Configuration(format!(
                        "{pump} calibration factor must be positive, got {f}"
                    )))
                }
                None => {
                    return Err(ChromError::Configuration(format!(
                        "{pump} has no calibration factor"
                    )))
                }
            }
        }

        let mut roles: BTreeMap<ValveId, String> = BTreeMap::new();
        let mut claim = |valve: ValveId, role: String| -> ChromResult<()> {
            if !valves.contains(&valve) {
                return Err(ChromError::Configuration(format!(
                    "{valve} ({role}) is not in valve_channels"
                )));
            }
            if let Some(previous) = roles.insert(valve, role.clone()) {
                if previous != role {
                    return Err(ChromError::Configuration(format!(
                        "{valve} is assigned to both {previous} and {role}"
                    )));
                }
            }
            Ok(())
        };
        for stage in ProcessStage::FLOW_ORDER {
            if let Some(assignment) = self.stages.get(stage) {
                claim(assignment.valve, format!("{stage} stage"))?;
            }
        }
        claim(self.waste_valve, "waste".to_string())?;
        for (name, valve) in &self.fractions {
            claim(*valve, format!("fraction {name}"))?;
        }
        Ok(())
    }

    /// Check that every configured device was discovered on the rig.
    pub fn check_devices(&self, pumps: &[PumpId], valves: &[ValveId]) -> ChromResult<()> {
        if let Some(missing) = self.pump_addresses.iter().find(|p| !pumps.contains(p)) {
            return Err(ChromError::Configuration(format!(
                "{missing} not present on the pump bus"
            )));
        }
        if let Some(missing) = self.valve_channels.iter().find(|v| !valves.contains(v)) {
            return Err(ChromError::Configuration(format!(
                "{missing} not present on the valve board"
            )));
        }
        Ok(())
    }
}
