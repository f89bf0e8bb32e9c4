//! Simulated peristaltic pump bank.
//!
//! Tracks the last state written to each pump and keeps an ordered command
//! log so tests can assert on what the controller actually sent.

use crate::common::ErrorConfig;
use anyhow::{anyhow, Result};
use chrom_core::{PumpDirection, PumpDriver, PumpId, PumpState};
use parking_lot::Mutex;
use std::collections::BTreeMap;

const DRIVER_TYPE: &str = "mock_pump";

/// Highest speed the simulated pump head accepts, rpm.
pub const MAX_PUMP_RPM: f64 = 600.0;

/// One command received by the bank.
#[derive(Debug, Clone, PartialEq)]
pub enum PumpCommand {
    Speed(PumpId, f64),
    Running(PumpId, bool),
    Direction(PumpId, PumpDirection),
    Drain(PumpId, bool),
}

impl PumpCommand {
    pub fn pump(&self) -> PumpId {
        match self {
            PumpCommand::Speed(id, _)
            | PumpCommand::Running(id, _)
            | PumpCommand::Direction(id, _)
            | PumpCommand::Drain(id, _) => *id,
        }
    }
}

pub struct MockPumpBank {
    pumps: Mutex<BTreeMap<PumpId, PumpState>>,
    log: Mutex<Vec<PumpCommand>>,
    errors: ErrorConfig,
}

impl MockPumpBank {
    pub fn new(ids: impl IntoIterator<Item = PumpId>) -> Self {
        Self::with_errors(ids, ErrorConfig::none())
    }

    pub fn with_errors(ids: impl IntoIterator<Item = PumpId>, errors: ErrorConfig) -> Self {
        let pumps = ids.into_iter().map(|id| (id, PumpState::default())).collect();
        Self {
            pumps: Mutex::new(pumps),
            log: Mutex::new(Vec::new()),
            errors,
        }
    }

    pub fn errors(&self) -> &ErrorConfig {
        &self.errors
    }

    pub fn state(&self, pump: PumpId) -> Option<PumpState> {
        self.pumps.lock().get(&pump).cloned()
    }

    /// Every command in the order received.
    pub fn commands(&self) -> Vec<PumpCommand> {
        self.log.lock().clone()
    }

    pub fn commands_for(&self, pump: PumpId) -> Vec<PumpCommand> {
        self.log
            .lock()
            .iter()
            .filter(|cmd| cmd.pump() == pump)
            .cloned()
            .collect()
    }

    /// All pumps stopped at zero speed.
    pub fn all_stopped(&self) -> bool {
        self.pumps.lock().values().all(PumpState::is_safe)
    }

    fn apply(
        &self,
        pump: PumpId,
        operation: &'static str,
        command: PumpCommand,
        update: impl FnOnce(&mut PumpState),
    ) -> Result<()> {
        self.errors.check_operation(DRIVER_TYPE, operation)?;
        let mut pumps = self.pumps.lock();
        let state = pumps
            .get_mut(&pump)
            .ok_or_else(|| anyhow!("{pump} is not on the bus"))?;
        update(state);
        self.log.lock().push(command);
        tracing::trace!(%pump, operation, "Pump command applied");
        Ok(())
    }
}

impl PumpDriver for MockPumpBank {
    fn pump_ids(&self) -> Vec<PumpId> {
        self.pumps.lock().keys().copied().collect()
    }

    fn set_speed(&self, pump: PumpId, rpm: f64) -> Result<()> {
        if !rpm.is_finite() || !(0.0..=MAX_PUMP_RPM).contains(&rpm) {
            return Err(anyhow!(
                "{pump}: speed {rpm} rpm outside 0..={MAX_PUMP_RPM}"
            ));
        }
        self.apply(pump, "set_speed", PumpCommand::Speed(pump, rpm), |s| {
            s.speed_rpm = rpm;
        })
    }

    fn set_running(&self, pump: PumpId, running: bool) -> Result<()> {
        self.apply(
            pump,
            "set_running",
            PumpCommand::Running(pump, running),
            |s| s.running = running,
        )
    }

    fn set_direction(&self, pump: PumpId, direction: PumpDirection) -> Result<()> {
        self.apply(
            pump,
            "set_direction",
            PumpCommand::Direction(pump, direction),
            |s| s.direction = direction,
        )
    }

    fn set_drain(&self, pump: PumpId, drain: bool) -> Result<()> {
        self.apply(pump, "set_drain", PumpCommand::Drain(pump, drain), |s| {
            s.drain = drain;
        })
    }
}
