//! Device Capabilities
//!
//! Fine-grained capability traits for the column rig. Each device family
//! exposes only what the process needs:
//!
//! - [`PumpDriver`]: a bank of peristaltic pumps on a Modbus bus
//! - [`ValveDriver`]: a bank of proportional valves on a relay board
//! - [`SensorProbe`]: the pH/ORP/conductivity/level multi-probe
//! - [`Spectrometer`]: a UV or NIR absorbance spectrometer
//!
//! # Design Philosophy
//!
//! Unlike the async capabilities used elsewhere in the stack, these traits
//! are **synchronous**: real drivers block on serial I/O. Callers in async
//! context must go through `tokio::task::spawn_blocking` (the experiment
//! crate's `HardwareGateway` does this for every call). Each trait:
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Reports failures, never retries internally

use crate::device::{PumpDirection, PumpId, ValveId};
use crate::reading::{SensorKind, SensorReading};
use anyhow::Result;
use std::sync::Arc;

/// Pump bank control.
pub trait PumpDriver: Send + Sync {
    /// Addresses of every pump on the bus.
    fn pump_ids(&self) -> Vec<PumpId>;

    /// Set rotation speed in rpm.
    fn set_speed(&self, pump: PumpId, rpm: f64) -> Result<()>;

    /// Start (`true`) or stop (`false`) the pump.
    fn set_running(&self, pump: PumpId, running: bool) -> Result<()>;

    fn set_direction(&self, pump: PumpId, direction: PumpDirection) -> Result<()>;

    /// Full-speed drain mode.
    fn set_drain(&self, pump: PumpId, drain: bool) -> Result<()>;
}

/// Valve bank control.
pub trait ValveDriver: Send + Sync {
    fn valve_ids(&self) -> Vec<ValveId>;

    /// Set opening in percent (0..=100).
    fn set_opening(&self, valve: ValveId, percent: f64) -> Result<()>;
}

/// Multi-channel sensor probe.
pub trait SensorProbe: Send + Sync {
    fn read(&self, kind: SensorKind) -> Result<SensorReading>;
}

/// Absorbance spectrometer.
///
/// `read_absorbance` returns one value per entry of `wavelengths`, computed
/// against the stored reference and background.
pub trait Spectrometer: Send + Sync {
    fn wavelengths(&self) -> Vec<f64>;

    fn read_absorbance(&self) -> Result<Vec<f64>>;

    /// Capture the current intensity as the 100 % transmission reference.
    fn set_reference(&self) -> Result<()>;

    /// Capture the current intensity as the dark background.
    fn set_background(&self) -> Result<()>;
}

/// The full set of drivers for one rig.
#[derive(Clone)]
pub struct DeviceSet {
    pub pumps: Arc<dyn PumpDriver>,
    pub valves: Arc<dyn ValveDriver>,
    pub probe: Arc<dyn SensorProbe>,
    pub uv: Arc<dyn Spectrometer>,
    pub nir: Arc<dyn Spectrometer>,
}

impl std::fmt::Debug for DeviceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSet")
            .field("pumps", &self.pumps.pump_ids())
            .field("valves", &self.valves.valve_ids())
            .finish_non_exhaustive()
    }
}
