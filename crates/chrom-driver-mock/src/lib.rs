//! Simulated Hardware for chrom-daq
//!
//! Stand-ins for the column rig so the process can run without a bench:
//!
//! - [`MockPumpBank`] - pump bank with per-pump state and a command log
//! - [`MockValveBank`] - valve bank with write history
//! - [`MockSensorProbe`] - pH/ORP/conductivity/level probe driven by [`SignalProfile`]s
//! - [`MockSpectrometer`] - lamp/dark/sample model producing absorbance spectra
//!
//! All devices are synchronous and never sleep, so they are safe to call from
//! `spawn_blocking` under a paused tokio clock. Failures are injected through
//! [`ErrorConfig`].
//!
//! # Example
//!
//! ```rust
//! use chrom_core::{PumpDriver, PumpId, ValveId};
//! use chrom_driver_mock::MockRig;
//!
//! let rig = MockRig::new([PumpId(7), PumpId(10)], [ValveId(1), ValveId(8)]);
//! let devices = rig.device_set();
//! assert_eq!(devices.pumps.pump_ids().len(), 2);
//! ```

pub mod common;
mod probe;
mod pumps;
mod spectrometer;
mod valves;

pub use common::{ErrorConfig, ErrorScenario, MockRng};
pub use probe::{MockSensorProbe, SignalProfile};
pub use pumps::{MockPumpBank, PumpCommand, MAX_PUMP_RPM};
pub use spectrometer::{Band, MockSpectrometer};
pub use valves::MockValveBank;

use chrom_core::{DeviceSet, PumpId, ValveId};
use std::sync::Arc;

/// A complete simulated rig, keeping concrete handles for inspection.
#[derive(Clone)]
pub struct MockRig {
    pub pumps: Arc<MockPumpBank>,
    pub valves: Arc<MockValveBank>,
    pub probe: Arc<MockSensorProbe>,
    pub uv: Arc<MockSpectrometer>,
    pub nir: Arc<MockSpectrometer>,
}

impl MockRig {
    /// Settled probe and noiseless spectrometers.
    pub fn new(
        pumps: impl IntoIterator<Item = PumpId>,
        valves: impl IntoIterator<Item = ValveId>,
    ) -> Self {
        Self {
            pumps: Arc::new(MockPumpBank::new(pumps)),
            valves: Arc::new(MockValveBank::new(valves)),
            probe: Arc::new(MockSensorProbe::new()),
            uv: Arc::new(MockSpectrometer::uv()),
            nir: Arc::new(MockSpectrometer::nir()),
        }
    }

    pub fn with_probe(mut self, probe: MockSensorProbe) -> Self {
        self.probe = Arc::new(probe);
        self
    }

    pub fn with_spectrometers(mut self, uv: MockSpectrometer, nir: MockSpectrometer) -> Self {
        self.uv = Arc::new(uv);
        self.nir = Arc::new(nir);
        self
    }

    /// Trait-object view handed to the controller.
    pub fn device_set(&self) -> DeviceSet {
        DeviceSet {
            pumps: self.pumps.clone(),
            valves: self.valves.clone(),
            probe: self.probe.clone(),
            uv: self.uv.clone(),
            nir: self.nir.clone(),
        }
    }

    /// Every pump stopped at zero speed and every valve closed.
    pub fn is_safe(&self) -> bool {
        self.pumps.all_stopped() && self.valves.all_closed()
    }
}
