//! Simulated pH/ORP/conductivity/level probe.
//!
//! Each channel follows a [`SignalProfile`] that can be swapped at runtime,
//! e.g. to push pH out of its stage range halfway through a test.

use crate::common::{ErrorConfig, MockRng};
use anyhow::Result;
use chrom_core::{SensorKind, SensorProbe, SensorReading};
use parking_lot::Mutex;
use std::collections::HashMap;

const DRIVER_TYPE: &str = "mock_probe";

/// Probe temperature reported with chemical readings, °C.
const PROBE_TEMPERATURE: f64 = 25.0;

/// Value generator for one probe channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalProfile {
    Constant(f64),
    /// Normal noise around `mean`.
    Noisy { mean: f64, std: f64 },
    /// `start + step * n` for the n-th read of this channel.
    Ramp { start: f64, step: f64 },
}

impl SignalProfile {
    fn sample(&self, n: u64, rng: &MockRng) -> f64 {
        match self {
            SignalProfile::Constant(v) => *v,
            SignalProfile::Noisy { mean, std } => mean + rng.gaussian(*std),
            SignalProfile::Ramp { start, step } => start + step * n as f64,
        }
    }
}

struct Channel {
    profile: SignalProfile,
    reads: u64,
}

pub struct MockSensorProbe {
    channels: Mutex<HashMap<SensorKind, Channel>>,
    rng: MockRng,
    errors: ErrorConfig,
}

impl MockSensorProbe {
    /// A probe reporting a settled, in-range column: pH 6.5, ORP 220 mV,
    /// conductivity 0.4 mS/cm, level 250 mm.
    pub fn new() -> Self {
        let probe = Self {
            channels: Mutex::new(HashMap::new()),
            rng: MockRng::new(Some(0)),
            errors: ErrorConfig::none(),
        };
        probe.set_profile(SensorKind::Ph, SignalProfile::Constant(6.5));
        probe.set_profile(SensorKind::Orp, SignalProfile::Constant(220.0));
        probe.set_profile(SensorKind::Conductivity, SignalProfile::Constant(0.4));
        probe.set_profile(SensorKind::Level, SignalProfile::Constant(250.0));
        probe
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = MockRng::new(Some(seed));
        self
    }

    pub fn with_errors(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_profile(self, kind: SensorKind, profile: SignalProfile) -> Self {
        self.set_profile(kind, profile);
        self
    }

    /// Replace a channel's profile and restart its read counter.
    pub fn set_profile(&self, kind: SensorKind, profile: SignalProfile) {
        self.channels
            .lock()
            .insert(kind, Channel { profile, reads: 0 });
    }

    pub fn errors(&self) -> &ErrorConfig {
        &self.errors
    }

    pub fn read_count(&self, kind: SensorKind) -> u64 {
        self.channels.lock().get(&kind).map_or(0, |c| c.reads)
    }
}

impl Default for MockSensorProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorProbe for MockSensorProbe {
    fn read(&self, kind: SensorKind) -> Result<SensorReading> {
        self.errors.check_operation(DRIVER_TYPE, "read")?;
        let mut channels = self.channels.lock();
        let channel = channels
            .get_mut(&kind)
            .ok_or_else(|| anyhow::anyhow!("{kind} channel not connected"))?;
        let value = channel.profile.sample(channel.reads, &self.rng);
        channel.reads += 1;
        Ok(match kind {
            SensorKind::Level => SensorReading::new(value),
            _ => SensorReading::with_temperature(value, PROBE_TEMPERATURE),
        })
    }
}
