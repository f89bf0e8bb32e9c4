//! Fault injection for the simulated rig.
//!
//! Each mock consults [`ErrorConfig::check_operation`] before touching its
//! state, so a failed command never changes what the device reports.

use super::rng::MockRng;
use chrom_core::{DriverError, DriverErrorKind};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A scripted fault.
#[derive(Debug, Clone)]
pub enum ErrorScenario {
    /// `count` calls of `operation` succeed, every later one fails.
    FailAfterN {
        operation: &'static str,
        count: u32,
    },
    /// `operation` fails with probability `rate` on each call.
    Intermittent { operation: &'static str, rate: f64 },
    /// The serial bus drops on the first call and stays down.
    BusLoss,
}

#[derive(Default, Debug)]
struct Faults {
    calls: HashMap<&'static str, u32>,
    bus_down: bool,
    /// Operations switched off at runtime.
    disabled: HashSet<&'static str>,
}

/// Fault settings shared by every clone, so a test can keep a handle and
/// flip faults on a device it has already handed out.
#[derive(Clone, Debug, Default)]
pub struct ErrorConfig {
    scenarios: Arc<Vec<ErrorScenario>>,
    rng: Arc<MockRng>,
    faults: Arc<Mutex<Faults>>,
}

impl ErrorConfig {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self {
            scenarios: Arc::new(scenarios),
            ..Self::default()
        }
    }

    /// Seed the draws behind [`ErrorScenario::Intermittent`].
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Arc::new(MockRng::new(Some(seed)));
        self
    }

    /// Fail `operation` until [`restore_operation`](Self::restore_operation).
    pub fn fail_operation(&self, operation: &'static str) {
        self.faults.lock().disabled.insert(operation);
    }

    pub fn restore_operation(&self, operation: &'static str) {
        self.faults.lock().disabled.remove(operation);
    }

    pub fn check_operation(&self, device: &str, operation: &'static str) -> Result<(), DriverError> {
        let mut faults = self.faults.lock();
        if faults.bus_down {
            return Err(bus_error(device));
        }
        if faults.disabled.contains(operation) {
            return Err(DriverError::new(
                device,
                DriverErrorKind::Hardware,
                format!("Injected failure on '{operation}'"),
            ));
        }

        for scenario in self.scenarios.iter() {
            match *scenario {
                ErrorScenario::BusLoss => {
                    faults.bus_down = true;
                    return Err(bus_error(device));
                }
                ErrorScenario::FailAfterN { operation: op, count } if op == operation => {
                    let calls = faults.calls.entry(op).or_default();
                    *calls += 1;
                    if *calls > count {
                        return Err(DriverError::new(
                            device,
                            DriverErrorKind::Hardware,
                            format!("Injected failure after {count} '{op}' calls"),
                        ));
                    }
                }
                ErrorScenario::Intermittent { operation: op, rate } if op == operation => {
                    if self.rng.should_fail(rate) {
                        return Err(DriverError::new(
                            device,
                            DriverErrorKind::Timeout,
                            format!("No reply to '{op}'"),
                        ));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Bring the bus back and forget call counts and disabled operations.
    pub fn reset(&self) {
        *self.faults.lock() = Faults::default();
    }
}

fn bus_error(device: &str) -> DriverError {
    DriverError::new(device, DriverErrorKind::Communication, "Serial bus down")
}
