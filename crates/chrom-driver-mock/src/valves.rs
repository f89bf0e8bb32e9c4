//! Simulated proportional valve bank.

use crate::common::ErrorConfig;
use anyhow::{anyhow, Result};
use chrom_core::{ValveDriver, ValveId};
use parking_lot::Mutex;
use std::collections::BTreeMap;

const DRIVER_TYPE: &str = "mock_valve";

pub struct MockValveBank {
    openings: Mutex<BTreeMap<ValveId, f64>>,
    /// Every accepted `(valve, percent)` write, in order.
    history: Mutex<Vec<(ValveId, f64)>>,
    errors: ErrorConfig,
}

impl MockValveBank {
    pub fn new(ids: impl IntoIterator<Item = ValveId>) -> Self {
        Self::with_errors(ids, ErrorConfig::none())
    }

    pub fn with_errors(ids: impl IntoIterator<Item = ValveId>, errors: ErrorConfig) -> Self {
        Self {
            openings: Mutex::new(ids.into_iter().map(|id| (id, 0.0)).collect()),
            history: Mutex::new(Vec::new()),
            errors,
        }
    }

    pub fn errors(&self) -> &ErrorConfig {
        &self.errors
    }

    pub fn opening(&self, valve: ValveId) -> Option<f64> {
        self.openings.lock().get(&valve).copied()
    }

    pub fn history(&self) -> Vec<(ValveId, f64)> {
        self.history.lock().clone()
    }

    /// Number of closed-to-open transitions seen on `valve`.
    pub fn open_count(&self, valve: ValveId) -> usize {
        let mut previous = 0.0;
        let mut count = 0;
        for (id, percent) in self.history.lock().iter() {
            if *id != valve {
                continue;
            }
            if previous == 0.0 && *percent > 0.0 {
                count += 1;
            }
            previous = *percent;
        }
        count
    }

    pub fn all_closed(&self) -> bool {
        self.openings.lock().values().all(|p| *p == 0.0)
    }
}

impl ValveDriver for MockValveBank {
    fn valve_ids(&self) -> Vec<ValveId> {
        self.openings.lock().keys().copied().collect()
    }

    fn set_opening(&self, valve: ValveId, percent: f64) -> Result<()> {
        if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
            return Err(anyhow!("{valve}: opening {percent}% outside 0..=100"));
        }
        self.errors.check_operation(DRIVER_TYPE, "set_opening")?;
        let mut openings = self.openings.lock();
        let slot = openings
            .get_mut(&valve)
            .ok_or_else(|| anyhow!("{valve} is not wired"))?;
        *slot = percent;
        self.history.lock().push((valve, percent));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_count_tracks_transitions() {
        let bank = MockValveBank::new([ValveId(9), ValveId(8)]);
        bank.set_opening(ValveId(9), 0.0).unwrap();
        bank.set_opening(ValveId(9), 100.0).unwrap();
        bank.set_opening(ValveId(9), 100.0).unwrap();
        bank.set_opening(ValveId(8), 100.0).unwrap();
        bank.set_opening(ValveId(9), 0.0).unwrap();
        assert_eq!(bank.open_count(ValveId(9)), 1);
        assert_eq!(bank.opening(ValveId(8)), Some(100.0));
        assert!(!bank.all_closed());
    }

    #[test]
    fn test_rejects_out_of_range() {
        let bank = MockValveBank::new([ValveId(1)]);
        assert!(bank.set_opening(ValveId(1), 120.0).is_err());
        assert!(bank.set_opening(ValveId(2), 50.0).is_err());
        assert!(bank.history().is_empty());
    }
}
