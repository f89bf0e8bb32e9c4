//! Device identifiers and commanded device state.
//!
//! Pumps and valves are addressed by small integers (Modbus slave address for
//! pumps, relay channel for valves). The state structs mirror what the
//! controller last *commanded*, not what the device reports.

use serde::{Deserialize, Serialize};

/// Pump bus address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PumpId(pub u8);

impl std::fmt::Display for PumpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pump {}", self.0)
    }
}

/// Valve channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValveId(pub u8);

impl std::fmt::Display for ValveId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "valve {}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PumpDirection {
    #[default]
    Forward,
    Reverse,
}

/// Last commanded state of one pump.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PumpState {
    pub running: bool,
    pub direction: PumpDirection,
    pub speed_rpm: f64,
    pub drain: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl PumpState {
    /// Stopped, zero speed, forward, drain off. Alias is kept.
    pub fn reset(&mut self) {
        self.running = false;
        self.direction = PumpDirection::Forward;
        self.speed_rpm = 0.0;
        self.drain = false;
    }

    pub fn is_safe(&self) -> bool {
        !self.running && self.speed_rpm == 0.0
    }
}

/// Last commanded state of one valve.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValveState {
    /// Opening in percent, 0 (closed) to 100 (fully open).
    pub opening: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl ValveState {
    pub fn is_closed(&self) -> bool {
        self.opening == 0.0
    }
}
