//! Sensor and spectrometer reading types.

use serde::{Deserialize, Serialize};

/// Channels exposed by the multi-sensor probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Ph,
    Orp,
    Conductivity,
    /// Distance from the level gauge to the liquid surface (mm).
    Level,
}

impl SensorKind {
    /// Sensors that take part in equilibrium detection.
    pub const CHEMICAL: [SensorKind; 3] = [SensorKind::Ph, SensorKind::Orp, SensorKind::Conductivity];

    /// Every channel sampled each tick.
    pub const ALL: [SensorKind; 4] = [
        SensorKind::Ph,
        SensorKind::Orp,
        SensorKind::Conductivity,
        SensorKind::Level,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Ph => "ph",
            SensorKind::Orp => "orp",
            SensorKind::Conductivity => "conductivity",
            SensorKind::Level => "level",
        }
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpectrometerKind {
    Uv,
    Nir,
}

impl std::fmt::Display for SpectrometerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpectrometerKind::Uv => f.write_str("uv"),
            SpectrometerKind::Nir => f.write_str("nir"),
        }
    }
}

/// Record category used by the persistence sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingKind {
    Sensor,
    Uv,
    Nir,
}

impl From<SpectrometerKind> for ReadingKind {
    fn from(kind: SpectrometerKind) -> Self {
        match kind {
            SpectrometerKind::Uv => ReadingKind::Uv,
            SpectrometerKind::Nir => ReadingKind::Nir,
        }
    }
}

/// One scalar probe reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl SensorReading {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            temperature: None,
        }
    }

    pub fn with_temperature(value: f64, temperature: f64) -> Self {
        Self {
            value,
            temperature: Some(temperature),
        }
    }
}

/// All probe channels read during one sampling tick.
///
/// A channel whose read failed is `None`; statistics skip it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ph: Option<SensorReading>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orp: Option<SensorReading>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conductivity: Option<SensorReading>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<SensorReading>,
}

impl SensorSnapshot {
    pub fn get(&self, kind: SensorKind) -> Option<&SensorReading> {
        match kind {
            SensorKind::Ph => self.ph.as_ref(),
            SensorKind::Orp => self.orp.as_ref(),
            SensorKind::Conductivity => self.conductivity.as_ref(),
            SensorKind::Level => self.level.as_ref(),
        }
    }

    pub fn set(&mut self, kind: SensorKind, reading: Option<SensorReading>) {
        match kind {
            SensorKind::Ph => self.ph = reading,
            SensorKind::Orp => self.orp = reading,
            SensorKind::Conductivity => self.conductivity = reading,
            SensorKind::Level => self.level = reading,
        }
    }

    /// Snapshot with the three chemical channels set, no temperature.
    pub fn chemical(ph: f64, orp: f64, conductivity: f64) -> Self {
        Self {
            ph: Some(SensorReading::new(ph)),
            orp: Some(SensorReading::new(orp)),
            conductivity: Some(SensorReading::new(conductivity)),
            level: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        SensorKind::ALL.iter().all(|kind| self.get(*kind).is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_get_set() {
        let mut snap = SensorSnapshot::default();
        assert!(snap.is_empty());
        snap.set(SensorKind::Orp, Some(SensorReading::with_temperature(210.0, 24.5)));
        assert_eq!(snap.get(SensorKind::Orp).map(|r| r.value), Some(210.0));
        assert!(snap.get(SensorKind::Ph).is_none());
        assert!(!snap.is_empty());
    }

    #[test]
    fn test_snapshot_serializes_only_present_channels() {
        let snap = SensorSnapshot::chemical(7.0, 200.0, 0.5);
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["ph"]["value"], 7.0);
        assert!(json.get("level").is_none());
    }
}
