//! Controller configuration using Figment
//!
//! Configuration is layered from:
//! 1. `chrom-daq.toml` (base configuration, every section optional)
//! 2. Environment variables prefixed with `CHROM_DAQ_`, nested keys split
//!    on a double underscore
//!
//! ```text
//! CHROM_DAQ_LOGGING__LEVEL=debug
//! CHROM_DAQ_SAMPLING__RUNNING_INTERVAL=2s
//! CHROM_DAQ_HARDWARE__OUTLET_PUMP=10
//! ```
//!
//! # Example
//! ```no_run
//! use chrom_daq::config::AppConfig;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = AppConfig::load_from("chrom-daq.toml")?;
//! config.validate()?;
//! let settings = config.into_settings();
//! # Ok(())
//! # }
//! ```

use chrom_core::{ChromError, ChromResult, ExperimentRecord};
use chrom_experiment::{
    ControlSettings, EquilibriumSettings, ExperimentSettings, HardwareMap, ProcessSettings,
    SafetySettings, SamplingSettings,
};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file name.
pub const DEFAULT_CONFIG_PATH: &str = "chrom-daq.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "CHROM_DAQ_";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Pretty-printed with colors (development)
    #[default]
    Pretty,
    /// Single-line without colors (production)
    Compact,
    /// One JSON object per event (log aggregation)
    Json,
}

/// Logging section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error; `RUST_LOG` takes precedence
    pub level: String,
    pub format: LogFormat,
    /// Emit span NEW/CLOSE events
    pub span_events: bool,
    pub file_and_line: bool,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            span_events: false,
            file_and_line: false,
            ansi: true,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub sampling: SamplingSettings,
    pub control: ControlSettings,
    pub equilibrium: EquilibriumSettings,
    pub process: ProcessSettings,
    pub hardware: HardwareMap,
    pub safety: SafetySettings,
}

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl AppConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file; a missing file leaves the defaults in place.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> ChromResult<()> {
        let level = self.logging.level.to_lowercase();
        if !VALID_LEVELS.contains(&level.as_str()) {
            return Err(ChromError::Configuration(format!(
                "Invalid logging.level '{}'. Must be one of: {}",
                self.logging.level,
                VALID_LEVELS.join(", ")
            )));
        }
        self.hardware.validate()?;
        self.settings().validate()
    }

    /// The run-time settings carried by this configuration.
    pub fn settings(&self) -> ExperimentSettings {
        ExperimentSettings {
            sampling: self.sampling.clone(),
            equilibrium: self.equilibrium.clone(),
            control: self.control.clone(),
            process: self.process.clone(),
            safety: self.safety.clone(),
        }
    }

    /// Split into run-time settings and the hardware map.
    pub fn into_settings(self) -> (ExperimentSettings, HardwareMap) {
        let settings = self.settings();
        (settings, self.hardware)
    }
}

/// Read one experiment record from a TOML file and validate it.
pub fn load_record<P: AsRef<Path>>(path: P) -> ChromResult<ExperimentRecord> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| {
        ChromError::Configuration(format!("cannot read record {}: {e}", path.display()))
    })?;
    let record: ExperimentRecord = toml::from_str(&text).map_err(|e| {
        ChromError::Configuration(format!("invalid record {}: {e}", path.display()))
    })?;
    record.validate()?;
    Ok(record)
}
