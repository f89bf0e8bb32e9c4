//! # chrom-daq
//!
//! Host side of the column controller: configuration loading and tracing
//! setup for the `chrom_daq` binary. The engine itself lives in the
//! workspace crates:
//!
//! - **`chrom-core`**: error taxonomy, driver capability traits, readings,
//!   sliding windows, thresholds and persistence traits.
//! - **`chrom-driver-mock`**: simulated pumps, valves, probe and
//!   spectrometers with error injection.
//! - **`chrom-storage`**: in-memory experiment repository and record sink.
//! - **`chrom-experiment`**: hardware gateway, sampling loop, equilibrium
//!   detection, level control, process state machine and orchestrator.

pub mod config;
pub mod logging;

pub use config::{load_record, AppConfig, LogFormat, LoggingConfig};
