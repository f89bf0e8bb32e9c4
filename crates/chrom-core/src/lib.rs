//! `chrom-core`
//!
//! Core trait definitions and types for the chromatography column controller.
//!
//! This crate provides the building blocks shared by the driver, storage and
//! experiment crates: the synchronous driver capabilities, the process stage
//! enumeration, reading types, the fixed-capacity sliding windows used for
//! equilibrium detection, stability thresholds, persistence traits and the
//! error taxonomy.
//!
//! ## Key Types
//!
//! - [`ProcessStage`]: ordered stages of a chromatography run
//! - [`SlidingWindow`] / [`SignalWindows`]: lock-step signal history
//! - [`ExperimentRecord`]: persisted run configuration
//! - [`ChromError`]: error type with the run-level taxonomy
//! - [`DeviceSet`]: bundle of driver capabilities for one rig

pub mod device;
pub mod driver;
pub mod error;
pub mod error_recovery;
pub mod reading;
pub mod record;
pub mod stage;
pub mod thresholds;
pub mod window;

pub use device::{PumpDirection, PumpId, PumpState, ValveId, ValveState};
pub use driver::{DeviceSet, PumpDriver, SensorProbe, Spectrometer, ValveDriver};
pub use error::{ChromError, ChromResult, DriverError, DriverErrorKind};
pub use error_recovery::{retry_with_policy, RetryPolicy};
pub use reading::{ReadingKind, SensorKind, SensorReading, SensorSnapshot, SpectrometerKind};
pub use record::{
    ControlCommand, ExperimentId, ExperimentRecord, ExperimentRepository, RecordSink,
    RunTimeUpdate,
};
pub use stage::ProcessStage;
pub use thresholds::{
    SensorConstraints, SensorRange, SensorThresholds, StageConstraints, ThresholdProfile,
};
pub use window::{window_capacity, SignalWindows, SlidingWindow, Tick};
