//! Error types for the chromatography controller.
//!
//! `ChromError` is the run-level error taxonomy. Using `thiserror`, it
//! separates the failure classes the process cares about:
//!
//! - **`HardwareCommand`**: a device read or write failed. Safety-relevant
//!   writes (stopping pumps, closing valves) are retried through
//!   [`crate::RetryPolicy`] before one of these is surfaced as fatal.
//! - **`Configuration`**: a malformed experiment record or invalid parameter.
//!   Fatal at run start; the run never begins.
//! - **`Cancelled`**: an external stop. Not a fault, but it still flows through
//!   the safe-hardware cleanup path.
//! - **`Conflict`** / **`NotSkippable`** / **`NotRunning`**: command-surface
//!   rejections reported back to the caller.
//!
//! Insufficient equilibrium history is deliberately *not* an error; the
//! detector simply reports "not yet stable".

use crate::record::ExperimentId;
use crate::stage::ProcessStage;
use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    Communication,
    Hardware,
    Timeout,
    InvalidParameter,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
        };
        write!(f, "{}", label)
    }
}

/// Structured error raised by a driver implementation.
#[derive(Error, Debug, Clone)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    pub driver_type: String,
    pub kind: DriverErrorKind,
    pub message: String,
}

impl DriverError {
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }
}

// =============================================================================
// Run Errors
// =============================================================================

/// Convenience alias for results using the controller error type.
pub type ChromResult<T> = std::result::Result<T, ChromError>;

/// Primary error type for the chromatography controller.
#[derive(Error, Debug)]
pub enum ChromError {
    /// A device command or read failed.
    ///
    /// `device` names the target ("pump 7", "valve 3", "uv"), `operation` the
    /// primitive that failed ("set_speed", "read_absorbance").
    #[error("Hardware command '{operation}' on {device} failed: {message}")]
    HardwareCommand {
        device: String,
        operation: &'static str,
        message: String,
    },

    /// Configuration validation failed.
    ///
    /// Raised for malformed experiment records, unknown hardware assignments
    /// and out-of-range live parameters.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// A start was requested while another run is active.
    #[error("Experiment {experiment_id} is already running")]
    Conflict { experiment_id: ExperimentId },

    /// Skip was requested outside an equilibration stage.
    #[error("Stage '{0}' cannot be skipped")]
    NotSkippable(ProcessStage),

    /// A run-scoped command was issued with no run active.
    #[error("No experiment is running")]
    NotRunning,

    /// The run was stopped externally.
    #[error("Experiment was cancelled")]
    Cancelled,

    /// The persistence layer failed.
    ///
    /// Only surfaced where a persistence read is required to proceed
    /// (fetching the experiment record); appends are logged and dropped.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A background task panicked or was aborted unexpectedly.
    #[error("Task join error: {0}")]
    TaskJoin(String),
}

impl ChromError {
    pub fn hardware(
        device: impl std::fmt::Display,
        operation: &'static str,
        err: impl std::fmt::Display,
    ) -> Self {
        ChromError::HardwareCommand {
            device: device.to_string(),
            operation,
            message: err.to_string(),
        }
    }

    /// True for the cancellation path, which is a normal termination.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ChromError::Cancelled)
    }
}

impl From<tokio::task::JoinError> for ChromError {
    fn from(err: tokio::task::JoinError) -> Self {
        ChromError::TaskJoin(err.to_string())
    }
}
