//! Closed-loop liquid level control.
//!
//! The level gauge reports the distance from the gauge to the liquid
//! surface; the controller turns that into an outlet pump speed. Two
//! strategies implement [`LevelController`]:
//!
//! - [`PidController`]: positional PID with integral separation
//! - [`FuzzyController`]: incremental Mamdani controller (rig default)
//!
//! [`run_level_control`] drives a controller periodically for the duration
//! of a run.

mod fuzzy;
mod pid;

pub use fuzzy::{FuzzyController, FuzzyParams};
pub use pid::{PidController, PidParams};

use crate::gateway::HardwareGateway;
use crate::settings::ExperimentSettings;
use chrom_core::{PumpId, SensorKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Invalid controller parameters.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControlError {
    #[error("Gain '{name}' must be finite and non-negative, got {value}")]
    InvalidGain { name: &'static str, value: f64 },

    #[error("Output range [{min}, {max}] is empty")]
    InvalidOutputRange { min: f64, max: f64 },

    #[error("Invalid controller parameter: {0}")]
    InvalidParameter(String),
}

impl From<ControlError> for chrom_core::ChromError {
    fn from(err: ControlError) -> Self {
        chrom_core::ChromError::Configuration(err.to_string())
    }
}

/// A controller mapping a level measurement to a pump speed.
pub trait LevelController: Send {
    /// Set the level setpoint and clear all internal state.
    fn set_target(&mut self, target: f64);

    /// Next speed command for `measurement`.
    fn compute(&mut self, measurement: f64) -> f64;

    /// Time between successive [`compute`](Self::compute) calls.
    fn set_period(&mut self, _period: Duration) {}

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerKind {
    Pid,
    #[default]
    Fuzzy,
}

impl std::fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerKind::Pid => f.write_str("pid"),
            ControllerKind::Fuzzy => f.write_str("fuzzy"),
        }
    }
}

/// Build the configured controller.
///
/// The fuzzy controller's rate term uses `interval` as its sample period.
pub fn build_controller(
    kind: ControllerKind,
    pid: PidParams,
    fuzzy: FuzzyParams,
    interval: Duration,
) -> Result<Box<dyn LevelController>, ControlError> {
    Ok(match kind {
        ControllerKind::Pid => Box::new(PidController::new(pid)?),
        ControllerKind::Fuzzy => Box::new(FuzzyController::new(fuzzy, interval)?),
    })
}

/// Periodically read the level and command the outlet pump until `stop`
/// flips to `true`.
///
/// Read or write failures are logged and the loop carries on. Once `stop`
/// is observed no further command is sent.
pub async fn run_level_control(
    gateway: Arc<HardwareGateway>,
    outlet: PumpId,
    mut controller: Box<dyn LevelController>,
    target: f64,
    mut settings: watch::Receiver<ExperimentSettings>,
    mut stop: watch::Receiver<bool>,
) {
    controller.set_target(target);
    let mut period = settings.borrow_and_update().control.interval;
    controller.set_period(period);
    tracing::info!(
        controller = controller.name(),
        %outlet,
        target_mm = target,
        "Level control started"
    );

    loop {
        if *stop.borrow() {
            break;
        }

        match gateway.read_sensor(SensorKind::Level).await {
            Ok(reading) => {
                let speed = controller.compute(reading.value);
                if *stop.borrow() {
                    break;
                }
                if let Err(err) = gateway.set_pump_speed(outlet, speed).await {
                    tracing::warn!(error = %err, "Level control could not set outlet speed");
                } else {
                    tracing::trace!(level_mm = reading.value, speed_rpm = speed, "Level control step");
                }
            }
            Err(err) => tracing::warn!(error = %err, "Level read failed"),
        }

        let interval = settings.borrow_and_update().control.interval;
        if interval != period {
            tracing::debug!(?interval, "Level control period changed");
            controller.set_period(interval);
            period = interval;
        }
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = stop.changed() => break,
        }
    }

    tracing::info!(%outlet, "Level control stopped");
}
