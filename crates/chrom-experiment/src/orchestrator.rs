//! Experiment lifecycle.
//!
//! [`ExperimentOrchestrator`] owns the sampling loop for its whole lifetime
//! and, per run, the level control task and the process state machine. At
//! most one run is active. Whatever way a run ends, the level control task
//! is stopped first and the hardware is then returned to the safe state.

use crate::context::ExperimentContext;
use crate::equilibrium::EquilibriumStatus;
use crate::gateway::{HardwareCommandState, HardwareGateway};
use crate::hardware_map::HardwareMap;
use crate::level::{build_controller, run_level_control};
use crate::process::ProcessStateMachine;
use crate::runlog::RunLog;
use crate::sampling::SamplingLoop;
use crate::settings::{ExperimentSettings, ParameterUpdate};
use crate::state::{RunOutcome, SharedState};
use chrom_core::{
    ChromError, ChromResult, DeviceSet, ExperimentId, ExperimentRepository, ProcessStage, PumpId,
    RecordSink, RunTimeUpdate, SpectrometerKind, ValveId,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Aggregated controller status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestratorState {
    pub running: bool,
    pub experiment_id: Option<ExperimentId>,
    pub stage: ProcessStage,
    pub equilibrium: EquilibriumStatus,
    pub hardware: HardwareCommandState,
    /// Ticks currently held in each sliding window.
    pub window_fill: usize,
    pub window_capacity: usize,
    pub last_outcome: Option<RunOutcome>,
}

struct ActiveRun {
    experiment_id: ExperimentId,
    cancel: watch::Sender<bool>,
    /// Flips to `true` once the run task has restored the safe state.
    done: watch::Receiver<bool>,
    handle: JoinHandle<()>,
}

struct Inner {
    gateway: Arc<HardwareGateway>,
    state: Arc<SharedState>,
    repository: Arc<dyn ExperimentRepository>,
    sink: Arc<dyn RecordSink>,
    hardware: HardwareMap,
    active: Mutex<Option<ActiveRun>>,
    shutdown: watch::Sender<bool>,
    sampling: Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable handle to the controller.
#[derive(Clone)]
pub struct ExperimentOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ExperimentOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentOrchestrator")
            .field("gateway", &self.inner.gateway)
            .field("experiment_id", &self.inner.state.experiment_id())
            .finish_non_exhaustive()
    }
}

impl ExperimentOrchestrator {
    /// Validate the configuration and start the sampling loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        devices: DeviceSet,
        hardware: HardwareMap,
        settings: ExperimentSettings,
        repository: Arc<dyn ExperimentRepository>,
        sink: Arc<dyn RecordSink>,
    ) -> ChromResult<Self> {
        settings.validate()?;
        hardware.validate()?;
        let gateway = Arc::new(HardwareGateway::new(devices));
        hardware.check_devices(&gateway.pump_ids(), &gateway.valve_ids())?;

        let state = Arc::new(SharedState::new(settings));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let sampling = SamplingLoop::new(Arc::clone(&gateway), Arc::clone(&state), Arc::clone(&sink));
        let sampling = tokio::spawn(sampling.run(shutdown_rx));

        tracing::info!(
            pumps = gateway.pump_ids().len(),
            valves = gateway.valve_ids().len(),
            "Experiment orchestrator ready"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                gateway,
                state,
                repository,
                sink,
                hardware,
                active: Mutex::new(None),
                shutdown,
                sampling: Mutex::new(Some(sampling)),
            }),
        })
    }

    /// The hardware gateway shared with every task.
    pub fn gateway(&self) -> &Arc<HardwareGateway> {
        &self.inner.gateway
    }

    /// State shared between the orchestrator and its tasks.
    pub fn shared_state(&self) -> &Arc<SharedState> {
        &self.inner.state
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start experiment `experiment_id`.
    ///
    /// Fails with `Conflict` while another run is active and with
    /// `Configuration` when the record is missing or invalid; in both cases
    /// nothing is touched.
    pub async fn start(&self, experiment_id: ExperimentId) -> ChromResult<()> {
        let inner = &self.inner;
        let mut active = inner.active.lock().await;
        if let Some(run) = active.as_ref() {
            if !run.handle.is_finished() {
                return Err(ChromError::Conflict {
                    experiment_id: run.experiment_id,
                });
            }
        }
        if let Some(finished) = active.take() {
            finished.handle.await?;
        }

        let record = inner
            .repository
            .fetch_record(experiment_id)
            .await
            .map_err(|e| ChromError::Persistence(e.to_string()))?
            .ok_or_else(|| {
                ChromError::Configuration(format!("experiment {experiment_id} not found"))
            })?;
        let context = Arc::new(ExperimentContext::from_record(&record, &inner.hardware)?);

        if let Err(err) = inner.repository.clear_records(experiment_id).await {
            tracing::warn!(experiment_id, error = %err, "Could not clear previous records");
        }
        if let Err(err) = inner
            .repository
            .set_run_times(experiment_id, RunTimeUpdate::Cleared)
            .await
        {
            tracing::warn!(experiment_id, error = %err, "Could not clear run times");
        }
        if let Err(err) = inner
            .repository
            .set_run_times(experiment_id, RunTimeUpdate::Started(Utc::now()))
            .await
        {
            tracing::warn!(experiment_id, error = %err, "Could not record start time");
        }

        let state = &inner.state;
        state.set_stage(ProcessStage::Initializing);
        state.clear_skip();
        state.reset_equilibrium();
        *state.context.lock() = Some(Arc::clone(&context));
        state.run.send_replace(Some(experiment_id));

        let (cancel, cancel_rx) = watch::channel(false);
        let (done_tx, done) = watch::channel(false);
        let handle = tokio::spawn(Self::run_task(Arc::clone(inner), context, cancel_rx, done_tx));
        *active = Some(ActiveRun {
            experiment_id,
            cancel,
            done,
            handle,
        });
        tracing::info!(experiment_id, "Experiment started");
        Ok(())
    }

    async fn run_task(
        inner: Arc<Inner>,
        context: Arc<ExperimentContext>,
        cancel: watch::Receiver<bool>,
        done: watch::Sender<bool>,
    ) {
        let experiment_id = context.experiment_id;
        let log = RunLog::new(Arc::clone(&inner.sink), Some(experiment_id));
        let settings = inner.state.settings();

        let (level_stop, level_stop_rx) = watch::channel(false);
        let level_task = match build_controller(
            settings.control.strategy,
            settings.control.pid,
            settings.control.fuzzy,
            settings.control.interval,
        ) {
            Ok(controller) => Some(tokio::spawn(run_level_control(
                Arc::clone(&inner.gateway),
                context.outlet_pump,
                controller,
                context.target_level_mm,
                inner.state.subscribe_settings(),
                level_stop_rx,
            ))),
            Err(err) => {
                log.error(&format!("Level control unavailable: {err}")).await;
                None
            }
        };

        let machine = ProcessStateMachine::new(
            Arc::clone(&inner.gateway),
            Arc::clone(&inner.state),
            Arc::clone(&context),
            log.clone(),
            cancel,
        );
        let result = machine.run().await;

        let outcome = match &result {
            Ok(()) => {
                if let Err(err) = inner
                    .repository
                    .set_run_times(experiment_id, RunTimeUpdate::Finished(Utc::now()))
                    .await
                {
                    tracing::warn!(experiment_id, error = %err, "Could not record end time");
                }
                log.info("Experiment has been completed").await;
                RunOutcome::Completed
            }
            Err(err) => {
                if let Err(e) = inner
                    .repository
                    .set_run_times(experiment_id, RunTimeUpdate::Cleared)
                    .await
                {
                    tracing::warn!(experiment_id, error = %e, "Could not clear run times");
                }
                if err.is_cancelled() {
                    log.warn("Experiment was stopped").await;
                    RunOutcome::Cancelled
                } else {
                    log.error(&format!("Experiment execution error: {err}")).await;
                    RunOutcome::Failed(err.to_string())
                }
            }
        };

        level_stop.send_replace(true);
        if let Some(task) = level_task {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "Level control task failed");
            }
        }

        let policy = settings.safety.retry_policy();
        if let Err(err) = inner.gateway.restore_safe_state(&policy).await {
            log.error(&format!("Safe state could not be restored: {err}")).await;
        }

        *inner.state.last_outcome.lock() = Some(outcome);
        inner.state.clear_run();
        done.send_replace(true);
        tracing::info!(experiment_id, "Experiment run finished");
    }

    /// Cancel the active run and wait for its cleanup.
    pub async fn stop(&self) -> ChromResult<()> {
        let mut active = self.inner.active.lock().await;
        let run = active.take().ok_or(ChromError::NotRunning)?;
        if run.handle.is_finished() {
            run.handle.await?;
            return Err(ChromError::NotRunning);
        }
        tracing::info!(experiment_id = run.experiment_id, "Stopping experiment");
        run.cancel.send_replace(true);
        run.handle.await?;
        Ok(())
    }

    /// Wait until the active run, if any, has finished.
    ///
    /// The run stays registered while waiting, so dropping this future
    /// leaves [`stop`](Self::stop) able to cancel it.
    pub async fn wait_idle(&self) -> ChromResult<()> {
        let mut done = match self.inner.active.lock().await.as_ref() {
            Some(run) => run.done.clone(),
            None => return Ok(()),
        };
        if done.wait_for(|finished| *finished).await.is_err() {
            // The run task went away without reporting; surface its panic.
            let run = self.inner.active.lock().await.take();
            if let Some(run) = run {
                run.handle.await?;
            }
        }
        Ok(())
    }

    /// End the current equilibration wait early.
    pub fn skip_stage(&self) -> ChromResult<()> {
        let state = &self.inner.state;
        if !state.is_running() {
            return Err(ChromError::NotRunning);
        }
        let stage = state.stage();
        if !stage.is_equilibration() {
            return Err(ChromError::NotSkippable(stage));
        }
        state.request_skip();
        tracing::info!(%stage, "Skip requested");
        Ok(())
    }

    /// Stop any run, then the sampling loop.
    pub async fn shutdown(&self) -> ChromResult<()> {
        match self.stop().await {
            Ok(()) | Err(ChromError::NotRunning) => {}
            Err(err) => return Err(err),
        }
        self.inner.shutdown.send_replace(true);
        if let Some(handle) = self.inner.sampling.lock().await.take() {
            handle.await?;
        }
        Ok(())
    }

    // =========================================================================
    // Status and parameters
    // =========================================================================

    /// Current status, hardware ledger included.
    pub fn state(&self) -> OrchestratorState {
        let state = &self.inner.state;
        let (window_fill, window_capacity) = {
            let windows = state.windows.lock();
            (windows.len(), windows.capacity())
        };
        OrchestratorState {
            running: state.is_running(),
            experiment_id: state.experiment_id(),
            stage: state.stage(),
            equilibrium: state.equilibrium(),
            hardware: self.inner.gateway.command_state(),
            window_fill,
            window_capacity,
            last_outcome: state.last_outcome(),
        }
    }

    /// The live run-time parameters.
    pub fn parameters(&self) -> ExperimentSettings {
        self.inner.state.settings()
    }

    /// Apply a live parameter change.
    ///
    /// Invalid values are rejected and leave the settings untouched.
    /// Changing the window span or running interval resizes the windows.
    pub fn set_parameter(&self, update: ParameterUpdate) -> ChromResult<()> {
        update.check()?;
        let state = &self.inner.state;
        let next = state.settings().with_update(&update)?;
        if update.affects_capacity() {
            state.windows.lock().resize(next.window_capacity());
        }
        tracing::info!(?update, capacity = next.window_capacity(), "Parameter updated");
        state.settings.send_replace(next);
        Ok(())
    }

    // =========================================================================
    // Manual device commands
    // =========================================================================

    /// Capture a reference spectrum; allowed with or without a run.
    pub async fn set_reference(&self, kind: SpectrometerKind) -> ChromResult<()> {
        self.inner.gateway.set_reference(kind).await
    }

    /// Capture a background spectrum; allowed with or without a run.
    pub async fn set_background(&self, kind: SpectrometerKind) -> ChromResult<()> {
        self.inner.gateway.set_background(kind).await
    }

    /// Label a pump; `None` clears the label.
    pub fn set_pump_alias(&self, pump: PumpId, alias: Option<String>) -> ChromResult<()> {
        self.inner.gateway.set_pump_alias(pump, alias)
    }

    /// Label a valve; `None` clears the label.
    pub fn set_valve_alias(&self, valve: ValveId, alias: Option<String>) -> ChromResult<()> {
        self.inner.gateway.set_valve_alias(valve, alias)
    }
}
