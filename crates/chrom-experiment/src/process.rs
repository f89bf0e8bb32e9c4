//! Process state machine driving one chromatography run.
//!
//! # State Machine
//!
//! ```text
//!                    ┌──────────────┐
//!                    │     Idle     │◀──────────────────────────┐
//!                    └──────┬───────┘                           │
//!                           │ start                             │
//!                           ▼                                   │
//!                    ┌──────────────┐                           │
//!                    │ Initializing │  pumps stopped, valves    │
//!                    └──────┬───────┘  closed, waste open       │
//!                           ▼                                   │
//!                    ┌──────────────┐                           │
//!                    │ Equilibrate  │  ≥ min BV, then detector  │
//!                    └──────┬───────┘  (skippable)              │
//!                           ▼                                   │
//!                 Feed ─▶ Wash ─▶ Elute    fixed durations      │
//!                                   │      (fraction outlet)    │
//!                                   ▼                           │
//!                    ┌──────────────┐                           │
//!                    │   Refresh    │  ≥ min BV, then detector  │
//!                    └──────┬───────┘  (skippable)              │
//!                           └───────────────────────────────────┘
//! ```
//!
//! Cancellation or a hardware fault at any point restores the safe state
//! (pumps stopped, valves closed) and returns to `Idle`.

use crate::context::{ExperimentContext, StagePlan};
use crate::equilibrium::EquilibriumDetector;
use crate::gateway::HardwareGateway;
use crate::runlog::RunLog;
use crate::state::SharedState;
use chrom_core::{ChromError, ChromResult, ProcessStage, SpectrometerKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// How a countdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitEnd {
    Elapsed,
    Skipped,
}

pub struct ProcessStateMachine {
    gateway: Arc<HardwareGateway>,
    state: Arc<SharedState>,
    context: Arc<ExperimentContext>,
    log: RunLog,
    cancel: watch::Receiver<bool>,
}

impl std::fmt::Debug for ProcessStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessStateMachine")
            .field("experiment_id", &self.context.experiment_id)
            .finish_non_exhaustive()
    }
}

impl ProcessStateMachine {
    pub fn new(
        gateway: Arc<HardwareGateway>,
        state: Arc<SharedState>,
        context: Arc<ExperimentContext>,
        log: RunLog,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            gateway,
            state,
            context,
            log,
            cancel,
        }
    }

    /// Execute every stage in order.
    ///
    /// On error (including cancellation) the hardware is returned to the
    /// safe state before the error is handed back. The stage is `Idle`
    /// whenever this returns.
    pub async fn run(mut self) -> ChromResult<()> {
        let result = self.execute().await;
        if let Err(err) = &result {
            if err.is_cancelled() {
                self.log.warn("Experiment cancelled, restoring safe state").await;
            } else {
                self.log
                    .error(&format!("Stage {} failed: {err}", self.state.stage()))
                    .await;
            }
            let policy = self.state.settings().safety.retry_policy();
            if let Err(cleanup) = self.gateway.restore_safe_state(&policy).await {
                tracing::error!(error = %cleanup, "Safe state could not be restored");
            }
        }
        self.state.clear_skip();
        self.state.set_stage(ProcessStage::Idle);
        result
    }

    async fn execute(&mut self) -> ChromResult<()> {
        self.initialize().await?;

        let ctx = Arc::clone(&self.context);
        self.gateway.set_valve_opening(ctx.waste_valve, 100.0).await?;
        self.gateway.set_pump_running(ctx.outlet_pump, true).await?;

        for plan in &ctx.plans {
            self.enter_stage(plan).await?;
            match plan.duration {
                Some(duration) => {
                    self.countdown(duration, false).await?;
                }
                None => self.wait_for_equilibrium(plan).await?,
            }
            self.state.clear_skip();
            self.log.info(&format!("Stage {} finished", plan.stage)).await;

            if plan.stage == ProcessStage::Equilibrate {
                for kind in [SpectrometerKind::Uv, SpectrometerKind::Nir] {
                    self.gateway.set_reference(kind).await?;
                }
                self.log.info("Reference spectra captured").await;
            }
        }

        self.state.set_stage(ProcessStage::Idle);
        self.log.info("All stages completed").await;
        Ok(())
    }

    async fn initialize(&mut self) -> ChromResult<()> {
        self.state.set_stage(ProcessStage::Initializing);
        self.state.reset_equilibrium();
        self.log.info("Initializing hardware").await;

        self.gateway.initialize_pumps().await?;
        self.gateway.close_all_valves().await?;

        let settle = self.state.settings().process.settle_time;
        self.countdown(settle, false).await?;
        self.log.info("Hardware initialized").await;
        Ok(())
    }

    async fn enter_stage(&mut self, plan: &StagePlan) -> ChromResult<()> {
        let ctx = Arc::clone(&self.context);
        match plan.stage {
            ProcessStage::Elute => {
                self.gateway.set_valve_opening(ctx.waste_valve, 0.0).await?;
                self.gateway.set_valve_opening(ctx.fraction_valve, 100.0).await?;
            }
            ProcessStage::Refresh => {
                self.gateway.set_valve_opening(ctx.waste_valve, 100.0).await?;
                self.gateway.set_valve_opening(ctx.fraction_valve, 0.0).await?;
            }
            _ => {}
        }

        self.state.set_stage(plan.stage);
        if plan.stage.is_equilibration() {
            self.state.reset_equilibrium();
        }
        self.switch_mode(plan).await?;

        let duration = match plan.duration {
            Some(d) => humantime_serde::re::humantime::format_duration(d).to_string(),
            None => "until equilibrium".to_string(),
        };
        self.log
            .info(&format!(
                "Stage {} started: {} at {:.1} rpm ({} BV/h) via {}, {}",
                plan.stage, plan.pump, plan.speed_rpm, plan.flow_bv_per_h, plan.valve, duration
            ))
            .await;
        Ok(())
    }

    /// Route flow through the stage's valve and pump only.
    async fn switch_mode(&mut self, plan: &StagePlan) -> ChromResult<()> {
        for valve in &self.context.stage_valves {
            if *valve != plan.valve {
                self.gateway.set_valve_opening(*valve, 0.0).await?;
            }
        }
        self.gateway.set_valve_opening(plan.valve, 100.0).await?;

        for pump in &self.context.stage_pumps {
            if *pump != plan.pump {
                self.gateway.set_pump_running(*pump, false).await?;
            }
        }
        self.gateway.set_pump_speed(plan.pump, plan.speed_rpm).await?;
        self.gateway.set_pump_running(plan.pump, true).await
    }

    async fn wait_for_equilibrium(&mut self, plan: &StagePlan) -> ChromResult<()> {
        let settings = self.state.settings();
        let min_bv = settings.equilibrium.min_bed_volumes;
        let minimum = Duration::try_from_secs_f64(min_bv * 3600.0 / plan.flow_bv_per_h)
            .map_err(|e| {
                ChromError::Configuration(format!(
                    "minimum of {min_bv} BV at {} BV/h: {e}",
                    plan.flow_bv_per_h
                ))
            })?;
        self.log
            .info(&format!(
                "Pumping at least {min_bv} BV ({}s) before checking equilibrium",
                minimum.as_secs()
            ))
            .await;

        if self.countdown(minimum, true).await? == WaitEnd::Skipped {
            self.log.info(&format!("Stage {} skipped", plan.stage)).await;
            return Ok(());
        }

        loop {
            let settings = self.state.settings();
            let windows = self.state.windows_snapshot();
            let evaluation = EquilibriumDetector::new(settings.equilibrium.clone())
                .evaluate(plan.stage, &windows);
            self.state.set_equilibrium(evaluation.status);
            if evaluation.reached {
                self.log
                    .info(&format!("Equilibrium reached in {}", plan.stage))
                    .await;
                return Ok(());
            }

            if self.countdown(settings.poll_interval(), true).await? == WaitEnd::Skipped {
                self.log.info(&format!("Stage {} skipped", plan.stage)).await;
                return Ok(());
            }
        }
    }

    /// Wait `total`, in steps of at most the configured wait tick.
    ///
    /// Returns early with [`WaitEnd::Skipped`] when `honor_skip` is set and a
    /// skip was requested, and with `Cancelled` as soon as the run is
    /// stopped.
    async fn countdown(&mut self, total: Duration, honor_skip: bool) -> ChromResult<WaitEnd> {
        let deadline = Instant::now().checked_add(total).ok_or_else(|| {
            ChromError::Configuration(format!("wait of {}s is out of range", total.as_secs()))
        })?;
        loop {
            if *self.cancel.borrow() {
                return Err(ChromError::Cancelled);
            }
            if honor_skip && self.state.skip_requested() {
                return Ok(WaitEnd::Skipped);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(WaitEnd::Elapsed);
            }
            let tick = self.state.settings().process.wait_tick;
            let step = tick.min(deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(step) => {}
                _ = self.cancel.wait_for(|stop| *stop) => return Err(ChromError::Cancelled),
            }
        }
    }
}
