//! State shared between the sampling loop, the process state machine and
//! the orchestrator.
//!
//! Values the tasks wait on (settings, run flag, stage) are `watch`
//! channels; the sliding windows sit behind one lock so the three signals
//! always advance together.

use crate::context::ExperimentContext;
use crate::equilibrium::EquilibriumStatus;
use crate::settings::ExperimentSettings;
use chrom_core::{ExperimentId, ProcessStage, SignalWindows};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// How the last run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "message", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every stage ran to the end.
    Completed,
    /// Stopped on request.
    Cancelled,
    /// Aborted by an error, with its message.
    Failed(String),
}

/// Everything the controller's tasks read and write concurrently.
#[derive(Debug)]
pub struct SharedState {
    pub(crate) settings: watch::Sender<ExperimentSettings>,
    pub(crate) windows: Mutex<SignalWindows>,
    /// `Some(id)` while an experiment runs.
    pub(crate) run: watch::Sender<Option<ExperimentId>>,
    pub(crate) stage: watch::Sender<ProcessStage>,
    pub(crate) equilibrium: Mutex<EquilibriumStatus>,
    pub(crate) skip: AtomicBool,
    pub(crate) context: Mutex<Option<Arc<ExperimentContext>>>,
    pub(crate) last_outcome: Mutex<Option<RunOutcome>>,
}

impl SharedState {
    /// Idle state with windows sized for `settings`.
    pub fn new(settings: ExperimentSettings) -> Self {
        let capacity = settings.window_capacity();
        Self {
            settings: watch::Sender::new(settings),
            windows: Mutex::new(SignalWindows::new(capacity)),
            run: watch::Sender::new(None),
            stage: watch::Sender::new(ProcessStage::Idle),
            equilibrium: Mutex::new(EquilibriumStatus::default()),
            skip: AtomicBool::new(false),
            context: Mutex::new(None),
            last_outcome: Mutex::new(None),
        }
    }

    /// Copy of the live settings.
    pub fn settings(&self) -> ExperimentSettings {
        self.settings.borrow().clone()
    }

    /// Watch the live settings.
    pub fn subscribe_settings(&self) -> watch::Receiver<ExperimentSettings> {
        self.settings.subscribe()
    }

    /// Copy of the windows, taken under the lock.
    pub fn windows_snapshot(&self) -> SignalWindows {
        self.windows.lock().clone()
    }

    /// The running experiment, if any.
    pub fn experiment_id(&self) -> Option<ExperimentId> {
        *self.run.borrow()
    }

    /// Whether a run is active.
    pub fn is_running(&self) -> bool {
        self.run.borrow().is_some()
    }

    /// Current process stage.
    pub fn stage(&self) -> ProcessStage {
        *self.stage.borrow()
    }

    /// Watch stage transitions.
    pub fn subscribe_stage(&self) -> watch::Receiver<ProcessStage> {
        self.stage.subscribe()
    }

    pub(crate) fn set_stage(&self, stage: ProcessStage) {
        self.stage.send_replace(stage);
    }

    /// Latest equilibrium evaluation.
    pub fn equilibrium(&self) -> EquilibriumStatus {
        *self.equilibrium.lock()
    }

    pub(crate) fn set_equilibrium(&self, status: EquilibriumStatus) {
        *self.equilibrium.lock() = status;
    }

    pub(crate) fn reset_equilibrium(&self) {
        self.equilibrium.lock().reset();
    }

    pub(crate) fn request_skip(&self) {
        self.skip.store(true, Ordering::SeqCst);
    }

    /// Whether a skip of the current equilibration wait is pending.
    pub fn skip_requested(&self) -> bool {
        self.skip.load(Ordering::SeqCst)
    }

    pub(crate) fn clear_skip(&self) {
        self.skip.store(false, Ordering::SeqCst);
    }

    /// Resolved context of the active run.
    pub fn context(&self) -> Option<Arc<ExperimentContext>> {
        self.context.lock().clone()
    }

    /// How the most recent run ended, `None` before the first run.
    pub fn last_outcome(&self) -> Option<RunOutcome> {
        self.last_outcome.lock().clone()
    }

    /// Return to idle after a run: no run id, stage `Idle`, no context,
    /// cleared equilibrium flags and skip request.
    pub(crate) fn clear_run(&self) {
        self.run.send_replace(None);
        self.set_stage(ProcessStage::Idle);
        *self.context.lock() = None;
        self.reset_equilibrium();
        self.clear_skip();
    }
}
