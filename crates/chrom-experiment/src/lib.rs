//! `chrom-experiment`
//!
//! Run-time half of the column controller: the async hardware gateway, the
//! sampling loop, equilibrium detection, level control, the process state
//! machine and the orchestrator tying them together.
//!
//! ## Task layout
//!
//! ```text
//! ExperimentOrchestrator
//!   ├── SamplingLoop          (orchestrator lifetime)
//!   └── per run
//!       ├── run_level_control (stopped before cleanup)
//!       └── ProcessStateMachine
//!             └── EquilibriumDetector (reads the shared windows)
//! ```

pub mod context;
pub mod equilibrium;
pub mod gateway;
pub mod hardware_map;
pub mod level;
pub mod orchestrator;
pub mod pca;
pub mod process;
pub mod runlog;
pub mod sampling;
pub mod settings;
pub mod state;

pub use context::{ExperimentContext, StagePlan};
pub use equilibrium::{EquilibriumDetector, EquilibriumStatus, Evaluation};
pub use gateway::{HardwareCommandState, HardwareGateway};
pub use hardware_map::{HardwareMap, PumpCalibration, StageAssignment, StageAssignments};
pub use level::{
    build_controller, run_level_control, ControlError, ControllerKind, FuzzyController,
    FuzzyParams, LevelController, PidController, PidParams,
};
pub use orchestrator::{ExperimentOrchestrator, OrchestratorState};
pub use process::ProcessStateMachine;
pub use runlog::RunLog;
pub use sampling::SamplingLoop;
pub use settings::{
    ControlSettings, EquilibriumSettings, ExperimentSettings, ParameterUpdate, ProcessSettings,
    SafetySettings, SamplingSettings,
};
pub use state::{RunOutcome, SharedState};
