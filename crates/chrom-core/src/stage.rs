//! Process stages of a chromatography run.
//!
//! ```text
//! Idle ─▶ Initializing ─▶ Equilibrate ─▶ Feed ─▶ Wash ─▶ Elute ─▶ Refresh ─▶ Idle
//!                  │            │          │       │        │         │
//!                  └────────────┴── cancel / fault ─┴────────┴─────────┴──▶ Idle
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStage {
    Initializing,
    Equilibrate,
    Feed,
    Wash,
    Elute,
    Refresh,
    Idle,
}

impl Default for ProcessStage {
    fn default() -> Self {
        ProcessStage::Idle
    }
}

impl ProcessStage {
    /// Stages whose exit condition is equilibrium rather than elapsed time.
    pub fn is_equilibration(&self) -> bool {
        matches!(self, ProcessStage::Equilibrate | ProcessStage::Refresh)
    }

    /// Stages that pump liquid through the column.
    pub fn is_flow_stage(&self) -> bool {
        matches!(
            self,
            ProcessStage::Equilibrate
                | ProcessStage::Feed
                | ProcessStage::Wash
                | ProcessStage::Elute
                | ProcessStage::Refresh
        )
    }

    /// The flow stages in execution order.
    pub const FLOW_ORDER: [ProcessStage; 5] = [
        ProcessStage::Equilibrate,
        ProcessStage::Feed,
        ProcessStage::Wash,
        ProcessStage::Elute,
        ProcessStage::Refresh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStage::Initializing => "initializing",
            ProcessStage::Equilibrate => "equilibrate",
            ProcessStage::Feed => "feed",
            ProcessStage::Wash => "wash",
            ProcessStage::Elute => "elute",
            ProcessStage::Refresh => "refresh",
            ProcessStage::Idle => "idle",
        }
    }
}

impl std::fmt::Display for ProcessStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
