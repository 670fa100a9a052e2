//! Run-level result shared by the decision engine and the report builders

use safe_agent_core::{Change, RiskLevel};
use serde::{Deserialize, Serialize};

/// How a run was driven; selects report wording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Changes proposed by a planner, with a human available unless non-interactive
    Task,
    /// Changes derived from `git diff`, never interactive
    DiffGate,
}

/// Outcome of one run over a list of changes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,
    pub changes_made: Vec<Change>,
    pub changes_rejected: Vec<Change>,
    pub max_risk_level_seen: Option<RiskLevel>,
    pub risk_policy_failed: bool,
    pub governance_policy_failed: bool,
    pub governance_policy_reason: Option<String>,
}

impl RunResult {
    /// The result of a run with no changes
    pub fn empty() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// Whether either policy blocked a change
    pub fn policy_failed(&self) -> bool {
        self.risk_policy_failed || self.governance_policy_failed
    }
}
