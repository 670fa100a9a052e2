//! Safe Agent Gate
//!
//! Puts every proposed file change behind a risk and policy decision before
//! it is applied:
//!
//! - [`ApprovalEngine`]: the per-change approval state machine
//! - [`DiffGateRunner`]: API-keyless gate over a `git diff`
//! - [`SafeAgent`]: task mode, planning with an LLM and applying approved changes
//! - [`AdversarialSuite`]: fixture-driven checks of the decision pipeline
//!
//! # Example
//!
//! ```no_run
//! use safe_agent_gate::{DiffGateRunner, GateConfig};
//!
//! # async fn example() -> safe_agent_core::Result<()> {
//! let config = GateConfig::load(".")?.normalized();
//! let report = DiffGateRunner::new(&config)?.run().await?;
//! println!("{}", report.reports().ci_summary());
//! # Ok(())
//! # }
//! ```

pub mod adversarial;
pub mod agent;
pub mod approval;
pub mod config;
pub mod diff;
pub mod engine;
pub mod executor;
pub mod planner;

pub use adversarial::{AdversarialCase, AdversarialReport, AdversarialSuite, CaseResult};
pub use agent::SafeAgent;
pub use approval::{ApprovalPrompt, Approver, TerminalApprover};
pub use config::{DecisionSettings, GateConfig};
pub use diff::{validate_diff_ref, DiffChangeCollector, DiffGateReport, DiffGateRunner};
pub use engine::{ApprovalEngine, Collaborators, Decision, RunState};
pub use executor::ChangeExecutor;
pub use planner::{AnthropicPlanner, Plan, PlanContext, PlannedChanges, Planner};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::agent::SafeAgent;
    pub use crate::config::GateConfig;
    pub use crate::diff::DiffGateRunner;
    pub use crate::engine::{ApprovalEngine, Collaborators, RunState};
    pub use crate::planner::{Planner, PlannedChanges};
}
