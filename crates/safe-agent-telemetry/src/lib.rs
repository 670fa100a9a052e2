//! Safe Agent Telemetry
//!
//! Everything a run leaves behind:
//! - The governance event log (one hash-chained event per proposed change)
//! - The exported audit trail
//! - CI summary, policy report, safety scorecard, and machine report
//! - Decision metrics through the `metrics` facade

pub mod audit;
pub mod events;
pub mod metrics;
pub mod reports;
pub mod run;

pub use audit::{AuditTrail, AuditTrailBuilder, FinalizeContext};
pub use events::{GovernanceEvent, GovernanceEventLog, Outcome};
pub use reports::{MachineReport, PolicyReport, ReportBuilder, RunStatus};
pub use run::{RunMode, RunResult};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::audit::{AuditTrail, AuditTrailBuilder};
    pub use crate::events::{GovernanceEvent, GovernanceEventLog, Outcome};
    pub use crate::reports::ReportBuilder;
    pub use crate::run::{RunMode, RunResult};
}
