//! CI-facing reports built from a run's governance log
//!
//! Every builder is a pure function of the event log and the run result.

use chrono::{DateTime, SecondsFormat, Utc};
use safe_agent_core::{Change, RiskLevel};
use serde::{Deserialize, Serialize};

use crate::events::{GovernanceEvent, GovernanceEventLog, Outcome};
use crate::run::{RunMode, RunResult};

/// Machine report schema version
pub const MACHINE_SCHEMA_VERSION: &str = "1";

/// Policy/scanner report written for CI artifacts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyReport {
    pub status: PolicyStatus,
    pub policy_source: String,
    pub fail_on_risk: Option<RiskLevel>,
    pub max_risk_level_seen: Option<RiskLevel>,
    pub risk_policy_failed: bool,
    pub governance_policy_failed: bool,
    pub governance_policy_reason: Option<String>,
    pub blocking_rule_ids: Vec<String>,
    pub recommended_next_actions: Vec<String>,
    pub events: Vec<GovernanceEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyStatus {
    Passed,
    Failed,
}

/// Overall status of a run for adapters and workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Passed,
    Failed,
    Blocked,
    RequiresApproval,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineSummary {
    pub planned_changes: usize,
    pub applied_changes: usize,
    pub rejected_changes: usize,
    pub max_risk_level_seen: Option<RiskLevel>,
}

/// `{action, path}` pair listed in the machine report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRef {
    pub action: String,
    pub path: String,
}

impl From<&Change> for ChangeRef {
    fn from(change: &Change) -> Self {
        Self {
            action: change.action.clone(),
            path: change.path.clone(),
        }
    }
}

/// Compact machine-readable run report.
///
/// Error reports carry only `schema_version`, `run_status`, `success` and
/// `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineReport {
    pub schema_version: String,
    pub run_status: RunStatus,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<MachineSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_changes: Option<Vec<ChangeRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_changes: Option<Vec<ChangeRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_report: Option<PolicyReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MachineReport {
    /// Report for a run that failed before any change was decided
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            schema_version: MACHINE_SCHEMA_VERSION.to_string(),
            run_status: RunStatus::Error,
            success: false,
            summary: None,
            applied_changes: None,
            rejected_changes: None,
            policy_report: None,
            error: Some(message.into()),
        }
    }
}

/// Builds every report for one finished (or interrupted) run
#[derive(Debug, Clone, Copy)]
pub struct ReportBuilder<'a> {
    mode: RunMode,
    log: &'a GovernanceEventLog,
    result: &'a RunResult,
    policy_source: &'a str,
    fail_on_risk: Option<RiskLevel>,
}

impl<'a> ReportBuilder<'a> {
    pub fn new(
        mode: RunMode,
        log: &'a GovernanceEventLog,
        result: &'a RunResult,
        policy_source: &'a str,
        fail_on_risk: Option<RiskLevel>,
    ) -> Self {
        Self {
            mode,
            log,
            result,
            policy_source,
            fail_on_risk,
        }
    }

    fn failed(&self) -> bool {
        self.result.policy_failed()
    }

    fn status_line(&self) -> String {
        if self.failed() {
            "- Result: ❌ FAIL".to_string()
        } else {
            "- Result: ✅ PASS".to_string()
        }
    }

    fn max_risk_label(&self) -> &'static str {
        self.result
            .max_risk_level_seen
            .map_or("NONE", |level| level.label())
    }

    fn applied_label(&self) -> (&'static str, &'static str) {
        match self.mode {
            RunMode::Task => ("Applied changes", "Skipped/rejected changes"),
            RunMode::DiffGate => ("Approved changes", "Rejected changes"),
        }
    }

    /// Fixed advisory list, in order; never empty
    pub fn recommended_next_actions(&self) -> Vec<String> {
        let mut actions = Vec::new();

        let blocking = self.log.blocking_rule_ids();
        if !blocking.is_empty() {
            actions.push(format!(
                "Review blocking policy rules ({}) and adjust task scope or policy.",
                blocking.join(", ")
            ));
        }
        if let (true, Some(threshold)) = (self.result.risk_policy_failed, self.fail_on_risk) {
            actions.push(format!(
                "Reduce change risk or adjust --fail-on-risk (currently {}).",
                threshold
            ));
        }
        if self
            .log
            .has_outcome(Outcome::BlockedNonInteractiveRequiresApproval)
        {
            actions.push(match self.mode {
                RunMode::Task => {
                    "Re-run interactively for manual approvals or use a more permissive preset."
                        .to_string()
                }
                RunMode::DiffGate => {
                    "Re-run in task mode (with API key) for manual approvals.".to_string()
                }
            });
        }
        let reasons = self.log.scanner_reason_ids();
        if !reasons.is_empty() {
            actions.push(format!(
                "Investigate scanner findings before merge ({}).",
                reasons.join(", ")
            ));
        }

        if actions.is_empty() {
            actions.push("No blocking findings. Safe to continue with normal review.".to_string());
        }
        actions
    }

    /// Concise markdown block for CI logs or PR comments
    pub fn ci_summary(&self) -> String {
        let (applied, rejected) = self.applied_label();
        let mut lines = vec!["### Safe Agent CI Summary".to_string(), self.status_line()];
        if self.mode == RunMode::DiffGate {
            lines.push("- Mode: API-keyless diff gate".to_string());
        }
        lines.extend([
            format!("- Planned changes: {}", self.log.len()),
            format!("- {}: {}", applied, self.result.changes_made.len()),
            format!("- {}: {}", rejected, self.result.changes_rejected.len()),
            format!("- Max risk seen: {}", self.max_risk_label()),
            format!(
                "- Blocking policy rules: {}",
                code_list(&self.log.blocking_rule_ids())
            ),
            format!(
                "- Scanner reason IDs: {}",
                code_list(&self.log.scanner_reason_ids())
            ),
            "- Recommended next actions:".to_string(),
        ]);
        lines.extend(
            self.recommended_next_actions()
                .into_iter()
                .map(|action| format!("  - {}", action)),
        );
        lines.join("\n")
    }

    pub fn policy_report(&self) -> PolicyReport {
        PolicyReport {
            status: if self.failed() {
                PolicyStatus::Failed
            } else {
                PolicyStatus::Passed
            },
            policy_source: self.policy_source.to_string(),
            fail_on_risk: self.fail_on_risk,
            max_risk_level_seen: self.result.max_risk_level_seen,
            risk_policy_failed: self.result.risk_policy_failed,
            governance_policy_failed: self.result.governance_policy_failed,
            governance_policy_reason: self.result.governance_policy_reason.clone(),
            blocking_rule_ids: self.log.blocking_rule_ids(),
            recommended_next_actions: self.recommended_next_actions(),
            events: self.log.events().to_vec(),
        }
    }

    /// `requires_approval` > `blocked` > caller's success flag
    pub fn run_status(&self, run_success: bool) -> RunStatus {
        if self
            .log
            .has_outcome(Outcome::BlockedNonInteractiveRequiresApproval)
        {
            RunStatus::RequiresApproval
        } else if self.failed() {
            RunStatus::Blocked
        } else if run_success {
            RunStatus::Passed
        } else {
            RunStatus::Failed
        }
    }

    pub fn machine_report(&self, run_success: bool) -> MachineReport {
        MachineReport {
            schema_version: MACHINE_SCHEMA_VERSION.to_string(),
            run_status: self.run_status(run_success),
            success: run_success,
            summary: Some(MachineSummary {
                planned_changes: self.log.len(),
                applied_changes: self.result.changes_made.len(),
                rejected_changes: self.result.changes_rejected.len(),
                max_risk_level_seen: self.result.max_risk_level_seen,
            }),
            applied_changes: Some(self.result.changes_made.iter().map(ChangeRef::from).collect()),
            rejected_changes: Some(
                self.result
                    .changes_rejected
                    .iter()
                    .map(ChangeRef::from)
                    .collect(),
            ),
            policy_report: Some(self.policy_report()),
            error: None,
        }
    }

    /// Markdown scorecard stamped with the current time
    pub fn safety_scorecard(&self) -> String {
        self.safety_scorecard_at(Utc::now())
    }

    /// Markdown scorecard with an explicit generation time
    pub fn safety_scorecard_at(&self, generated_at: DateTime<Utc>) -> String {
        let (applied, rejected) = self.applied_label();
        let reasons = self.log.scanner_reason_ids();

        let mut lines = vec![
            "### Safe Agent Safety Scorecard".to_string(),
            format!(
                "- Generated at (UTC): {}",
                generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
            ),
            self.status_line(),
        ];
        if self.mode == RunMode::DiffGate {
            lines.push("- Mode: API-keyless diff gate".to_string());
        }
        lines.extend([
            format!("- Policy source: `{}`", self.policy_source),
            format!("- Max risk seen: {}", self.max_risk_label()),
            String::new(),
            "| Metric | Value |".to_string(),
            "| --- | --- |".to_string(),
            format!("| Planned changes | {} |", self.log.len()),
            format!("| {} | {} |", applied, self.result.changes_made.len()),
            format!("| {} | {} |", rejected, self.result.changes_rejected.len()),
            format!(
                "| Blocked by policy deny | {} |",
                self.log.count(Outcome::BlockedByPolicyDeny)
            ),
            format!(
                "| Blocked by fail-on-risk | {} |",
                self.log.count(Outcome::BlockedByFailOnRisk)
            ),
            format!(
                "| Blocked (non-interactive approval required) | {} |",
                self.log.count(Outcome::BlockedNonInteractiveRequiresApproval)
            ),
        ]);
        if self.mode == RunMode::Task {
            lines.push(format!(
                "| Dry-run skips | {} |",
                self.log.count(Outcome::BlockedDryRun)
            ));
        }
        lines.push(format!("| Scanner reason IDs (unique) | {} |", reasons.len()));

        let risk_counts = self.log.risk_counts();
        if !risk_counts.is_empty() {
            lines.extend([
                String::new(),
                "| Risk level | Count |".to_string(),
                "| --- | --- |".to_string(),
            ]);
            for level in RiskLevel::ALL {
                lines.push(format!(
                    "| {} | {} |",
                    level.label(),
                    risk_counts.get(&level).copied().unwrap_or(0)
                ));
            }
        }

        lines.push(String::new());
        lines.push(format!("- Scanner reason IDs: {}", code_list(&reasons)));
        lines.push("- Recommended next actions:".to_string());
        lines.extend(
            self.recommended_next_actions()
                .into_iter()
                .map(|action| format!("  - {}", action)),
        );
        lines.join("\n")
    }
}

fn code_list(items: &[String]) -> String {
    if items.is_empty() {
        return "none".to_string();
    }
    items
        .iter()
        .map(|item| format!("`{}`", item))
        .collect::<Vec<_>>()
        .join(", ")
}
