//! Audit trail export
//!
//! An [`AuditTrailBuilder`] is created when a run starts and consumed once the
//! run ends (or is interrupted) to produce the [`AuditTrail`] record, which is
//! never mutated after that.

use chrono::{DateTime, Utc};
use safe_agent_core::{Result, RiskLevel};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

use crate::events::{GovernanceEvent, GovernanceEventLog, Outcome};
use crate::run::RunResult;

/// Export format version
pub const EXPORT_VERSION: &str = "1.0";

/// Agent identifier stamped into every export
pub fn agent_version() -> String {
    format!("safe-agent {}", env!("CARGO_PKG_VERSION"))
}

/// A complete audit record for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditTrail {
    pub audit_metadata: AuditMetadata,
    pub task: TaskInfo,
    pub changes: Vec<AuditChangeRecord>,
    pub summary: AuditSummary,
    pub compliance_flags: ComplianceFlags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditMetadata {
    pub export_version: String,
    pub agent_version: String,
    pub compliance_mode: bool,
    pub export_timestamp: DateTime<Utc>,
    pub run_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_description: String,
    pub requested_at: DateTime<Utc>,
    pub requested_by: String,
    pub working_directory: PathBuf,
    pub model_used: Option<String>,
}

/// One governance event with its position in the hash chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditChangeRecord {
    pub sequence: usize,
    #[serde(flatten)]
    pub event: GovernanceEvent,
    pub hash: String,
    pub previous_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub total_changes_planned: usize,
    pub changes_approved: usize,
    pub changes_rejected: usize,
    pub changes_executed: usize,
    pub max_risk_level_seen: Option<RiskLevel>,
    pub policy_violations: usize,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceFlags {
    pub compliance_mode_enabled: bool,
    /// No HIGH or CRITICAL change was applied without a human approving it
    pub all_high_risk_approved: bool,
    pub policy_file_present: bool,
    /// Set by the builder on every export, including partial ones
    pub audit_trail_complete: bool,
}

impl AuditTrail {
    /// Write the trail as pretty-printed UTF-8 JSON, creating parent directories
    pub fn export(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        std::fs::write(path, json)?;

        info!(
            path = %path.display(),
            run_id = %self.audit_metadata.run_id,
            changes = self.changes.len(),
            "Audit trail exported"
        );
        Ok(())
    }
}

/// Run-start skeleton of an audit trail
#[derive(Debug, Clone)]
pub struct AuditTrailBuilder {
    run_id: String,
    started_at: DateTime<Utc>,
    requested_by: String,
    working_directory: PathBuf,
    model_used: Option<String>,
    compliance_mode: bool,
}

/// Run-level inputs the builder needs at finalization
#[derive(Debug, Clone, Copy)]
pub struct FinalizeContext<'a> {
    pub task: &'a str,
    pub log: &'a GovernanceEventLog,
    pub result: &'a RunResult,
    pub dry_run: bool,
    pub policy_file_present: bool,
}

impl AuditTrailBuilder {
    /// Record the start of a run
    pub fn start(
        working_directory: impl Into<PathBuf>,
        model_used: Option<String>,
        compliance_mode: bool,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            requested_by: current_user(),
            working_directory: working_directory.into(),
            model_used,
            compliance_mode,
        }
    }

    /// Override the invoking user
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.requested_by = user.into();
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Build the trail, stamping the current time as the end of the run
    pub fn finalize(&self, ctx: FinalizeContext<'_>) -> AuditTrail {
        self.finalize_at(ctx, Utc::now())
    }

    /// Build the trail with an explicit end time
    pub fn finalize_at(&self, ctx: FinalizeContext<'_>, ended_at: DateTime<Utc>) -> AuditTrail {
        let approved = ctx.result.changes_made.len();
        let rejected = ctx.result.changes_rejected.len();
        let duration = (ended_at - self.started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        let changes = ctx
            .log
            .events()
            .iter()
            .enumerate()
            .map(|(sequence, event)| AuditChangeRecord {
                sequence,
                event: event.clone(),
                hash: ctx.log.hash_at(sequence).unwrap_or_default().to_string(),
                previous_hash: sequence
                    .checked_sub(1)
                    .and_then(|prev| ctx.log.hash_at(prev))
                    .map(str::to_string),
            })
            .collect();

        AuditTrail {
            audit_metadata: AuditMetadata {
                export_version: EXPORT_VERSION.to_string(),
                agent_version: agent_version(),
                compliance_mode: self.compliance_mode,
                export_timestamp: ended_at,
                run_id: self.run_id.clone(),
            },
            task: TaskInfo {
                task_description: ctx.task.to_string(),
                requested_at: self.started_at,
                requested_by: self.requested_by.clone(),
                working_directory: self.working_directory.clone(),
                model_used: self.model_used.clone(),
            },
            changes,
            summary: AuditSummary {
                total_changes_planned: approved + rejected,
                changes_approved: approved,
                changes_rejected: rejected,
                changes_executed: if ctx.dry_run { 0 } else { approved },
                max_risk_level_seen: ctx.result.max_risk_level_seen,
                policy_violations: ctx.log.count(Outcome::BlockedByPolicyDeny),
                duration_seconds: duration,
            },
            compliance_flags: ComplianceFlags {
                compliance_mode_enabled: self.compliance_mode,
                all_high_risk_approved: all_high_risk_approved(ctx.log),
                policy_file_present: ctx.policy_file_present,
                audit_trail_complete: true,
            },
        }
    }
}

/// True unless a HIGH/CRITICAL change went through without a human approving it
fn all_high_risk_approved(log: &GovernanceEventLog) -> bool {
    !log.events().iter().any(|event| {
        event.outcome.is_unattended_approval()
            && event.risk_level.is_some_and(|r| r.meets(RiskLevel::High))
    })
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|user| !user.trim().is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
