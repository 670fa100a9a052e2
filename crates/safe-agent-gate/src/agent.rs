//! Task mode orchestration
//!
//! [`SafeAgent`] asks a planner for changes, decides each one through the
//! [`ApprovalEngine`], applies the approved ones and keeps the audit trail.

use safe_agent_core::{PathSafetyResolver, Result};
use safe_agent_policy::LoadedPolicy;
use safe_agent_telemetry::{
    AuditTrail, AuditTrailBuilder, FinalizeContext, ReportBuilder, RunMode, RunResult,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::GateConfig;
use crate::engine::{ApprovalEngine, Collaborators, RunState};
use crate::executor::ChangeExecutor;
use crate::planner::{PlanContext, Planner};

/// Plans, gates and applies the changes for one task
pub struct SafeAgent {
    config: GateConfig,
    planner: Arc<dyn Planner>,
    engine: ApprovalEngine,
    executor: ChangeExecutor,
    policy_source: String,
    audit: AuditTrailBuilder,
    state: RunState,
    result: RunResult,
    task: String,
    trail: Option<AuditTrail>,
}

impl SafeAgent {
    /// Build an agent; fails on configuration errors before any planning
    pub fn new(
        config: GateConfig,
        planner: Arc<dyn Planner>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let config = config.normalized();
        let resolver = PathSafetyResolver::new(&config.working_directory)?;
        let policy = LoadedPolicy::resolve(
            &resolver,
            config.policy_path.as_deref(),
            config.policy_preset.as_deref(),
            config.compliance_mode,
        )?;
        let policy_source = policy.source.to_string();

        let audit = AuditTrailBuilder::start(
            resolver.root(),
            planner.model().map(str::to_string),
            config.compliance_mode,
        );
        let engine = ApprovalEngine::new(
            resolver.clone(),
            policy,
            collaborators,
            config.decision_settings(),
        );

        Ok(Self {
            config,
            planner,
            engine,
            executor: ChangeExecutor::new(resolver),
            policy_source,
            audit,
            state: RunState::new(),
            result: RunResult::empty(),
            task: String::new(),
            trail: None,
        })
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn policy_source(&self) -> &str {
        &self.policy_source
    }

    /// Result of the last completed (or interrupted) run
    pub fn result(&self) -> &RunResult {
        &self.result
    }

    /// Plan `task`, then decide and apply every change in plan order.
    ///
    /// Planner, analyzer and execution errors end the run, as does an
    /// interrupted approval prompt. The events logged so far stay available
    /// through [`finalize_audit_trail`](Self::finalize_audit_trail).
    pub async fn run(&mut self, task: &str) -> Result<RunResult> {
        self.task = task.to_string();

        let context = PlanContext::gather(self.engine.resolver().root());
        let plan = self.planner.plan(task, &context).await?;

        if plan.is_empty() {
            info!("No file changes needed for this task");
            self.finalize_audit_trail();
            self.export_configured();
            self.result = RunResult::empty();
            return Ok(self.result.clone());
        }

        info!(summary = %plan.summary, changes = plan.changes.len(), "Plan received");

        for (index, change) in plan.changes.iter().enumerate() {
            info!(
                step = index + 1,
                total = plan.changes.len(),
                path = %change.path,
                action = %change.action,
                "Reviewing change"
            );
            let decision = self.engine.decide(&mut self.state, change).await?;
            if decision.approved() && !self.config.dry_run {
                self.executor.apply(change).await?;
            }
        }

        self.finalize_audit_trail();
        self.export_configured();

        info!(
            success = self.result.success,
            applied = self.result.changes_made.len(),
            rejected = self.result.changes_rejected.len(),
            max_risk = ?self.result.max_risk_level_seen,
            "Run finished"
        );
        Ok(self.result.clone())
    }

    /// Build the audit trail from everything logged so far
    pub fn finalize_audit_trail(&mut self) -> &AuditTrail {
        self.result = self.state.to_result();
        let trail = self.audit.finalize(FinalizeContext {
            task: &self.task,
            log: &self.state.log,
            result: &self.result,
            dry_run: self.config.dry_run,
            policy_file_present: self.policy_source.starts_with("file:"),
        });
        self.trail.insert(trail)
    }

    /// Export to `path`, or to the configured path when `None`.
    ///
    /// Returns `false` when there is nowhere to export to.
    pub fn export_audit_trail(&mut self, path: Option<&Path>) -> Result<bool> {
        let Some(target) = path
            .map(Path::to_path_buf)
            .or_else(|| self.config.audit_export_path.clone())
        else {
            return Ok(false);
        };
        if self.trail.is_none() {
            self.finalize_audit_trail();
        }
        if let Some(trail) = &self.trail {
            trail.export(&target)?;
        }
        Ok(true)
    }

    fn export_configured(&mut self) {
        if let Err(e) = self.export_audit_trail(None) {
            warn!(error = %e, "Failed to export audit trail");
        }
    }

    pub fn reports(&self) -> ReportBuilder<'_> {
        ReportBuilder::new(
            RunMode::Task,
            &self.state.log,
            &self.result,
            &self.policy_source,
            self.config.fail_on_risk,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::PlannedChanges;
    use safe_agent_core::Change;
    use safe_agent_telemetry::RunStatus;

    fn agent(dir: &tempfile::TempDir, config: GateConfig, changes: Vec<Change>) -> SafeAgent {
        let config = GateConfig {
            working_directory: dir.path().to_path_buf(),
            ..config
        };
        SafeAgent::new(
            config,
            Arc::new(PlannedChanges::from_changes(changes)),
            Collaborators::standard().unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_empty_plan_still_exports() {
        let dir = tempfile::tempdir().unwrap();
        let export = dir.path().join("out/audit.json");
        let config = GateConfig {
            audit_export_path: Some(export.clone()),
            ..GateConfig::default()
        };
        let mut agent = agent(&dir, config, Vec::new());

        let result = agent.run("nothing to do").await.unwrap();
        assert!(result.success);
        assert!(result.changes_made.is_empty());

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&export).unwrap()).unwrap();
        assert_eq!(value["task"]["task_description"], "nothing to do");
        assert_eq!(value["summary"]["total_changes_planned"], 0);
    }

    #[tokio::test]
    async fn test_compliance_mode_forces_auto_approve_off() {
        let dir = tempfile::tempdir().unwrap();
        let config = GateConfig {
            compliance_mode: true,
            auto_approve_low_risk: true,
            ..GateConfig::default()
        };
        let agent = agent(&dir, config, Vec::new());
        assert!(!agent.config().auto_approve_low_risk);
    }

    #[tokio::test]
    async fn test_non_interactive_applies_allowed_change() {
        let dir = tempfile::tempdir().unwrap();
        let config = GateConfig {
            non_interactive: true,
            ..GateConfig::default()
        };
        let change = Change::create("hello.py").with_content("print('hello')\n");
        let mut agent = agent(&dir, config, vec![change]);

        let result = agent.run("add hello").await.unwrap();
        assert!(result.success);
        assert_eq!(result.changes_made.len(), 1);
        assert!(dir.path().join("hello.py").exists());
        assert_eq!(agent.reports().run_status(result.success), RunStatus::Passed);
    }

    #[tokio::test]
    async fn test_dry_run_never_writes() {
        let dir = tempfile::tempdir().unwrap();
        let config = GateConfig {
            non_interactive: true,
            dry_run: true,
            ..GateConfig::default()
        };
        let change = Change::create("hello.py").with_content("print('hello')\n");
        let mut agent = agent(&dir, config, vec![change]);

        let result = agent.run("add hello").await.unwrap();
        assert_eq!(result.changes_made.len(), 1);
        assert!(!dir.path().join("hello.py").exists());

        let trail = agent.finalize_audit_trail();
        assert_eq!(trail.summary.changes_executed, 0);
        assert_eq!(trail.summary.changes_approved, 1);
    }

    #[test]
    fn test_conflicting_policy_sources_fail_fast() {
        let dir = tempfile::tempdir().unwrap();
        let config = GateConfig {
            working_directory: dir.path().to_path_buf(),
            policy_path: Some("policy.yaml".to_string()),
            policy_preset: Some("startup".to_string()),
            ..GateConfig::default()
        };
        let err = SafeAgent::new(
            config,
            Arc::new(PlannedChanges::default()),
            Collaborators::standard().unwrap(),
        )
        .err()
        .unwrap();
        assert!(err.is_configuration());
    }
}
