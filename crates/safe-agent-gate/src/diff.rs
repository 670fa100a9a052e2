//! Git diff gate
//!
//! Derives the change list from `git diff` (plus untracked files when
//! comparing against the working tree) and runs it through the approval
//! engine without a planner or a human. Nothing is ever written to disk.

use safe_agent_core::{Change, Error, PathSafetyResolver, Result, RiskLevel};
use safe_agent_policy::{LoadedPolicy, PolicySource};
use safe_agent_telemetry::{ReportBuilder, RunMode, RunResult};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

use crate::config::{DecisionSettings, GateConfig};
use crate::engine::{ApprovalEngine, Collaborators, RunState};

/// Longest file content handed to the collaborators, in characters
pub const MAX_CONTENT_CHARS: usize = 200_000;

/// Check a user-supplied base ref before it reaches a git command line.
///
/// Returns the trimmed ref.
pub fn validate_diff_ref(raw: &str) -> Result<String> {
    let reference = raw.trim();
    if reference.is_empty() {
        return Err(Error::invalid_diff_ref("diff ref cannot be empty"));
    }
    if reference.starts_with('-') {
        return Err(Error::invalid_diff_ref("diff ref cannot start with '-'"));
    }
    if reference.contains('\0') {
        return Err(Error::invalid_diff_ref("diff ref contains invalid characters"));
    }
    if reference.chars().any(char::is_whitespace) {
        return Err(Error::invalid_diff_ref("diff ref cannot contain whitespace"));
    }
    Ok(reference.to_string())
}

/// Turns a git diff into proposed changes
#[derive(Debug, Clone)]
pub struct DiffChangeCollector {
    working_directory: PathBuf,
    resolver: PathSafetyResolver,
    base_ref: Option<String>,
}

impl DiffChangeCollector {
    /// Compare `HEAD` to the working tree, or `base_ref...HEAD` when given
    pub fn new(working_directory: impl AsRef<Path>, base_ref: Option<&str>) -> Result<Self> {
        let resolver = PathSafetyResolver::new(working_directory.as_ref())?;
        let base_ref = base_ref.map(validate_diff_ref).transpose()?;
        Ok(Self {
            working_directory: working_directory.as_ref().to_path_buf(),
            resolver,
            base_ref,
        })
    }

    pub fn base_ref(&self) -> Option<&str> {
        self.base_ref.as_deref()
    }

    /// Collect changes in diff order, untracked files last
    pub fn collect(&self) -> Result<Vec<Change>> {
        self.git(&["rev-parse", "--is-inside-work-tree"])?;

        let raw = match &self.base_ref {
            Some(base) => {
                let commit = format!("{}^{{commit}}", base);
                self.git(&["rev-parse", "--verify", "--quiet", "--end-of-options", &commit])?;
                let range = format!("{}...HEAD", base);
                self.git(&[
                    "diff",
                    "-z",
                    "--name-status",
                    "--find-renames",
                    "--diff-filter=ACDMR",
                    &range,
                ])?
            }
            None => self.git(&[
                "diff",
                "-z",
                "--name-status",
                "--find-renames",
                "--diff-filter=ACDMR",
                "HEAD",
            ])?,
        };

        let mut changes = parse_name_status(&raw);

        if self.base_ref.is_none() {
            let listed: HashSet<String> = changes.iter().map(|c| c.path.clone()).collect();
            let untracked = self.git(&["ls-files", "-z", "--others", "--exclude-standard"])?;
            for path in untracked.split('\0').filter(|p| !p.is_empty()) {
                if !listed.contains(path) {
                    changes.push(Change::create(path));
                }
            }
        }

        for change in &mut changes {
            if change.action != "delete" {
                change.content = Some(self.read_content(&change.path));
            } else {
                change.content = Some(String::new());
            }
        }

        info!(
            changes = changes.len(),
            base_ref = ?self.base_ref,
            "Collected diff changes"
        );
        Ok(changes)
    }

    /// File content for the analyzer: lossy UTF-8, truncated, empty when unreadable
    fn read_content(&self, path: &str) -> String {
        let Some(resolved) = self.resolver.resolve(path) else {
            return String::new();
        };
        match std::fs::read(&resolved.absolute) {
            Ok(bytes) => truncate_chars(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => {
                debug!(path = %path, error = %e, "Could not read changed file");
                String::new()
            }
        }
    }

    fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.working_directory)
            .args(args)
            .output()
            .map_err(|e| Error::git(args.join(" "), e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            let detail = if !stderr.is_empty() {
                stderr
            } else if !stdout.is_empty() {
                stdout
            } else {
                "unknown git error".to_string()
            };
            return Err(Error::git(args.join(" "), detail));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Map `git diff -z --name-status` output to changes; renames become delete + create
///
/// Records are NUL-separated: a status, then one path (two for renames and
/// copies). Paths are verbatim, so non-ASCII names are never quoted.
pub fn parse_name_status(raw: &str) -> Vec<Change> {
    let mut changes = Vec::new();
    let mut fields = raw.split('\0').filter(|f| !f.is_empty());

    while let Some(status) = fields.next() {
        match status.chars().next() {
            Some('A') => changes.extend(fields.next().map(Change::create)),
            Some('M') => changes.extend(fields.next().map(Change::modify)),
            Some('D') => changes.extend(fields.next().map(Change::delete)),
            Some('R') => {
                let (Some(old), Some(new)) = (fields.next(), fields.next()) else {
                    break;
                };
                changes.push(Change::delete(old).with_description(format!("rename-delete {}", old)));
                changes.push(Change::create(new).with_description(format!("rename-create {}", new)));
            }
            Some('C') => {
                let source = fields.next();
                let copy = fields.next();
                debug!(source = ?source, copy = ?copy, "Skipping copied file");
            }
            _ => {
                let path = fields.next();
                debug!(status = %status, path = ?path, "Skipping diff entry");
            }
        }
    }

    changes
}

fn truncate_chars(mut text: String) -> String {
    if let Some((cut, _)) = text.char_indices().nth(MAX_CONTENT_CHARS) {
        text.truncate(cut);
    }
    text
}

/// Everything a finished diff gate run leaves behind
#[derive(Debug, Clone)]
pub struct DiffGateReport {
    pub state: RunState,
    pub result: RunResult,
    pub policy_source: String,
    pub fail_on_risk: Option<RiskLevel>,
}

impl DiffGateReport {
    pub fn reports(&self) -> ReportBuilder<'_> {
        ReportBuilder::new(
            RunMode::DiffGate,
            &self.state.log,
            &self.result,
            &self.policy_source,
            self.fail_on_risk,
        )
    }
}

/// API-keyless gate over a git diff
pub struct DiffGateRunner {
    collector: DiffChangeCollector,
    engine: ApprovalEngine,
}

impl DiffGateRunner {
    /// Build a runner with the standard collaborators and no approver
    pub fn new(config: &GateConfig) -> Result<Self> {
        Self::with_collaborators(config, Collaborators::standard()?)
    }

    /// Build a runner with custom collaborators; any approver is dropped
    pub fn with_collaborators(config: &GateConfig, mut collaborators: Collaborators) -> Result<Self> {
        let collector =
            DiffChangeCollector::new(&config.working_directory, config.diff_ref.as_deref())?;
        let resolver = PathSafetyResolver::new(&config.working_directory)?;
        let policy = LoadedPolicy::resolve(
            &resolver,
            config.policy_path.as_deref(),
            config.policy_preset.as_deref(),
            config.compliance_mode,
        )?;
        collaborators.approver = None;

        let engine = ApprovalEngine::new(
            resolver,
            policy,
            collaborators,
            DecisionSettings::diff_gate(config.fail_on_risk),
        );
        Ok(Self { collector, engine })
    }

    pub fn policy_source(&self) -> String {
        self.engine.policy().source.to_string()
    }

    /// Collect the diff and decide every change in order.
    ///
    /// Refuses to run when the diff touches the policy file gating it.
    pub async fn run(&self) -> Result<DiffGateReport> {
        let changes = self.collector.collect()?;
        self.check_policy_untouched(&changes)?;
        let mut state = RunState::new();

        for change in &changes {
            self.engine.decide(&mut state, change).await?;
        }

        let result = if changes.is_empty() {
            RunResult::empty()
        } else {
            state.to_result()
        };
        info!(
            success = result.success,
            approved = result.changes_made.len(),
            rejected = result.changes_rejected.len(),
            "Diff gate finished"
        );

        Ok(DiffGateReport {
            state,
            result,
            policy_source: self.policy_source(),
            fail_on_risk: self.engine.settings().fail_on_risk,
        })
    }

    fn check_policy_untouched(&self, changes: &[Change]) -> Result<()> {
        let PolicySource::File(policy_path) = &self.engine.policy().source else {
            return Ok(());
        };
        if let Some(change) = changes.iter().find(|c| &c.path == policy_path) {
            warn!(path = %change.path, action = %change.action, "Diff changes the policy file");
            return Err(Error::config(format!(
                "policy file {} is changed by the diff under review; use a preset or a policy file the diff leaves untouched",
                policy_path
            )));
        }
        Ok(())
    }
}
