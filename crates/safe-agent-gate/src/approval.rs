//! Human approval of a single change

use dialoguer::Confirm;
use std::io;
use safe_agent_classifiers::ScanResult;
use safe_agent_core::{ActionRequest, Change, Error, Preview, Result, RiskLevel};
use safe_agent_policy::PolicyResult;

/// Everything a human needs to decide on one change
#[derive(Debug, Clone, Copy)]
pub struct ApprovalPrompt<'a> {
    pub change: &'a Change,
    pub request: &'a ActionRequest,
    pub preview: &'a Preview,
    pub policy: &'a PolicyResult,
    pub scan: &'a ScanResult,
}

impl ApprovalPrompt<'_> {
    /// Suggested answer: approve only LOW risk
    pub fn default_answer(&self) -> bool {
        self.preview.risk_level == RiskLevel::Low
    }

    /// Multi-line preview shown before asking
    pub fn render(&self) -> String {
        let mut lines = vec![
            format!(
                "{} {} [{}]",
                self.request.action.as_str().to_uppercase(),
                self.request.relative_path,
                self.preview.risk_level.label()
            ),
            format!("  {}", self.request.description),
        ];

        for factor in &self.preview.risk_factors {
            lines.push(format!("  risk: {}", factor));
        }
        for file in &self.preview.file_changes {
            lines.push(format!(
                "  lines: {} -> {} (+{} -{})",
                file.lines_before, file.lines_after, file.lines_added, file.lines_removed
            ));
        }

        let rule = self.policy.matched_rule_id.as_deref().unwrap_or("default");
        lines.push(format!("  policy: {} ({})", self.policy.decision, rule));

        if let Some(severity) = self.scan.max_severity() {
            lines.push(format!(
                "  scanner: {} ({})",
                severity,
                self.scan.reason_ids().join(", ")
            ));
        }

        lines.join("\n")
    }
}

/// Asks a human to approve a change
pub trait Approver: Send + Sync {
    /// `Ok(true)` approves.
    ///
    /// [`Error::Interrupted`] stops the run; any other error rejects the change.
    fn confirm(&self, prompt: &ApprovalPrompt<'_>) -> Result<bool>;
}

/// Terminal approver writing the preview to stderr
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalApprover;

impl TerminalApprover {
    pub fn new() -> Self {
        Self
    }
}

impl Approver for TerminalApprover {
    fn confirm(&self, prompt: &ApprovalPrompt<'_>) -> Result<bool> {
        eprintln!("\n{}", prompt.render());
        Confirm::new()
            .with_prompt("Apply this change?")
            .default(prompt.default_answer())
            .interact()
            .map_err(prompt_error)
    }
}

/// Ctrl-C in raw mode reaches the prompt as a key, not a signal, and comes
/// back as an `Interrupted` I/O error.
fn prompt_error(err: dialoguer::Error) -> Error {
    let dialoguer::Error::IO(io_err) = err;
    if io_err.kind() == io::ErrorKind::Interrupted {
        Error::interrupted("approval prompt cancelled")
    } else {
        Error::approval(io_err.to_string())
    }
}
