//! Command-line arguments

use clap::{Args, Parser, Subcommand};
use safe_agent_core::RiskLevel;
use safe_agent_gate::GateConfig;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "safe-agent")]
#[command(version, about = "Preview, approve and audit every file change an agent makes", long_about = None)]
pub struct Cli {
    /// Working directory every change must stay inside
    #[arg(short = 'C', long, global = true, default_value = ".")]
    pub working_directory: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Plan a coding task and apply the approved changes
    Run(RunArgs),

    /// Gate the changes in a git diff without a planner (CI friendly)
    DiffGate(DiffGateArgs),

    /// Run an adversarial suite against the decision pipeline
    Adversarial(AdversarialArgs),

    /// List bundled policy presets
    Presets,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Task description
    pub task: Option<String>,

    /// Read the task from a file
    #[arg(short, long, conflicts_with = "task")]
    pub file: Option<PathBuf>,

    /// Use a fixed plan (JSON) instead of calling the planner
    #[arg(long, value_name = "FILE")]
    pub plan: Option<PathBuf>,

    /// Auto-approve LOW risk changes the policy allows
    #[arg(long)]
    pub auto_approve_low: bool,

    /// Decide but never write
    #[arg(long)]
    pub dry_run: bool,

    /// Never prompt (implied by CI or a non-terminal stdin/stdout)
    #[arg(long)]
    pub non_interactive: bool,

    /// Planner model
    #[arg(long)]
    pub model: Option<String>,

    /// Export the audit trail to this JSON file
    #[arg(long, value_name = "FILE")]
    pub audit_export: Option<PathBuf>,

    #[command(flatten)]
    pub gate: GateArgs,

    #[command(flatten)]
    pub reports: ReportArgs,
}

#[derive(Args, Debug)]
pub struct DiffGateArgs {
    /// Compare `<REF>...HEAD` instead of the working tree
    #[arg(long = "ref", value_name = "REF")]
    pub diff_ref: Option<String>,

    /// Gate configuration file; `safe-agent.yaml` in the gated tree is never read
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub gate: GateArgs,

    #[command(flatten)]
    pub reports: ReportArgs,
}

#[derive(Args, Debug)]
pub struct AdversarialArgs {
    /// Suite JSON file
    pub suite: PathBuf,

    /// Write the JSON report to a file
    #[arg(long, value_name = "FILE")]
    pub json_out: Option<PathBuf>,

    /// Write the markdown report to a file
    #[arg(long, value_name = "FILE")]
    pub markdown_out: Option<PathBuf>,
}

/// Policy and risk switches shared by `run` and `diff-gate`
#[derive(Args, Debug)]
pub struct GateArgs {
    /// Fail when any change meets or exceeds this risk (low, medium, high, critical)
    #[arg(long, value_name = "LEVEL")]
    pub fail_on_risk: Option<RiskLevel>,

    /// Policy file (JSON/YAML) inside the working directory
    #[arg(long, value_name = "FILE")]
    pub policy: Option<String>,

    /// Bundled policy preset (see `safe-agent presets`)
    #[arg(long, value_name = "ID")]
    pub policy_preset: Option<String>,

    /// Strict compliance mode (disables auto-approve)
    #[arg(long)]
    pub compliance_mode: bool,
}

/// Report artifacts shared by `run` and `diff-gate`
#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Print a markdown CI summary
    #[arg(long)]
    pub ci_summary: bool,

    /// Write the CI summary to a file
    #[arg(long, value_name = "FILE")]
    pub ci_summary_file: Option<PathBuf>,

    /// Write the policy report JSON to a file
    #[arg(long, value_name = "FILE")]
    pub policy_report: Option<PathBuf>,

    /// Print a markdown safety scorecard
    #[arg(long)]
    pub safety_scorecard: bool,

    /// Write the safety scorecard to a file
    #[arg(long, value_name = "FILE")]
    pub safety_scorecard_file: Option<PathBuf>,

    /// Write the machine report JSON to a file
    #[arg(long, value_name = "FILE")]
    pub machine_report: Option<PathBuf>,
}

impl GateArgs {
    /// Layer these flags over a loaded configuration
    pub fn apply(&self, config: &mut GateConfig) {
        if self.fail_on_risk.is_some() {
            config.fail_on_risk = self.fail_on_risk;
        }
        if self.policy.is_some() {
            config.policy_path = self.policy.clone();
        }
        if self.policy_preset.is_some() {
            config.policy_preset = self.policy_preset.clone();
        }
        if self.compliance_mode {
            config.compliance_mode = true;
        }
    }
}

impl RunArgs {
    pub fn apply(&self, config: &mut GateConfig) {
        self.gate.apply(config);
        if self.auto_approve_low {
            config.auto_approve_low_risk = true;
        }
        if self.dry_run {
            config.dry_run = true;
        }
        if self.non_interactive {
            config.non_interactive = true;
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if self.audit_export.is_some() {
            config.audit_export_path = self.audit_export.clone();
        }
    }
}

impl DiffGateArgs {
    pub fn apply(&self, config: &mut GateConfig) {
        self.gate.apply(config);
        if self.diff_ref.is_some() {
            config.diff_ref = self.diff_ref.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_flags_override_config() {
        let cli = Cli::parse_from([
            "safe-agent",
            "run",
            "add tests",
            "--dry-run",
            "--fail-on-risk",
            "HIGH",
            "--policy-preset",
            "fintech",
            "--model",
            "claude-test",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };

        let mut config = GateConfig {
            auto_approve_low_risk: true,
            ..GateConfig::default()
        };
        args.apply(&mut config);

        assert_eq!(args.task.as_deref(), Some("add tests"));
        assert!(config.dry_run);
        assert!(config.auto_approve_low_risk);
        assert_eq!(config.fail_on_risk, Some(RiskLevel::High));
        assert_eq!(config.policy_preset.as_deref(), Some("fintech"));
        assert_eq!(config.model, "claude-test");
    }

    #[test]
    fn test_diff_gate_ref() {
        let cli = Cli::parse_from(["safe-agent", "-C", "/repo", "diff-gate", "--ref", "origin/main"]);
        assert_eq!(cli.working_directory, PathBuf::from("/repo"));
        let Command::DiffGate(args) = cli.command else {
            panic!("expected diff-gate");
        };
        let mut config = GateConfig::default();
        args.apply(&mut config);
        assert_eq!(config.diff_ref.as_deref(), Some("origin/main"));
    }

    #[test]
    fn test_diff_gate_config_file() {
        let cli = Cli::parse_from(["safe-agent", "diff-gate", "--config", "/ci/gate.yaml"]);
        let Command::DiffGate(args) = cli.command else {
            panic!("expected diff-gate");
        };
        assert_eq!(args.config, Some(PathBuf::from("/ci/gate.yaml")));
    }

    #[test]
    fn test_bad_risk_level_rejected() {
        let parsed = Cli::try_parse_from(["safe-agent", "diff-gate", "--fail-on-risk", "severe"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_task_and_file_conflict() {
        let parsed = Cli::try_parse_from(["safe-agent", "run", "task", "--file", "task.md"]);
        assert!(parsed.is_err());
    }
}
