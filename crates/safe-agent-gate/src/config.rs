//! Gate configuration
//!
//! Layered: a configuration file, then `SAFE_AGENT_*` environment variables,
//! then whatever the caller overrides (the CLI).
//!
//! Task mode reads `safe-agent.yaml` from the working directory. The diff gate
//! never does: that file is part of the tree under review, so a change could
//! loosen its own gate. It takes an explicit file from outside the diff instead.

use safe_agent_core::{Error, Result, RiskLevel};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the optional configuration file in the working directory
pub const CONFIG_FILE_NAME: &str = "safe-agent.yaml";

/// Environment prefix for configuration overrides
pub const ENV_PREFIX: &str = "SAFE_AGENT";

/// Planner model used when none is configured
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Gate configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Root every change must stay inside
    pub working_directory: PathBuf,

    /// Planner model id
    pub model: String,

    /// Block any change at or above this risk level
    pub fail_on_risk: Option<RiskLevel>,

    /// No human is available to approve changes
    pub non_interactive: bool,

    /// Approve LOW risk changes the policy allows without prompting
    pub auto_approve_low_risk: bool,

    /// Decide but never execute
    pub dry_run: bool,

    /// Stricter operating mode
    pub compliance_mode: bool,

    /// Policy file, relative to the working directory
    pub policy_path: Option<String>,

    /// Bundled policy preset id
    pub policy_preset: Option<String>,

    /// Where to write the audit trail
    pub audit_export_path: Option<PathBuf>,

    /// Base ref for diff-gate mode
    pub diff_ref: Option<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            working_directory: PathBuf::from("."),
            model: DEFAULT_MODEL.to_string(),
            fail_on_risk: None,
            non_interactive: false,
            auto_approve_low_risk: false,
            dry_run: false,
            compliance_mode: false,
            policy_path: None,
            policy_preset: None,
            audit_export_path: None,
            diff_ref: None,
        }
    }
}

impl GateConfig {
    /// Load `safe-agent.yaml` (if present) and environment layers for `working_directory`
    pub fn load(working_directory: impl AsRef<Path>) -> Result<Self> {
        let working_directory = working_directory.as_ref();
        let file = working_directory.join(CONFIG_FILE_NAME);
        Self::load_layers(working_directory, Some((file.as_path(), false)))
    }

    /// Load configuration for the diff gate.
    ///
    /// Only `config_file` (which must exist) and the environment are read.
    /// `safe-agent.yaml` in the working directory is ignored.
    pub fn load_for_diff_gate(
        working_directory: impl AsRef<Path>,
        config_file: Option<&Path>,
    ) -> Result<Self> {
        Self::load_layers(working_directory.as_ref(), config_file.map(|f| (f, true)))
    }

    fn load_layers(working_directory: &Path, file: Option<(&Path, bool)>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some((path, required)) = file {
            builder = builder.add_source(config::File::from(path).required(required));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .map_err(|e| Error::config(format!("failed to load configuration: {}", e)))?;

        let mut loaded: Self = settings
            .try_deserialize()
            .map_err(|e| Error::config(format!("invalid configuration: {}", e)))?;
        loaded.working_directory = working_directory.to_path_buf();
        Ok(loaded)
    }

    /// Apply mode invariants: compliance mode never auto-approves
    pub fn normalized(mut self) -> Self {
        if self.compliance_mode {
            self.auto_approve_low_risk = false;
        }
        self
    }

    /// The per-change decision switches
    pub fn decision_settings(&self) -> DecisionSettings {
        DecisionSettings {
            fail_on_risk: self.fail_on_risk,
            non_interactive: self.non_interactive,
            auto_approve_low_risk: self.auto_approve_low_risk && !self.compliance_mode,
            dry_run: self.dry_run,
        }
    }
}

/// Switches consulted by the approval engine for every change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecisionSettings {
    pub fail_on_risk: Option<RiskLevel>,
    pub non_interactive: bool,
    pub auto_approve_low_risk: bool,
    pub dry_run: bool,
}

impl DecisionSettings {
    /// Settings for the diff gate: never interactive, never executes
    pub fn diff_gate(fail_on_risk: Option<RiskLevel>) -> Self {
        Self {
            fail_on_risk,
            non_interactive: true,
            auto_approve_low_risk: false,
            dry_run: false,
        }
    }

    /// Whether `level` meets the configured threshold
    pub fn fails_on(&self, level: RiskLevel) -> bool {
        self.fail_on_risk.is_some_and(|threshold| level.meets(threshold))
    }
}
