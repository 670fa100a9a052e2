//! Core types for Safe Agent

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Risk level assigned to a single proposed change
///
/// Variants are declared in severity order so the derived `Ord` matches
/// [`RiskLevel::severity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// All levels, lowest first
    pub const ALL: [RiskLevel; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    /// Severity index (0..=3)
    pub fn severity(&self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }

    /// Whether this level meets or exceeds `threshold`
    pub fn meets(&self, threshold: RiskLevel) -> bool {
        self.severity() >= threshold.severity()
    }

    /// Lowercase wire label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Uppercase label used in markdown reports
    pub fn label(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!(
                "unknown risk level '{}' (expected low, medium, high or critical)",
                other
            )),
        }
    }
}

/// Tracks the highest risk level observed during a run.
///
/// The tracked value never decreases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaxRisk(Option<RiskLevel>);

impl MaxRisk {
    /// Fold a newly observed level into the maximum
    pub fn note(&mut self, level: RiskLevel) {
        match self.0 {
            Some(current) if current.severity() >= level.severity() => {}
            _ => self.0 = Some(level),
        }
    }

    /// Highest level seen so far
    pub fn get(&self) -> Option<RiskLevel> {
        self.0
    }
}

/// The three file actions the gate understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    #[serde(alias = "file_create")]
    Create,
    #[serde(alias = "file_write")]
    Modify,
    #[serde(alias = "file_delete")]
    Delete,
}

impl ChangeAction {
    /// Parse an untrusted action label
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "create" => Some(Self::Create),
            "modify" => Some(Self::Modify),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Wire label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A proposed file change, as produced by a change source.
///
/// `action` and `path` are untrusted: planners may emit anything, so both are
/// kept verbatim and validated by the decision engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Requested action label (`create`, `modify` or `delete` when well-formed)
    pub action: String,

    /// Path relative to the working directory
    pub path: String,

    /// Human description of the change
    #[serde(default)]
    pub description: String,

    /// New file content for create/modify
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Change {
    /// Create a change with the given action and path
    pub fn new(action: impl Into<String>, path: impl Into<String>) -> Self {
        let action = action.into();
        let path = path.into();
        let description = format!("{} {}", action, path);
        Self {
            action,
            path,
            description,
            content: None,
        }
    }

    /// Create a `create` change
    pub fn create(path: impl Into<String>) -> Self {
        Self::new("create", path)
    }

    /// Create a `modify` change
    pub fn modify(path: impl Into<String>) -> Self {
        Self::new("modify", path)
    }

    /// Create a `delete` change
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new("delete", path)
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the content
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// The parsed action, if it is one the gate understands
    pub fn action_kind(&self) -> Option<ChangeAction> {
        ChangeAction::parse(&self.action)
    }

    /// Content or the empty string
    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// A validated request handed to the governance collaborators
#[derive(Debug, Clone)]
pub struct ActionRequest {
    /// Validated action
    pub action: ChangeAction,

    /// Canonical absolute target inside the working directory
    pub target: PathBuf,

    /// Target relative to the working directory, `/`-separated
    pub relative_path: String,

    /// Human description
    pub description: String,

    /// Proposed content (empty for deletes)
    pub content: String,
}

/// Impact preview for a single request, produced by an analyzer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preview {
    /// Assigned risk
    pub risk_level: RiskLevel,

    /// Human-readable reasons behind the risk level
    #[serde(default)]
    pub risk_factors: Vec<String>,

    /// Per-file change summary
    #[serde(default)]
    pub file_changes: Vec<FileChange>,
}

impl Preview {
    /// A preview with only a risk level
    pub fn new(risk_level: RiskLevel) -> Self {
        Self {
            risk_level,
            risk_factors: Vec::new(),
            file_changes: Vec::new(),
        }
    }
}

/// Line-level summary of one file touched by a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub action: ChangeAction,
    pub lines_before: usize,
    pub lines_after: usize,
    pub lines_added: usize,
    pub lines_removed: usize,
}
